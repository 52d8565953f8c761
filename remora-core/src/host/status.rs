//! Host status notifications and the status monitor.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::signal::bare_jid;

/// Receives host-level events. Every method defaults to a no-op.
pub trait HostStatusObserver: Send + Sync {
    /// The session manager is up and relay info was resolved.
    fn on_ready(&self) {}
    fn on_client_authenticated(&self, _jid: &str) {}
    fn on_client_disconnected(&self, _jid: &str) {}
    /// A client failed authentication.
    fn on_access_denied(&self, _jid: &str) {}
    fn on_shutdown(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostState {
    #[default]
    Disconnected,
    Starting,
    Ready,
    Connected,
    Disconnecting,
    Error,
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HostState::Disconnected => "disconnected",
            HostState::Starting => "starting",
            HostState::Ready => "ready",
            HostState::Connected => "connected",
            HostState::Disconnecting => "disconnecting",
            HostState::Error => "error",
        };
        f.write_str(name)
    }
}

pub const DEFAULT_MAX_FAILED_LOGINS: u32 = 5;

#[derive(Debug, Default)]
struct MonitorState {
    state: HostState,
    clients: BTreeSet<String>,
    failed_logins: u32,
}

/// Tracks host state and connected clients, and asks for shutdown after
/// too many failed logins.
#[derive(Debug)]
pub struct HostStatusMonitor {
    inner: Mutex<MonitorState>,
    max_failed_logins: u32,
    shutdown: CancellationToken,
}

impl Default for HostStatusMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FAILED_LOGINS)
    }
}

impl HostStatusMonitor {
    /// A monitor in the `Starting` state.
    pub fn new(max_failed_logins: u32) -> Self {
        Self {
            inner: Mutex::new(MonitorState {
                state: HostState::Starting,
                ..MonitorState::default()
            }),
            max_failed_logins,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> HostState {
        self.inner.lock().map_or(HostState::Error, |s| s.state)
    }

    /// Bare jids of the currently authenticated clients.
    pub fn connected_clients(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|s| s.clients.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn failed_logins(&self) -> u32 {
        self.inner.lock().map_or(0, |s| s.failed_logins)
    }

    /// Cancelled when the monitor wants the host to shut down.
    pub fn shutdown_requested(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn update(&self, f: impl FnOnce(&mut MonitorState)) {
        if let Ok(mut state) = self.inner.lock() {
            let before = state.state;
            f(&mut state);
            if state.state != before {
                info!(from = %before, to = %state.state, "host state changed");
            }
        }
    }
}

impl HostStatusObserver for HostStatusMonitor {
    fn on_ready(&self) {
        self.update(|s| {
            // Disconnected: a new host was started with the same monitor.
            if matches!(s.state, HostState::Starting | HostState::Disconnected) {
                s.state = HostState::Ready;
            }
        });
    }

    fn on_client_authenticated(&self, jid: &str) {
        self.update(|s| {
            if s.state == HostState::Disconnecting {
                warn!(client = bare_jid(jid), "ignoring authentication while disconnecting");
                return;
            }
            s.clients.insert(bare_jid(jid).to_string());
            s.state = HostState::Connected;
        });
    }

    fn on_client_disconnected(&self, jid: &str) {
        self.update(|s| {
            s.clients.remove(bare_jid(jid));
            if s.clients.is_empty() && s.state == HostState::Connected {
                s.state = HostState::Ready;
            }
        });
    }

    fn on_access_denied(&self, jid: &str) {
        let mut exhausted = false;
        self.update(|s| {
            s.failed_logins += 1;
            warn!(client = bare_jid(jid), attempts = s.failed_logins, "access denied");
            if s.failed_logins >= self.max_failed_logins && s.state != HostState::Disconnecting {
                s.state = HostState::Disconnecting;
                exhausted = true;
            }
        });
        if exhausted {
            warn!(max = self.max_failed_logins, "too many failed logins, shutting down");
            self.shutdown.cancel();
        }
    }

    fn on_shutdown(&self) {
        self.update(|s| {
            s.clients.clear();
            s.state = HostState::Disconnected;
        });
    }
}
