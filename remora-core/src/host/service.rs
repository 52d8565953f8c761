//! The host: accepts client sessions and streams the screen to them.
//!
//! [`Host`] owns the session manager, one [`ScreenRecorder`] shared by all
//! clients and a [`ClientSession`] task per accepted connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RemotingError;
use crate::host::capturer::Capturer;
use crate::host::client_session::ClientSession;
use crate::host::input::InputStub;
use crate::host::screen_recorder::{ScreenRecorder, ScreenRecorderConfig};
use crate::host::status::HostStatusObserver;
use crate::protocol::auth::{AuthConfig, Role};
use crate::protocol::relay::RelayInfoProvider;
use crate::protocol::session_config::CandidateSessionConfig;
use crate::protocol::session_manager::{
    IncomingResponse, SessionHandle, SessionListener, SessionManager, SessionManagerConfig,
};
use crate::signal::SignalStrategy;
use crate::xml::XmlElement;

// ── HostConfig ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Concurrent clients; further sessions are declined.
    pub max_connections: usize,
    pub auth: AuthConfig,
    /// `session.session_config` is what the host accepts.
    pub session: SessionManagerConfig,
    pub recorder: ScreenRecorderConfig,
}

impl HostConfig {
    pub fn new(auth: AuthConfig) -> Self {
        Self {
            max_connections: 1,
            auth,
            session: SessionManagerConfig::default(),
            recorder: ScreenRecorderConfig::default(),
        }
    }
}

// ── Listener ─────────────────────────────────────────────────────

struct HostListener {
    host_jid: String,
    auth: AuthConfig,
    supported: CandidateSessionConfig,
    max_connections: usize,
    active: Arc<AtomicUsize>,
    accepted: mpsc::UnboundedSender<SessionHandle>,
    shutdown: CancellationToken,
}

impl SessionListener for HostListener {
    fn on_incoming_session(&self, session: &SessionHandle, offer: &CandidateSessionConfig) -> IncomingResponse {
        if self.shutdown.is_cancelled() {
            return IncomingResponse::Decline;
        }
        if self.supported.select(offer).is_none() {
            info!(client = session.peer_jid(), "no common session configuration");
            return IncomingResponse::Incompatible;
        }
        let max = self.max_connections;
        if self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .is_err()
        {
            info!(client = session.peer_jid(), max, "connection limit reached");
            return IncomingResponse::Decline;
        }
        if self.accepted.send(session.clone()).is_err() {
            self.active.fetch_sub(1, Ordering::SeqCst);
            return IncomingResponse::Decline;
        }
        IncomingResponse::Accept(self.auth.authenticator(Role::Host, &self.host_jid))
    }
}

// ── Host ─────────────────────────────────────────────────────────

pub struct Host {
    manager: SessionManager,
    recorder: ScreenRecorder,
    shutdown: CancellationToken,
    active: Arc<AtomicUsize>,
    observers: Arc<[Arc<dyn HostStatusObserver>]>,
    task: JoinHandle<()>,
}

impl Host {
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        signal: Arc<dyn SignalStrategy>,
        incoming: mpsc::Receiver<XmlElement>,
        capturer: Capturer,
        input: Arc<dyn InputStub>,
        relay: Arc<dyn RelayInfoProvider>,
        config: HostConfig,
        observers: Vec<Arc<dyn HostStatusObserver>>,
    ) -> Result<Self, RemotingError> {
        let recorder = ScreenRecorder::start(capturer, config.recorder.clone(), None)?;
        let shutdown = CancellationToken::new();
        let active = Arc::new(AtomicUsize::new(0));
        let observers: Arc<[Arc<dyn HostStatusObserver>]> = observers.into();
        let (accepted_tx, accepted) = mpsc::unbounded_channel();

        let listener = HostListener {
            host_jid: signal.local_jid().to_string(),
            auth: config.auth.clone(),
            supported: config.session.session_config.clone(),
            max_connections: config.max_connections,
            active: Arc::clone(&active),
            accepted: accepted_tx,
            shutdown: shutdown.clone(),
        };
        let manager = SessionManager::start(signal, incoming, config.session, relay, Some(Arc::new(listener)));
        info!(jid = manager.local_jid(), max_connections = config.max_connections, "host started");

        let task = tokio::spawn(run_clients(
            accepted,
            recorder.clone(),
            input,
            Arc::clone(&observers),
            Arc::clone(&active),
            shutdown.clone(),
        ));

        Ok(Self {
            manager,
            recorder,
            shutdown,
            active,
            observers,
            task,
        })
    }

    pub fn local_jid(&self) -> &str {
        self.manager.local_jid()
    }

    /// Resolves once relay info is known; notifies observers.
    pub async fn wait_ready(&self) {
        self.manager.wait_ready().await;
        for observer in self.observers.iter() {
            observer.on_ready();
        }
    }

    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn recorder(&self) -> &ScreenRecorder {
        &self.recorder
    }

    /// Close every client, stop the recorder and the session manager.
    pub async fn shutdown(self) {
        info!("host shutting down");
        self.shutdown.cancel();
        self.manager.shutdown().await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "client task failed");
        }
        self.recorder.stop().await;
        for observer in self.observers.iter() {
            observer.on_shutdown();
        }
    }
}

async fn run_clients(
    mut accepted: mpsc::UnboundedReceiver<SessionHandle>,
    recorder: ScreenRecorder,
    input: Arc<dyn InputStub>,
    observers: Arc<[Arc<dyn HostStatusObserver>]>,
    active: Arc<AtomicUsize>,
    shutdown: CancellationToken,
) {
    let mut clients = JoinSet::new();
    loop {
        tokio::select! {
            handle = accepted.recv() => match handle {
                Some(handle) => {
                    let client = ClientSession::new(handle, recorder.clone(), Arc::clone(&input), Arc::clone(&observers));
                    debug!(sid = client.id(), client = client.client_jid(), "client session started");
                    clients.spawn(client.run());
                }
                None => break,
            },
            Some(_) = clients.join_next(), if !clients.is_empty() => {
                active.fetch_sub(1, Ordering::SeqCst);
            }
            _ = shutdown.cancelled() => break,
        }
    }
    // Sessions are being closed by the manager; wait for their last events.
    while clients.join_next().await.is_some() {
        active.fetch_sub(1, Ordering::SeqCst);
    }
}
