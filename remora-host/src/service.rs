//! Host service core logic.
//!
//! Listens for signaling connections on TCP. Each accepted connection is a
//! point-to-point signaling link to one viewer; a [`Host`] is started on
//! it and runs until the link drops, the host is stopped, or the status
//! monitor asks for shutdown after too many failed logins.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use remora_core::host::{Host, HostStatusMonitor, HostStatusObserver, LoggingInputStub};
use remora_core::protocol::{NoRelay, RelayInfoProvider, StunRelayInfoProvider};
use remora_core::signal::{INCOMING_QUEUE, TcpSignalLink};
use remora_core::xml::XmlElement;

use crate::config::HostFileConfig;

// ── HostService ──────────────────────────────────────────────────

pub struct HostService {
    config: HostFileConfig,
    stop: CancellationToken,
}

impl HostService {
    pub fn new(config: HostFileConfig) -> Self {
        Self {
            config,
            stop: CancellationToken::new(),
        }
    }

    /// Cancel to stop the service from another task.
    pub fn stop_handle(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Run until stopped. Serves one signaling connection at a time.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.network.listen_address).await?;
        info!("signaling listener on {}", listener.local_addr()?);

        let monitor = Arc::new(HostStatusMonitor::new(self.config.host.max_failed_logins));
        let too_many_failures = monitor.shutdown_requested();

        loop {
            let stream = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!(%peer, "signaling connection accepted");
                        stream
                    }
                    Err(e) => {
                        warn!("accept failed: {e}");
                        continue;
                    }
                },
                _ = self.stop.cancelled() => break,
                _ = too_many_failures.cancelled() => break,
            };
            stream.set_nodelay(true).ok();

            let (link, incoming) = TcpSignalLink::new(stream, self.config.network.local_jid.clone());
            let (incoming, link_lost) = watch_link(incoming);
            let host = Host::start(
                Arc::new(link),
                incoming,
                self.config.capturer(),
                Arc::new(LoggingInputStub),
                self.relay(),
                self.config.to_host_config(),
                vec![Arc::clone(&monitor) as Arc<dyn HostStatusObserver>],
            )?;
            host.wait_ready().await;
            info!(jid = host.local_jid(), state = %monitor.state(), "host ready");

            tokio::select! {
                _ = link_lost.cancelled() => info!("signaling connection closed"),
                _ = self.stop.cancelled() => {}
                _ = too_many_failures.cancelled() => {}
            }
            host.shutdown().await;
        }

        if too_many_failures.is_cancelled() {
            warn!(attempts = monitor.failed_logins(), "stopped after repeated failed logins");
        }
        info!("host service stopped");
        Ok(())
    }

    fn relay(&self) -> Arc<dyn RelayInfoProvider> {
        let server = self.config.nat.stun_server.trim();
        if server.is_empty() {
            Arc::new(NoRelay)
        } else {
            Arc::new(StunRelayInfoProvider::new(server))
        }
    }
}

/// Forward `incoming` and report when the link behind it closes.
fn watch_link(mut incoming: mpsc::Receiver<XmlElement>) -> (mpsc::Receiver<XmlElement>, CancellationToken) {
    let (tx, rx) = mpsc::channel(INCOMING_QUEUE);
    let lost = CancellationToken::new();
    let guard = lost.clone().drop_guard();
    tokio::spawn(async move {
        let _guard = guard;
        while let Some(stanza) = incoming.recv().await {
            if tx.send(stanza).await.is_err() {
                break;
            }
        }
    });
    (rx, lost)
}
