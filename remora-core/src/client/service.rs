//! The viewing side of a connection.
//!
//! [`Client`] opens a session to a host, wraps it in a [`Connection`] and
//! routes the video channel into a [`RectangleUpdateDecoder`]. Connection
//! state changes go to a [`ClientUserInterface`].

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::rectangle_update_decoder::{DecoderStats, FrameConsumer, RectangleUpdateDecoder};
use crate::client::stats::StatsSnapshot;
use crate::error::{CodecError, ErrorCode, RemotingError};
use crate::protocol::auth::{AuthConfig, Role};
use crate::protocol::connection::{Connection, ConnectionEvent};
use crate::protocol::message::{ControlMessage, EventMessage, KeyEvent, MouseEvent};
use crate::protocol::session_config::CandidateSessionConfig;
use crate::protocol::session_manager::SessionManager;

// ── State ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Connecting,
    Authenticated,
    Connected,
    Closed,
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Upward notifications for whatever presents the remote screen.
pub trait ClientUserInterface: Send + Sync {
    /// `error` is `Ok` except for `Failed`.
    fn on_connection_state(&self, state: ConnectionState, error: ErrorCode);

    fn on_capabilities(&self, _names: &[String]) {}
}

// ── Config ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host_jid: String,
    pub auth: AuthConfig,
    /// Overrides the session manager's offer when set.
    pub session_config: Option<CandidateSessionConfig>,
}

impl ClientConfig {
    pub fn new(host_jid: impl Into<String>, auth: AuthConfig) -> Self {
        Self {
            host_jid: host_jid.into(),
            auth,
            session_config: None,
        }
    }
}

// ── Client ───────────────────────────────────────────────────────

pub struct Client {
    connection: Arc<Connection>,
    state: watch::Receiver<(ConnectionState, ErrorCode)>,
    stats: DecoderStats,
    task: JoinHandle<()>,
}

impl Client {
    /// Start a session to the configured host. Returns once the session
    /// initiate is on its way; progress is reported to `ui`.
    pub async fn connect(
        manager: &SessionManager,
        config: ClientConfig,
        ui: Arc<dyn ClientUserInterface>,
        consumer: Box<dyn FrameConsumer>,
    ) -> Result<Self, RemotingError> {
        let authenticator = config.auth.authenticator(Role::Client, &config.host_jid);
        let session = manager
            .connect(&config.host_jid, authenticator, config.session_config)
            .await?;
        info!(sid = session.id(), host = %config.host_jid, "connecting to host");

        let (connection, events) = Connection::new(session);
        let connection = Arc::new(connection);
        let (decoder, decode_errors) = RectangleUpdateDecoder::start(consumer);
        let stats = decoder.stats();
        let (state_tx, state) = watch::channel((ConnectionState::Connecting, ErrorCode::Ok));
        ui.on_connection_state(ConnectionState::Connecting, ErrorCode::Ok);

        let driver = ClientDriver {
            connection: Arc::clone(&connection),
            decoder,
            ui,
            state: state_tx,
        };
        let task = tokio::spawn(driver.run(events, decode_errors));

        Ok(Self {
            connection,
            state,
            stats,
            task,
        })
    }

    pub fn session_id(&self) -> &str {
        self.connection.session().id()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().0
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Resolves once every channel is up, or with the reason the
    /// connection ended first.
    pub async fn wait_connected(&self) -> Result<(), RemotingError> {
        let mut state = self.state.clone();
        let reached = state
            .wait_for(|(s, _)| *s == ConnectionState::Connected || s.is_terminal())
            .await
            .map(|s| *s);
        match reached {
            Ok((ConnectionState::Connected, _)) => Ok(()),
            Ok((_, code)) => Err(RemotingError::SessionClosed(code)),
            Err(_) => Err(RemotingError::ChannelClosed),
        }
    }

    /// Resolves when the connection has ended; returns the reason.
    pub async fn closed(&self) -> ErrorCode {
        let mut state = self.state.clone();
        match state.wait_for(|(s, _)| s.is_terminal()).await {
            Ok(s) => s.1,
            Err(_) => ErrorCode::UnknownError,
        }
    }

    pub async fn send_key(&self, event: KeyEvent) -> Result<(), RemotingError> {
        self.send_input(EventMessage::Key(event)).await
    }

    pub async fn send_mouse(&self, event: MouseEvent) -> Result<(), RemotingError> {
        self.send_input(EventMessage::Mouse(event)).await
    }

    /// Ask the host to pause or resume video for this connection.
    pub async fn set_video_enabled(&self, enable: bool) -> Result<(), RemotingError> {
        let control = self
            .connection
            .control_stub()
            .ok_or(RemotingError::InvalidState("not connected"))?;
        control.send(ControlMessage::VideoControl { enable }).await
    }

    async fn send_input(&self, event: EventMessage) -> Result<(), RemotingError> {
        let stub = self
            .connection
            .event_stub()
            .ok_or(RemotingError::InvalidState("not connected"))?;
        stub.send(event).await
    }

    /// Close the session and wait for the video pipeline to drain.
    pub async fn disconnect(self) -> ErrorCode {
        self.connection.disconnect().await;
        let code = self.closed().await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "client task failed");
        }
        code
    }
}

// ── Driver ───────────────────────────────────────────────────────

struct ClientDriver {
    connection: Arc<Connection>,
    decoder: RectangleUpdateDecoder,
    ui: Arc<dyn ClientUserInterface>,
    state: watch::Sender<(ConnectionState, ErrorCode)>,
}

impl ClientDriver {
    async fn run(
        self,
        mut events: mpsc::Receiver<ConnectionEvent>,
        mut decode_errors: mpsc::UnboundedReceiver<CodecError>,
    ) {
        let mut reason = ErrorCode::UnknownError;
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(ConnectionEvent::Closed(code)) => {
                        reason = code;
                        break;
                    }
                    Some(event) => self.handle(event).await,
                    None => break,
                },
                Some(error) = decode_errors.recv() => {
                    // Later errors of the same burst are covered by this refresh.
                    while decode_errors.try_recv().is_ok() {}
                    self.request_refresh(&error).await;
                }
            }
        }

        let ClientDriver {
            decoder, ui, state, ..
        } = self;
        decoder.close().await;
        let final_state = if reason == ErrorCode::Ok {
            ConnectionState::Closed
        } else {
            ConnectionState::Failed
        };
        info!(state = %final_state, reason = %reason, "connection to host ended");
        state.send_replace((final_state, reason));
        ui.on_connection_state(final_state, reason);
    }

    async fn handle(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Authenticated => self.set_state(ConnectionState::Authenticated),
            ConnectionEvent::Connected => self.set_state(ConnectionState::Connected),
            ConnectionEvent::Video(packet) => {
                // Blocks while the decode queue is full.
                if let Err(e) = self.decoder.push(packet).await {
                    warn!(error = %e, "decoder is gone; disconnecting");
                    self.connection.request_disconnect(ErrorCode::UnknownError);
                }
            }
            ConnectionEvent::Control(ControlMessage::Capabilities { names }) => {
                debug!(?names, "host capabilities");
                self.ui.on_capabilities(&names);
            }
            ConnectionEvent::Control(other) => debug!(?other, "ignoring control message"),
            ConnectionEvent::Input(_) => debug!("ignoring input from host"),
            ConnectionEvent::Closed(_) => {}
        }
    }

    fn set_state(&self, state: ConnectionState) {
        info!(%state, "connection state");
        self.state.send_replace((state, ErrorCode::Ok));
        self.ui.on_connection_state(state, ErrorCode::Ok);
    }

    /// Pause and resume video; the host answers with a full frame.
    async fn request_refresh(&self, error: &CodecError) {
        warn!(error = %error, "video stream error; requesting a full frame");
        let Some(control) = self.connection.control_stub() else {
            return;
        };
        for enable in [false, true] {
            if let Err(e) = control.send(ControlMessage::VideoControl { enable }).await {
                warn!(error = %e, "failed to request a refresh");
                return;
            }
        }
    }
}
