//! Session manager: the actor that owns every [`Session`].
//!
//! One task holds the session table and is the only writer to it. It
//! multiplexes incoming stanzas, commands from [`SessionHandle`]s, local
//! transport candidates and session timers. After every event it drains
//! the sessions' outboxes to the signaling transport and only then drops
//! sessions that reached a terminal state, so a session's last stanzas are
//! always sent before it disappears.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ErrorCode, RemotingError};
use crate::protocol::auth::Authenticator;
use crate::protocol::jingle::{
    Action, ErrorType, Reason, Reply, SignalingMessage, TransportCandidate, parse_reply, reply_to,
};
use crate::protocol::relay::{RelayInfo, RelayInfoProvider};
use crate::protocol::requests::session_of_request;
use crate::protocol::session::{ChannelReply, Session, SessionParams, SessionState, SessionStatus};
use crate::protocol::session_config::CandidateSessionConfig;
use crate::protocol::transport::{ChannelStream, TransportConfig};
use crate::signal::SignalStrategy;
use crate::xml::XmlElement;

const COMMAND_QUEUE: usize = 64;

// ── Configuration ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// How long a signaling request may stay unanswered.
    pub request_timeout: Duration,
    /// Coalescing window for outgoing transport candidates.
    pub candidate_batch: Duration,
    pub transport: TransportConfig,
    /// Offered by outgoing sessions; accepted from incoming ones.
    pub session_config: CandidateSessionConfig,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            candidate_batch: Duration::from_millis(2),
            transport: TransportConfig::default(),
            session_config: CandidateSessionConfig::default(),
        }
    }
}

// ── Listener ─────────────────────────────────────────────────────

/// The owner's verdict on an incoming session.
#[derive(Debug)]
pub enum IncomingResponse {
    Accept(Authenticator),
    Decline,
    Incompatible,
}

/// Decides whether incoming sessions are taken. Called from the manager
/// task, so it must not block.
pub trait SessionListener: Send + Sync {
    fn on_incoming_session(&self, session: &SessionHandle, offer: &CandidateSessionConfig) -> IncomingResponse;
}

// ── Commands ─────────────────────────────────────────────────────

enum Command {
    Connect {
        peer: String,
        authenticator: Authenticator,
        config: Option<CandidateSessionConfig>,
        reply: oneshot::Sender<SessionHandle>,
    },
    CreateChannel {
        sid: String,
        name: String,
        reply: ChannelReply,
    },
    CancelChannel {
        sid: String,
        name: String,
    },
    Close {
        sid: String,
        code: ErrorCode,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

// ── SessionHandle ────────────────────────────────────────────────

/// Cheap, cloneable reference to a session living in the manager task.
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    peer_jid: String,
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SessionStatus>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("peer", &self.peer_jid)
            .field("status", &*self.status.borrow())
            .finish()
    }
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peer_jid(&self) -> &str {
        &self.peer_jid
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    /// A receiver that observes every status change.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Wait until the status satisfies `done` or the session is gone.
    pub async fn wait_for(&self, done: impl FnMut(&SessionStatus) -> bool) -> SessionStatus {
        let mut status = self.status.clone();
        let current = match status.wait_for(done).await {
            Ok(current) => Some(*current),
            Err(_) => None,
        };
        current.unwrap_or_else(|| *status.borrow())
    }

    /// Wait until the session is authenticated or terminal.
    pub async fn authenticated(&self) -> Result<(), RemotingError> {
        let status = self
            .wait_for(|s| s.state == SessionState::Authenticated || s.state.is_terminal())
            .await;
        match status.state {
            SessionState::Authenticated => Ok(()),
            _ => Err(RemotingError::SessionClosed(status.error)),
        }
    }

    /// Wait until the session is closed or failed; returns its reason.
    pub async fn closed(&self) -> ErrorCode {
        self.wait_for(|s| s.state.is_terminal()).await.error
    }

    /// Create channel `name`. Completes once the channel is connected and
    /// authenticated.
    pub async fn create_channel(&self, name: &str) -> Result<ChannelStream, RemotingError> {
        let (reply, result) = oneshot::channel();
        self.commands
            .send(Command::CreateChannel {
                sid: self.id.clone(),
                name: name.to_string(),
                reply,
            })
            .await?;
        result
            .await
            .map_err(|_| RemotingError::ChannelCancelled(name.to_string()))?
    }

    /// Abort a pending channel creation; no-op once connected.
    pub async fn cancel_channel(&self, name: &str) {
        let _ = self
            .commands
            .send(Command::CancelChannel {
                sid: self.id.clone(),
                name: name.to_string(),
            })
            .await;
    }

    pub async fn close(&self) {
        self.close_with(ErrorCode::Ok).await;
    }

    pub async fn close_with(&self, code: ErrorCode) {
        let _ = self
            .commands
            .send(Command::Close {
                sid: self.id.clone(),
                code,
            })
            .await;
    }

    /// Ask for the session to close without waiting. Safe from any
    /// context, including completion callbacks.
    pub fn request_close(&self, code: ErrorCode) {
        let command = Command::Close {
            sid: self.id.clone(),
            code,
        };
        if let Err(mpsc::error::TrySendError::Full(command)) = self.commands.try_send(command) {
            let commands = self.commands.clone();
            tokio::spawn(async move {
                let _ = commands.send(command).await;
            });
        }
    }
}

// ── SessionManager ───────────────────────────────────────────────

pub struct SessionManager {
    local_jid: String,
    commands: mpsc::Sender<Command>,
    ready: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl SessionManager {
    /// Spawn the manager task. `incoming` is the signaling transport's
    /// inbound queue; its closing fails every session with
    /// `SignalingError`.
    pub fn start(
        signal: Arc<dyn SignalStrategy>,
        incoming: mpsc::Receiver<XmlElement>,
        config: SessionManagerConfig,
        relay: Arc<dyn RelayInfoProvider>,
        listener: Option<Arc<dyn SessionListener>>,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (ready_tx, ready) = watch::channel(false);
        let (relay_tx, relay_rx) = watch::channel(None);
        let (local_tx, local_rx) = mpsc::unbounded_channel();
        let local_jid = signal.local_jid().to_string();

        tokio::spawn(async move {
            let info = match relay.fetch().await {
                Ok(info) => info,
                Err(e) => {
                    warn!(error = %e, "relay info unavailable, using direct candidates only");
                    RelayInfo::default()
                }
            };
            relay_tx.send_replace(Some(info));
            ready_tx.send_replace(true);
        });

        let actor = ManagerActor {
            local_jid: local_jid.clone(),
            signal,
            config,
            listener,
            commands: commands.downgrade(),
            sessions: HashMap::new(),
            outbox: Vec::new(),
            relay: relay_rx,
            local_candidates: local_tx,
        };
        let task = tokio::spawn(actor.run(incoming, command_rx, local_rx));

        Self {
            local_jid,
            commands,
            ready,
            task,
        }
    }

    pub fn local_jid(&self) -> &str {
        &self.local_jid
    }

    /// Whether relay info has been fetched (or given up on).
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub async fn wait_ready(&self) {
        let mut ready = self.ready.clone();
        let _ = ready.wait_for(|r| *r).await;
    }

    /// Start an outgoing session to `peer`. `config` overrides the
    /// manager's offered configuration.
    pub async fn connect(
        &self,
        peer: &str,
        authenticator: Authenticator,
        config: Option<CandidateSessionConfig>,
    ) -> Result<SessionHandle, RemotingError> {
        let (reply, handle) = oneshot::channel();
        self.commands
            .send(Command::Connect {
                peer: peer.to_string(),
                authenticator,
                config,
                reply,
            })
            .await?;
        Ok(handle.await?)
    }

    /// Close every session, send their final stanzas and stop the task.
    pub async fn shutdown(self) {
        let (done, finished) = oneshot::channel();
        if self.commands.send(Command::Shutdown { done }).await.is_ok() {
            let _ = finished.await;
        }
        let _ = self.task.await;
    }
}

// ── Actor ────────────────────────────────────────────────────────

struct ManagerActor {
    local_jid: String,
    signal: Arc<dyn SignalStrategy>,
    config: SessionManagerConfig,
    listener: Option<Arc<dyn SessionListener>>,
    commands: mpsc::WeakSender<Command>,
    sessions: HashMap<String, Session>,
    /// Stanzas not owned by any session (replies to strays).
    outbox: Vec<XmlElement>,
    relay: watch::Receiver<Option<RelayInfo>>,
    local_candidates: mpsc::UnboundedSender<(String, TransportCandidate)>,
}

impl ManagerActor {
    async fn run(
        mut self,
        mut incoming: mpsc::Receiver<XmlElement>,
        mut commands: mpsc::Receiver<Command>,
        mut local_rx: mpsc::UnboundedReceiver<(String, TransportCandidate)>,
    ) {
        let mut signaling_open = true;
        loop {
            let deadline = self.next_deadline();
            let wake = tokio::time::Instant::from_std(
                deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600)),
            );

            tokio::select! {
                stanza = incoming.recv(), if signaling_open => match stanza {
                    Some(stanza) => self.on_stanza(stanza),
                    None => {
                        signaling_open = false;
                        self.on_signaling_lost();
                    }
                },
                command = commands.recv() => match command {
                    Some(Command::Shutdown { done }) => {
                        self.close_all(ErrorCode::Ok);
                        self.flush().await;
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.on_command(command),
                    None => {
                        self.close_all(ErrorCode::Ok);
                        self.flush().await;
                        break;
                    }
                },
                Some((sid, candidate)) = local_rx.recv() => {
                    if let Some(session) = self.sessions.get_mut(&sid) {
                        session.add_local_candidate(candidate, Instant::now());
                    }
                }
                _ = tokio::time::sleep_until(wake), if deadline.is_some() => {
                    let now = Instant::now();
                    for session in self.sessions.values_mut() {
                        session.poll_timers(now);
                    }
                }
            }

            self.flush().await;
            self.reap();
        }
        debug!(jid = %self.local_jid, "session manager stopped");
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.sessions.values().filter_map(Session::next_deadline).min()
    }

    /// Send every queued stanza.
    async fn flush(&mut self) {
        let mut stanzas = std::mem::take(&mut self.outbox);
        for session in self.sessions.values_mut() {
            stanzas.extend(session.take_outbox());
        }
        for stanza in stanzas {
            if let Err(e) = self.signal.send_stanza(stanza).await {
                warn!(error = %e, "failed to send stanza");
            }
        }
    }

    /// Drop sessions that reached a terminal state. Runs only after
    /// their outboxes were flushed.
    fn reap(&mut self) {
        self.sessions.retain(|sid, session| {
            if session.is_terminal() {
                debug!(%sid, state = %session.state(), "session removed");
                false
            } else {
                true
            }
        });
    }

    fn close_all(&mut self, code: ErrorCode) {
        let now = Instant::now();
        for session in self.sessions.values_mut() {
            session.close(code, now);
        }
    }

    fn on_signaling_lost(&mut self) {
        warn!(jid = %self.local_jid, sessions = self.sessions.len(), "signaling connection lost");
        self.close_all(ErrorCode::SignalingError);
    }

    fn handle(&self, id: &str, peer: &str, status: watch::Receiver<SessionStatus>) -> Option<SessionHandle> {
        Some(SessionHandle {
            id: id.to_string(),
            peer_jid: peer.to_string(),
            commands: self.commands.upgrade()?,
            status,
        })
    }

    fn params(
        &self,
        id: String,
        peer: String,
        authenticator: Authenticator,
        candidate_config: CandidateSessionConfig,
        status: watch::Sender<SessionStatus>,
    ) -> SessionParams {
        SessionParams {
            id,
            local_jid: self.local_jid.clone(),
            peer_jid: peer,
            authenticator,
            candidate_config,
            request_timeout: self.config.request_timeout,
            candidate_batch: self.config.candidate_batch,
            transport: self.config.transport.clone(),
            relay: self.relay.clone(),
            local_candidates: self.local_candidates.clone(),
            status,
        }
    }

    // ── Commands ─────────────────────────────────────────────────

    fn on_command(&mut self, command: Command) {
        let now = Instant::now();
        match command {
            Command::Connect {
                peer,
                authenticator,
                config,
                reply,
            } => {
                let sid = loop {
                    let candidate = rand::random::<u64>().to_string();
                    if !self.sessions.contains_key(&candidate) {
                        break candidate;
                    }
                };
                let (status_tx, status_rx) = watch::channel(SessionStatus::default());
                let Some(handle) = self.handle(&sid, &peer, status_rx) else {
                    return;
                };
                let offer = config.unwrap_or_else(|| self.config.session_config.clone());
                let params = self.params(sid.clone(), peer, authenticator, offer, status_tx);
                let mut session = Session::outgoing(params);
                info!(%sid, peer = %session.peer_jid(), "connecting");
                session.start(now);
                self.sessions.insert(sid, session);
                let _ = reply.send(handle);
            }
            Command::CreateChannel { sid, name, reply } => match self.sessions.get_mut(&sid) {
                Some(session) => session.create_channel(&name, reply),
                None => {
                    let _ = reply.send(Err(RemotingError::UnknownSession(sid)));
                }
            },
            Command::CancelChannel { sid, name } => {
                if let Some(session) = self.sessions.get_mut(&sid) {
                    session.cancel_channel(&name);
                }
            }
            Command::Close { sid, code } => {
                if let Some(session) = self.sessions.get_mut(&sid) {
                    session.close(code, now);
                }
            }
            Command::Shutdown { .. } => {}
        }
    }

    // ── Stanzas ──────────────────────────────────────────────────

    fn on_stanza(&mut self, stanza: XmlElement) {
        let now = Instant::now();

        if let Some((id, reply)) = parse_reply(&stanza) {
            match session_of_request(&id).and_then(|sid| self.sessions.get_mut(sid)) {
                Some(session) => session.handle_reply(&id, reply, now),
                None => debug!(id, "reply for unknown session"),
            }
            return;
        }

        if !SignalingMessage::is_session_stanza(&stanza) {
            debug!(name = stanza.name(), "ignoring non-session stanza");
            return;
        }

        let message = match SignalingMessage::parse(&stanza) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "rejecting malformed session stanza");
                self.outbox
                    .push(reply_to(&stanza, Reply::Error(ErrorType::for_parse_error(&e))));
                return;
            }
        };

        if let Some(session) = self.sessions.get_mut(&message.sid) {
            session.handle_request(&stanza, message, now);
            return;
        }

        match message.action {
            Action::SessionInitiate => self.on_incoming_session(&stanza, message, now),
            // Already gone; acknowledge so the peer stops waiting.
            Action::SessionTerminate => self.outbox.push(reply_to(&stanza, Reply::Result)),
            _ => {
                debug!(sid = %message.sid, action = %message.action, "stanza for unknown session");
                self.outbox
                    .push(reply_to(&stanza, Reply::Error(ErrorType::InvalidSessionId)));
            }
        }
    }

    fn on_incoming_session(&mut self, stanza: &XmlElement, message: SignalingMessage, now: Instant) {
        let sid = message.sid.clone();
        let peer = message.from.clone();
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());
        let response = match (&self.listener, self.handle(&sid, &peer, status_rx)) {
            (Some(listener), Some(handle)) => {
                let offer = message
                    .description
                    .as_ref()
                    .map(|d| d.config.clone())
                    .unwrap_or_default();
                listener.on_incoming_session(&handle, &offer)
            }
            _ => IncomingResponse::Decline,
        };

        let authenticator = match response {
            IncomingResponse::Accept(authenticator) => authenticator,
            IncomingResponse::Decline => {
                self.reject_incoming(stanza, &message, ErrorCode::SessionRejected, &status_tx);
                return;
            }
            IncomingResponse::Incompatible => {
                self.reject_incoming(stanza, &message, ErrorCode::IncompatibleProtocol, &status_tx);
                return;
            }
        };

        info!(%sid, %peer, "incoming session accepted");
        let params = self.params(
            sid.clone(),
            peer,
            authenticator,
            self.config.session_config.clone(),
            status_tx,
        );
        let mut session = Session::incoming(params);
        session.accept_initiate(stanza, message, now);
        self.sessions.insert(sid, session);
    }

    fn reject_incoming(
        &mut self,
        stanza: &XmlElement,
        initiate: &SignalingMessage,
        code: ErrorCode,
        status: &watch::Sender<SessionStatus>,
    ) {
        info!(sid = %initiate.sid, peer = %initiate.from, reason = %code, "incoming session rejected");
        self.outbox.push(reply_to(stanza, Reply::Result));

        let mut terminate = SignalingMessage::new(
            Action::SessionTerminate,
            initiate.sid.as_str(),
            self.local_jid.as_str(),
            initiate.from.as_str(),
        );
        terminate.reason = Some(Reason::for_error(code));
        terminate.error_code = Some(code);
        let mut terminate = terminate.format();
        terminate.set_attr("id", format!("{}:0", initiate.sid));
        self.outbox.push(terminate);

        status.send_replace(SessionStatus {
            state: SessionState::Failed,
            error: code,
            config: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::auth::{Role, SecretHash};
    use crate::protocol::jingle::JINGLE_NS;
    use crate::protocol::relay::NoRelay;
    use crate::protocol::session_config::Codec;
    use crate::signal::LoopbackBus;

    const HOST: &str = "host@example.com/desktop";
    const CLIENT: &str = "client@example.com/viewer";

    struct Verdict(fn() -> IncomingResponse);

    impl SessionListener for Verdict {
        fn on_incoming_session(&self, _: &SessionHandle, _: &CandidateSessionConfig) -> IncomingResponse {
            (self.0)()
        }
    }

    fn accept() -> IncomingResponse {
        IncomingResponse::Accept(Authenticator::spake2(Role::Host, HOST, "2468", SecretHash::HostKeyed))
    }

    fn manager(bus: &LoopbackBus, jid: &str, listener: Option<Arc<dyn SessionListener>>) -> SessionManager {
        let (signal, incoming) = bus.register(jid);
        SessionManager::start(signal, incoming, SessionManagerConfig::default(), Arc::new(NoRelay), listener)
    }

    fn client_auth(secret: &str) -> Authenticator {
        Authenticator::spake2(Role::Client, HOST, secret, SecretHash::HostKeyed)
    }

    #[tokio::test]
    async fn sessions_authenticate_over_loopback() {
        let bus = LoopbackBus::new();
        let _host = manager(&bus, HOST, Some(Arc::new(Verdict(accept))));
        let client = manager(&bus, CLIENT, None);
        client.wait_ready().await;
        assert!(client.is_ready());

        let session = client
            .connect(HOST, client_auth("2468"), Some(CandidateSessionConfig::with_video_codecs(&[Codec::Zlib])))
            .await
            .unwrap();
        session.authenticated().await.unwrap();
        let status = session.status();
        assert_eq!(status.state, SessionState::Authenticated);
        assert_eq!(status.config.unwrap().video.codec, Codec::Zlib);
    }

    #[tokio::test]
    async fn declined_session_is_rejected() {
        let bus = LoopbackBus::new();
        let _host = manager(&bus, HOST, Some(Arc::new(Verdict(|| IncomingResponse::Decline))));
        let client = manager(&bus, CLIENT, None);

        let session = client.connect(HOST, client_auth("2468"), None).await.unwrap();
        assert_eq!(session.closed().await, ErrorCode::SessionRejected);
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn wrong_pin_fails_authentication() {
        let bus = LoopbackBus::new();
        let _host = manager(&bus, HOST, Some(Arc::new(Verdict(accept))));
        let client = manager(&bus, CLIENT, None);

        let session = client.connect(HOST, client_auth("1111"), None).await.unwrap();
        assert!(matches!(
            session.authenticated().await,
            Err(RemotingError::SessionClosed(ErrorCode::AuthenticationFailed))
        ));
    }

    #[tokio::test]
    async fn offline_peer_is_reported() {
        let bus = LoopbackBus::new();
        let client = manager(&bus, CLIENT, None);
        let session = client.connect(HOST, client_auth("2468"), None).await.unwrap();
        assert_eq!(session.closed().await, ErrorCode::PeerIsOffline);
    }

    #[tokio::test]
    async fn dropped_session_reports_its_last_status() {
        let (status_tx, status) = watch::channel(SessionStatus::default());
        let (commands, _command_rx) = mpsc::channel(1);
        let handle = SessionHandle {
            id: "s1".into(),
            peer_jid: HOST.into(),
            commands,
            status,
        };
        status_tx.send_modify(|s| s.state = SessionState::Connecting);
        drop(status_tx);

        let last = handle.wait_for(|s| s.state.is_terminal()).await;
        assert_eq!(last.state, SessionState::Connecting);
        assert_eq!(handle.closed().await, ErrorCode::Ok);
    }

    #[tokio::test]
    async fn close_reaches_the_peer() {
        let bus = LoopbackBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        struct Capture(mpsc::UnboundedSender<SessionHandle>);
        impl SessionListener for Capture {
            fn on_incoming_session(&self, session: &SessionHandle, _: &CandidateSessionConfig) -> IncomingResponse {
                let _ = self.0.send(session.clone());
                accept()
            }
        }
        let _host = manager(&bus, HOST, Some(Arc::new(Capture(tx))));
        let client = manager(&bus, CLIENT, None);

        let session = client.connect(HOST, client_auth("2468"), None).await.unwrap();
        session.authenticated().await.unwrap();
        let host_side = rx.recv().await.unwrap();
        assert_eq!(host_side.id(), session.id());

        session.close().await;
        assert_eq!(host_side.closed().await, ErrorCode::Ok);
        assert_eq!(host_side.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn stray_stanzas_get_error_replies() {
        let bus = LoopbackBus::new();
        let _host = manager(&bus, HOST, None);
        let (probe, mut replies) = bus.register(CLIENT);

        let mut info = SignalingMessage::new(Action::TransportInfo, "999", CLIENT, HOST).format();
        info.set_attr("id", "p1");
        probe.send_stanza(info).await.unwrap();
        let reply = replies.recv().await.unwrap();
        assert_eq!(
            parse_reply(&reply),
            Some(("p1".to_string(), Reply::Error(ErrorType::InvalidSessionId)))
        );

        let bogus = XmlElement::new("iq")
            .with_attr("type", "set")
            .with_attr("id", "p2")
            .with_attr("from", CLIENT)
            .with_attr("to", HOST)
            .with_child(
                XmlElement::with_namespace("jingle", JINGLE_NS)
                    .with_attr("action", "session-dance")
                    .with_attr("sid", "999"),
            );
        probe.send_stanza(bogus).await.unwrap();
        let reply = replies.recv().await.unwrap();
        assert_eq!(parse_reply(&reply).map(|r| r.1), Some(Reply::Error(ErrorType::NotImplemented)));
    }

    #[tokio::test]
    async fn lost_signaling_fails_sessions() {
        let bus = LoopbackBus::new();
        let _host = manager(&bus, HOST, Some(Arc::new(Verdict(accept))));
        let (signal, incoming) = bus.register(CLIENT);
        let (feed, relay_incoming) = mpsc::channel(16);
        let client = SessionManager::start(
            signal,
            relay_incoming,
            SessionManagerConfig::default(),
            Arc::new(NoRelay),
            None,
        );
        // Forward the bus into the manager until we cut it.
        let forward = tokio::spawn(async move {
            let mut incoming = incoming;
            while let Some(stanza) = incoming.recv().await {
                if feed.send(stanza).await.is_err() {
                    break;
                }
            }
        });

        let session = client.connect(HOST, client_auth("2468"), None).await.unwrap();
        session.authenticated().await.unwrap();
        forward.abort();
        assert_eq!(session.closed().await, ErrorCode::SignalingError);
    }

    #[tokio::test]
    async fn shutdown_closes_sessions() {
        let bus = LoopbackBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        struct Capture(mpsc::UnboundedSender<SessionHandle>);
        impl SessionListener for Capture {
            fn on_incoming_session(&self, session: &SessionHandle, _: &CandidateSessionConfig) -> IncomingResponse {
                let _ = self.0.send(session.clone());
                accept()
            }
        }
        let host = manager(&bus, HOST, Some(Arc::new(Capture(tx))));
        let client = manager(&bus, CLIENT, None);

        let session = client.connect(HOST, client_auth("2468"), None).await.unwrap();
        session.authenticated().await.unwrap();
        let host_side = rx.recv().await.unwrap();

        host.shutdown().await;
        assert_eq!(host_side.state(), SessionState::Closed);
        assert_eq!(session.closed().await, ErrorCode::Ok);
    }
}
