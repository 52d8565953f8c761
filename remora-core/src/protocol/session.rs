//! Per-connection session state machine.
//!
//! A [`Session`] is plain data owned by the session manager's actor loop.
//! It never touches the network itself: every stanza it wants to send is
//! queued on an outbox that the manager drains after each event, and its
//! public state is published on a `watch` channel read by
//! [`SessionHandle`](crate::protocol::session_manager::SessionHandle)s.
//!
//! States only move forward:
//!
//! ```text
//! Initializing → Connecting → Connected → Authenticated
//!        └───────────┴────────────┴────────────┴──→ Closed | Failed
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ErrorCode, RemotingError};
use crate::protocol::auth::{AuthState, Authenticator, ChannelAuthenticator, Role};
use crate::protocol::jingle::{
    Action, ContentDescription, ErrorType, Reason, Reply, SignalingMessage, TransportCandidate, reply_to,
};
use crate::protocol::relay::RelayInfo;
use crate::protocol::requests::PendingRequests;
use crate::protocol::session_config::{
    CONTROL_CHANNEL, CandidateSessionConfig, EVENT_CHANNEL, SessionConfig, VIDEO_CHANNEL,
};
use crate::protocol::transport::{self, ChannelSetup, ChannelStream, TransportConfig};
use crate::signal::bare_jid;
use crate::xml::XmlElement;

/// Reply channel of a channel-creation request.
pub type ChannelReply = oneshot::Sender<Result<ChannelStream, RemotingError>>;

// ── SessionState ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Initializing,
    Connecting,
    Connected,
    Authenticated,
    Closed,
    Failed,
}

impl SessionState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    /// Whether channels may be requested in this state.
    pub const fn allows_channels(self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Connected | SessionState::Authenticated
        )
    }

    const fn rank(self) -> u8 {
        match self {
            SessionState::Initializing => 0,
            SessionState::Connecting => 1,
            SessionState::Connected => 2,
            SessionState::Authenticated => 3,
            SessionState::Closed | SessionState::Failed => 4,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Initializing => "initializing",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Authenticated => "authenticated",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Snapshot published to session handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Terminal reason; `Ok` while the session is alive or closed cleanly.
    pub error: ErrorCode,
    /// Negotiated configuration, once known.
    pub config: Option<SessionConfig>,
}

// ── Session parameters ───────────────────────────────────────────

/// Everything the manager hands a new session.
pub(crate) struct SessionParams {
    pub id: String,
    pub local_jid: String,
    pub peer_jid: String,
    pub authenticator: Authenticator,
    /// What this side offers (client) or supports (host).
    pub candidate_config: CandidateSessionConfig,
    pub request_timeout: Duration,
    pub candidate_batch: Duration,
    pub transport: TransportConfig,
    pub relay: watch::Receiver<Option<RelayInfo>>,
    pub local_candidates: mpsc::UnboundedSender<(String, TransportCandidate)>,
    pub status: watch::Sender<SessionStatus>,
}

/// A channel being created or already handed out.
struct ChannelSlot {
    remote: mpsc::UnboundedSender<TransportCandidate>,
    task: JoinHandle<()>,
}

impl Drop for ChannelSlot {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn is_well_known_channel(name: &str) -> bool {
    matches!(name, CONTROL_CHANNEL | EVENT_CHANNEL | VIDEO_CHANNEL)
}

// ── Session ──────────────────────────────────────────────────────

pub struct Session {
    id: String,
    local_jid: String,
    peer_jid: String,
    role: Role,
    state: SessionState,
    error: ErrorCode,
    candidate_config: CandidateSessionConfig,
    config: Option<SessionConfig>,
    authenticator: Authenticator,
    requests: PendingRequests,
    outbox: Vec<XmlElement>,

    candidate_batch: Duration,
    pending_candidates: Vec<TransportCandidate>,
    candidates_flush_at: Option<Instant>,
    /// Remote candidates for well-known channels not requested yet.
    remote_candidates: HashMap<String, Vec<TransportCandidate>>,
    channels: HashMap<String, ChannelSlot>,
    /// Channels cancelled locally; late candidates for them are dropped.
    cancelled_channels: HashSet<String>,

    transport: TransportConfig,
    relay: watch::Receiver<Option<RelayInfo>>,
    local_candidates: mpsc::UnboundedSender<(String, TransportCandidate)>,
    channel_auth: watch::Sender<Option<ChannelAuthenticator>>,
    status: watch::Sender<SessionStatus>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer_jid)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl Session {
    fn new(params: SessionParams, role: Role) -> Self {
        let (channel_auth, _) = watch::channel(None);
        let session = Self {
            requests: PendingRequests::new(&params.id, params.request_timeout),
            id: params.id,
            local_jid: params.local_jid,
            peer_jid: params.peer_jid,
            role,
            state: SessionState::Initializing,
            error: ErrorCode::Ok,
            candidate_config: params.candidate_config,
            config: None,
            authenticator: params.authenticator,
            outbox: Vec::new(),
            candidate_batch: params.candidate_batch,
            pending_candidates: Vec::new(),
            candidates_flush_at: None,
            remote_candidates: HashMap::new(),
            channels: HashMap::new(),
            cancelled_channels: HashSet::new(),
            transport: params.transport,
            relay: params.relay,
            local_candidates: params.local_candidates,
            channel_auth,
            status: params.status,
        };
        session.publish();
        session
    }

    /// A session we initiate towards `params.peer_jid`.
    pub(crate) fn outgoing(params: SessionParams) -> Self {
        Self::new(params, Role::Client)
    }

    /// A session created for a peer's session-initiate.
    pub(crate) fn incoming(params: SessionParams) -> Self {
        Self::new(params, Role::Host)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peer_jid(&self) -> &str {
        &self.peer_jid
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn error(&self) -> ErrorCode {
        self.error
    }

    pub fn config(&self) -> Option<SessionConfig> {
        self.config
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Stanzas queued since the last call.
    pub(crate) fn take_outbox(&mut self) -> Vec<XmlElement> {
        std::mem::take(&mut self.outbox)
    }

    /// Earliest instant at which [`poll_timers`](Self::poll_timers) has
    /// work to do.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        match (self.requests.next_deadline(), self.candidates_flush_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // ── State ────────────────────────────────────────────────────

    fn publish(&self) {
        self.status.send_replace(SessionStatus {
            state: self.state,
            error: self.error,
            config: self.config,
        });
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state.is_terminal() || next.rank() <= self.state.rank() {
            debug!(sid = %self.id, from = %self.state, to = %next, "ignoring backwards state change");
            return;
        }
        info!(sid = %self.id, peer = %self.peer_jid, from = %self.state, to = %next, "session state changed");
        self.state = next;
        if next.is_terminal() {
            self.teardown();
        }
        self.publish();
    }

    fn teardown(&mut self) {
        self.channels.clear();
        self.remote_candidates.clear();
        self.pending_candidates.clear();
        self.candidates_flush_at = None;
        self.requests.clear();
        self.channel_auth.send_replace(None);
    }

    /// End the session with `code`, telling the peer why.
    fn fail(&mut self, code: ErrorCode, now: Instant) {
        if self.state.is_terminal() {
            return;
        }
        warn!(sid = %self.id, peer = %self.peer_jid, error = %code, "session failed");
        self.send_terminate(code, now);
        self.error = code;
        self.set_state(SessionState::Failed);
    }

    /// Local close. `Ok` closes cleanly; any other code fails the session.
    pub(crate) fn close(&mut self, code: ErrorCode, now: Instant) {
        if self.state.is_terminal() {
            return;
        }
        if code != ErrorCode::Ok {
            self.fail(code, now);
            return;
        }
        self.send_terminate(code, now);
        self.set_state(SessionState::Closed);
    }

    // ── Sending ──────────────────────────────────────────────────

    fn message(&self, action: Action) -> SignalingMessage {
        SignalingMessage::new(action, self.id.as_str(), self.local_jid.as_str(), self.peer_jid.as_str())
    }

    fn send_request(&mut self, message: SignalingMessage, now: Instant) {
        let mut stanza = message.format();
        self.requests.register(&mut stanza, message.action, now);
        self.outbox.push(stanza);
    }

    fn send_terminate(&mut self, code: ErrorCode, now: Instant) {
        let mut message = self.message(Action::SessionTerminate);
        message.reason = Some(Reason::for_error(code));
        message.error_code = Some(code);
        self.send_request(message, now);
    }

    fn reply(&mut self, request: &XmlElement, reply: Reply) {
        self.outbox.push(reply_to(request, reply));
    }

    /// Produce the next authenticator message, failing the session if the
    /// authenticator refuses.
    fn next_auth_message(&mut self, now: Instant) -> Option<Vec<u8>> {
        if self.authenticator.state() != AuthState::MessageReady {
            return None;
        }
        match self.authenticator.next_message() {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(sid = %self.id, error = %e, "authenticator produced no message");
                self.fail(ErrorCode::UnknownError, now);
                None
            }
        }
    }

    // ── Handshake ────────────────────────────────────────────────

    /// Send the session-initiate (client side).
    pub(crate) fn start(&mut self, now: Instant) {
        if self.state != SessionState::Initializing {
            return;
        }
        let auth = self.next_auth_message(now);
        if self.state.is_terminal() {
            return;
        }
        let mut message = self.message(Action::SessionInitiate);
        message.initiator = Some(self.local_jid.clone());
        message.description = Some(ContentDescription {
            config: self.candidate_config.clone(),
            auth,
        });
        self.send_request(message, now);
        self.set_state(SessionState::Connecting);
    }

    /// Answer the peer's session-initiate (host side). The owner already
    /// agreed to take the session.
    pub(crate) fn accept_initiate(&mut self, stanza: &XmlElement, message: SignalingMessage, now: Instant) {
        self.reply(stanza, Reply::Result);
        self.set_state(SessionState::Connecting);

        let Some(offer) = message.description else {
            self.fail(ErrorCode::IncompatibleProtocol, now);
            return;
        };
        let Some(config) = self.candidate_config.select(&offer.config) else {
            info!(sid = %self.id, "no common session configuration");
            self.fail(ErrorCode::IncompatibleProtocol, now);
            return;
        };
        self.config = Some(config);

        if let Some(payload) = &offer.auth {
            self.authenticator.process_message(payload);
        }
        if self.authenticator.state() == AuthState::Rejected {
            self.fail_authentication(now);
            return;
        }
        let auth = self.next_auth_message(now);
        if self.state.is_terminal() {
            return;
        }

        let mut accept = self.message(Action::SessionAccept);
        accept.description = Some(ContentDescription {
            config: config.to_candidate(),
            auth,
        });
        self.send_request(accept, now);
        self.set_state(SessionState::Connected);
        self.route_candidates(message.candidates);

        if self.authenticator.state() == AuthState::Accepted {
            self.on_authenticated();
        }
    }

    fn on_accept(&mut self, description: Option<ContentDescription>, now: Instant) {
        let Some(description) = description else {
            self.fail(ErrorCode::IncompatibleProtocol, now);
            return;
        };
        match description.session_config() {
            Some(config) if self.candidate_config.is_supported(&config) => {
                self.config = Some(config);
            }
            _ => {
                warn!(sid = %self.id, "peer accepted with a configuration we never offered");
                self.fail(ErrorCode::IncompatibleProtocol, now);
                return;
            }
        }
        self.set_state(SessionState::Connected);
        if let Some(payload) = &description.auth {
            self.authenticator.process_message(payload);
        }
        self.advance_auth(now);
    }

    /// Push the authenticator forward after it consumed a message.
    fn advance_auth(&mut self, now: Instant) {
        if let Some(payload) = self.next_auth_message(now) {
            let mut info = self.message(Action::SessionInfo);
            info.info = Some(payload);
            self.send_request(info, now);
        }
        match self.authenticator.state() {
            AuthState::Accepted => self.on_authenticated(),
            AuthState::Rejected => self.fail_authentication(now),
            AuthState::MessageReady | AuthState::WaitingMessage => {}
        }
    }

    fn fail_authentication(&mut self, now: Instant) {
        let code = self
            .authenticator
            .rejection_reason()
            .map_or(ErrorCode::AuthenticationFailed, |r| r.error_code());
        self.fail(code, now);
    }

    fn on_authenticated(&mut self) {
        if self.state != SessionState::Connected {
            return;
        }
        self.channel_auth
            .send_replace(self.authenticator.channel_authenticator());
        self.set_state(SessionState::Authenticated);
    }

    // ── Incoming ─────────────────────────────────────────────────

    /// Handle a request stanza addressed to this session.
    pub(crate) fn handle_request(&mut self, stanza: &XmlElement, message: SignalingMessage, now: Instant) {
        if bare_jid(&message.from) != bare_jid(&self.peer_jid) {
            warn!(sid = %self.id, from = %message.from, "session stanza from a stranger");
            self.reply(stanza, Reply::Error(ErrorType::InvalidSessionId));
            return;
        }

        match message.action {
            Action::SessionInitiate => {
                debug!(sid = %self.id, "duplicate session-initiate");
                self.reply(stanza, Reply::Result);
            }
            Action::SessionAccept => match (self.role, self.state) {
                (Role::Client, SessionState::Connecting) => {
                    self.reply(stanza, Reply::Result);
                    self.route_candidates(message.candidates);
                    self.on_accept(message.description, now);
                }
                (Role::Client, SessionState::Connected | SessionState::Authenticated) => {
                    debug!(sid = %self.id, "duplicate session-accept");
                    self.reply(stanza, Reply::Result);
                }
                _ => self.reply(stanza, Reply::Error(ErrorType::UnexpectedRequest)),
            },
            Action::SessionInfo => {
                let Some(payload) = message.info else {
                    self.reply(stanza, Reply::Error(ErrorType::UnsupportedInfo));
                    return;
                };
                if self.state != SessionState::Connected
                    || self.authenticator.state() != AuthState::WaitingMessage
                {
                    self.reply(stanza, Reply::Error(ErrorType::UnexpectedRequest));
                    return;
                }
                self.reply(stanza, Reply::Result);
                self.authenticator.process_message(&payload);
                self.advance_auth(now);
            }
            Action::TransportInfo => {
                if !self.state.allows_channels() {
                    self.reply(stanza, Reply::Error(ErrorType::UnexpectedRequest));
                    return;
                }
                self.reply(stanza, Reply::Result);
                self.route_candidates(message.candidates);
            }
            Action::SessionTerminate => {
                self.reply(stanza, Reply::Result);
                if self.state.is_terminal() {
                    return;
                }
                let code = message.termination_code();
                info!(sid = %self.id, peer = %self.peer_jid, reason = %code, "peer terminated session");
                self.error = code;
                self.set_state(if code == ErrorCode::Ok {
                    SessionState::Closed
                } else {
                    SessionState::Failed
                });
            }
        }
    }

    /// Handle the reply to one of our requests.
    pub(crate) fn handle_reply(&mut self, id: &str, reply: Reply, now: Instant) {
        let Some(request) = self.requests.resolve(id) else {
            debug!(sid = %self.id, id, "reply to unknown request");
            return;
        };
        let Reply::Error(kind) = reply else {
            return;
        };
        warn!(sid = %self.id, action = %request.action, error = ?kind, "peer rejected request");
        match request.action {
            Action::SessionInitiate => self.fail(ErrorCode::PeerIsOffline, now),
            Action::SessionTerminate => {}
            _ => self.fail(ErrorCode::SignalingError, now),
        }
    }

    /// Flush batched candidates and enforce the request timeout.
    pub(crate) fn poll_timers(&mut self, now: Instant) {
        if self.candidates_flush_at.is_some_and(|at| at <= now) {
            self.flush_candidates(now);
        }
        if let Some(request) = self.requests.expired(now) {
            warn!(
                sid = %self.id,
                action = %request.action,
                elapsed = ?now.saturating_duration_since(request.sent_at),
                "signaling request timed out"
            );
            self.fail(ErrorCode::SignalingTimeout, now);
        }
    }

    // ── Candidates ───────────────────────────────────────────────

    fn route_candidates(&mut self, candidates: Vec<TransportCandidate>) {
        for candidate in candidates {
            if let Some(slot) = self.channels.get(&candidate.name) {
                if slot.remote.send(candidate).is_err() {
                    debug!(sid = %self.id, "candidate for an already connected channel");
                }
            } else if self.cancelled_channels.contains(&candidate.name)
                || !is_well_known_channel(&candidate.name)
            {
                warn!(sid = %self.id, channel = %candidate.name, "dropping candidate for unknown channel");
            } else {
                self.remote_candidates
                    .entry(candidate.name.clone())
                    .or_default()
                    .push(candidate);
            }
        }
    }

    /// Queue a local candidate for the next `transport-info`.
    pub(crate) fn add_local_candidate(&mut self, candidate: TransportCandidate, now: Instant) {
        if !self.state.allows_channels() {
            return;
        }
        self.pending_candidates.push(candidate);
        if self.candidates_flush_at.is_none() {
            self.candidates_flush_at = Some(now + self.candidate_batch);
        }
    }

    fn flush_candidates(&mut self, now: Instant) {
        self.candidates_flush_at = None;
        if self.pending_candidates.is_empty() {
            return;
        }
        let mut message = self.message(Action::TransportInfo);
        message.candidates = std::mem::take(&mut self.pending_candidates);
        debug!(sid = %self.id, count = message.candidates.len(), "sending transport-info");
        self.send_request(message, now);
    }

    // ── Channels ─────────────────────────────────────────────────

    /// Start creating channel `name`; the result is delivered on `reply`.
    pub(crate) fn create_channel(&mut self, name: &str, reply: ChannelReply) {
        if !self.state.allows_channels() {
            let _ = reply.send(Err(RemotingError::InvalidState("session does not allow channels")));
            return;
        }
        if self.channels.contains_key(name) {
            let _ = reply.send(Err(RemotingError::InvalidState("channel already exists")));
            return;
        }

        let (remote_tx, remote) = mpsc::unbounded_channel();
        for candidate in self.remote_candidates.remove(name).unwrap_or_default() {
            let _ = remote_tx.send(candidate);
        }
        self.cancelled_channels.remove(name);

        let setup = ChannelSetup {
            sid: self.id.clone(),
            name: name.to_string(),
            role: self.role,
            config: self.transport.clone(),
            relay: self.relay.clone(),
            auth: self.channel_auth.subscribe(),
            remote,
            local: self.local_candidates.clone(),
        };
        let sid = self.id.clone();
        let task = tokio::spawn(async move {
            let result = transport::establish(setup).await;
            if let Err(e) = &result {
                debug!(%sid, error = %e, "channel setup failed");
            }
            let _ = reply.send(result);
        });
        self.channels.insert(
            name.to_string(),
            ChannelSlot {
                remote: remote_tx,
                task,
            },
        );
    }

    /// Abort a pending channel. No-op once the channel has connected.
    pub(crate) fn cancel_channel(&mut self, name: &str) {
        match self.channels.get(name) {
            Some(slot) if !slot.task.is_finished() => {
                debug!(sid = %self.id, channel = name, "channel creation cancelled");
                self.channels.remove(name);
                self.cancelled_channels.insert(name.to_string());
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::auth::SecretHash;
    use crate::protocol::jingle::parse_reply;
    use crate::protocol::session_config::Codec;

    const CLIENT: &str = "client@example.com/viewer";
    const HOST: &str = "host@example.com/desktop";

    struct Side {
        session: Session,
        status: watch::Receiver<SessionStatus>,
        _relay: watch::Sender<Option<RelayInfo>>,
        _local: mpsc::UnboundedReceiver<(String, TransportCandidate)>,
    }

    fn side(local: &str, peer: &str, authenticator: Authenticator, config: CandidateSessionConfig, outgoing: bool) -> Side {
        let (status_tx, status) = watch::channel(SessionStatus::default());
        let (relay_tx, relay) = watch::channel(None);
        let (local_tx, local_rx) = mpsc::unbounded_channel();
        let params = SessionParams {
            id: "4242".into(),
            local_jid: local.into(),
            peer_jid: peer.into(),
            authenticator,
            candidate_config: config,
            request_timeout: Duration::from_secs(10),
            candidate_batch: Duration::from_millis(2),
            transport: TransportConfig::default(),
            relay,
            local_candidates: local_tx,
            status: status_tx,
        };
        let session = if outgoing {
            Session::outgoing(params)
        } else {
            Session::incoming(params)
        };
        Side {
            session,
            status,
            _relay: relay_tx,
            _local: local_rx,
        }
    }

    fn client(secret: &str, config: CandidateSessionConfig) -> Side {
        let auth = Authenticator::spake2(Role::Client, HOST, secret, SecretHash::HostKeyed);
        side(CLIENT, HOST, auth, config, true)
    }

    fn host(secret: &str) -> Side {
        let auth = Authenticator::spake2(Role::Host, HOST, secret, SecretHash::HostKeyed);
        side(HOST, CLIENT, auth, CandidateSessionConfig::default(), false)
    }

    /// Deliver every queued stanza to the other side until both are quiet.
    /// The first initiate creates the host session through `accept_initiate`.
    fn pump(client: &mut Session, host: &mut Session, now: Instant) {
        loop {
            let from_client = client.take_outbox();
            let from_host = host.take_outbox();
            if from_client.is_empty() && from_host.is_empty() {
                return;
            }
            for stanza in from_client {
                deliver(host, &stanza, now);
            }
            for stanza in from_host {
                deliver(client, &stanza, now);
            }
        }
    }

    fn deliver(to: &mut Session, stanza: &XmlElement, now: Instant) {
        let text = stanza.to_xml().unwrap();
        let stanza = XmlElement::parse(&text).unwrap();
        if let Some((id, reply)) = parse_reply(&stanza) {
            to.handle_reply(&id, reply, now);
            return;
        }
        let message = SignalingMessage::parse(&stanza).unwrap();
        if message.action == Action::SessionInitiate && to.state() == SessionState::Initializing {
            to.accept_initiate(&stanza, message, now);
        } else {
            to.handle_request(&stanza, message, now);
        }
    }

    #[test]
    fn zlib_session_authenticates() {
        let now = Instant::now();
        let mut c = client("123456", CandidateSessionConfig::with_video_codecs(&[Codec::Zlib]));
        let mut h = host("123456");

        c.session.start(now);
        assert_eq!(c.session.state(), SessionState::Connecting);
        pump(&mut c.session, &mut h.session, now);

        assert_eq!(c.session.state(), SessionState::Authenticated);
        assert_eq!(h.session.state(), SessionState::Authenticated);
        let config = c.session.config().unwrap();
        assert_eq!(config.video.codec, Codec::Zlib);
        assert_eq!(h.session.config(), Some(config));
        assert_eq!(c.status.borrow().state, SessionState::Authenticated);
        assert!(c.session.requests.is_empty());
        assert!(c.session.channel_auth.borrow().is_some());
    }

    #[test]
    fn wrong_secret_fails_both_sides() {
        let now = Instant::now();
        let mut c = client("123456", CandidateSessionConfig::default());
        let mut h = host("000000");
        c.session.start(now);
        pump(&mut c.session, &mut h.session, now);

        assert_eq!(c.session.state(), SessionState::Failed);
        assert_eq!(c.session.error(), ErrorCode::AuthenticationFailed);
        assert_eq!(h.session.state(), SessionState::Failed);
        assert_eq!(h.status.borrow().error, ErrorCode::AuthenticationFailed);
    }

    #[test]
    fn no_common_codec_is_incompatible() {
        let now = Instant::now();
        let mut c = client("1", CandidateSessionConfig::with_video_codecs(&[Codec::Vp8]));
        let mut h = host("1");
        c.session.start(now);
        pump(&mut c.session, &mut h.session, now);

        assert_eq!(h.session.error(), ErrorCode::IncompatibleProtocol);
        assert_eq!(c.session.state(), SessionState::Failed);
        assert_eq!(c.session.error(), ErrorCode::IncompatibleProtocol);
    }

    #[test]
    fn unanswered_initiate_times_out() {
        let now = Instant::now();
        let mut c = client("1", CandidateSessionConfig::default());
        c.session.start(now);
        c.session.take_outbox();
        assert_eq!(c.session.next_deadline(), Some(now + Duration::from_secs(10)));

        c.session.poll_timers(now + Duration::from_secs(9));
        assert_eq!(c.session.state(), SessionState::Connecting);
        c.session.poll_timers(now + Duration::from_secs(10));
        assert_eq!(c.session.state(), SessionState::Failed);
        assert_eq!(c.session.error(), ErrorCode::SignalingTimeout);
    }

    #[test]
    fn bounced_initiate_means_peer_offline() {
        let now = Instant::now();
        let mut c = client("1", CandidateSessionConfig::default());
        c.session.start(now);
        let initiate = c.session.take_outbox().remove(0);
        let bounce = reply_to(&initiate, Reply::Error(ErrorType::BadRequest));
        deliver(&mut c.session, &bounce, now);
        assert_eq!(c.session.error(), ErrorCode::PeerIsOffline);
    }

    #[test]
    fn states_never_move_backwards() {
        let now = Instant::now();
        let mut c = client("1", CandidateSessionConfig::default());
        c.session.start(now);
        c.session.set_state(SessionState::Initializing);
        assert_eq!(c.session.state(), SessionState::Connecting);
        c.session.close(ErrorCode::Ok, now);
        c.session.set_state(SessionState::Connected);
        assert_eq!(c.session.state(), SessionState::Closed);
        assert_eq!(c.status.borrow().state, SessionState::Closed);
    }

    #[test]
    fn peer_terminate_with_success_closes() {
        let now = Instant::now();
        let mut c = client("1", CandidateSessionConfig::default());
        let mut h = host("1");
        c.session.start(now);
        pump(&mut c.session, &mut h.session, now);

        h.session.close(ErrorCode::Ok, now);
        pump(&mut c.session, &mut h.session, now);
        assert_eq!(c.session.state(), SessionState::Closed);
        assert_eq!(c.session.error(), ErrorCode::Ok);
    }

    #[test]
    fn unexpected_requests_get_error_replies() {
        let now = Instant::now();
        let mut c = client("1", CandidateSessionConfig::default());
        c.session.start(now);
        c.session.take_outbox();

        // session-info before the session is connected
        let mut info = SignalingMessage::new(Action::SessionInfo, "4242", HOST, CLIENT);
        info.info = Some(vec![1, 2, 3]);
        let mut stanza = info.format();
        stanza.set_attr("id", "h1");
        deliver(&mut c.session, &stanza, now);
        let reply = c.session.take_outbox().remove(0);
        assert_eq!(
            parse_reply(&reply),
            Some(("h1".to_string(), Reply::Error(ErrorType::UnexpectedRequest)))
        );

        // session-info without a payload
        let mut stanza = SignalingMessage::new(Action::SessionInfo, "4242", HOST, CLIENT).format();
        stanza.set_attr("id", "h2");
        deliver(&mut c.session, &stanza, now);
        let reply = c.session.take_outbox().remove(0);
        assert_eq!(parse_reply(&reply).map(|r| r.1), Some(Reply::Error(ErrorType::UnsupportedInfo)));

        // a stranger using our session id
        let mut stanza = SignalingMessage::new(Action::TransportInfo, "4242", "mallory@evil/x", CLIENT).format();
        stanza.set_attr("id", "m1");
        deliver(&mut c.session, &stanza, now);
        let reply = c.session.take_outbox().remove(0);
        assert_eq!(parse_reply(&reply).map(|r| r.1), Some(Reply::Error(ErrorType::InvalidSessionId)));
        assert_eq!(c.session.state(), SessionState::Connecting);
    }

    #[test]
    fn local_candidates_are_batched() {
        let now = Instant::now();
        let mut c = client("1", CandidateSessionConfig::default());
        let mut h = host("1");
        c.session.start(now);
        pump(&mut c.session, &mut h.session, now);

        let candidate = |name: &str, port: u16| TransportCandidate {
            name: name.into(),
            address: std::net::SocketAddr::from(([127, 0, 0, 1], port)),
            kind: crate::protocol::jingle::CandidateType::Local,
            protocol: crate::protocol::jingle::CandidateProtocol::Tcp,
            username: "u".into(),
            password: "p".into(),
            preference: 1.0,
            generation: 0,
        };
        h.session.add_local_candidate(candidate("control", 1000), now);
        h.session.add_local_candidate(candidate("video", 1001), now + Duration::from_millis(1));
        h.session.poll_timers(now + Duration::from_millis(1));
        assert!(h.session.take_outbox().is_empty());

        h.session.poll_timers(now + Duration::from_millis(2));
        let outbox = h.session.take_outbox();
        assert_eq!(outbox.len(), 1);
        let message = SignalingMessage::parse(&outbox[0]).unwrap();
        assert_eq!(message.action, Action::TransportInfo);
        assert_eq!(message.candidates.len(), 2);

        // The client has no channels yet: well-known names are buffered,
        // anything else is dropped.
        deliver(&mut c.session, &outbox[0], now);
        let mut stray = SignalingMessage::new(Action::TransportInfo, "4242", HOST, CLIENT);
        stray.candidates = vec![candidate("clipboard", 1002)];
        deliver(&mut c.session, &stray.format(), now);
        assert_eq!(c.session.remote_candidates.len(), 2);
        assert!(!c.session.remote_candidates.contains_key("clipboard"));
    }

    #[test]
    fn reply_to_newer_request_prunes_older() {
        let now = Instant::now();
        let mut c = client("1", CandidateSessionConfig::default());
        let mut h = host("1");
        c.session.start(now);
        pump(&mut c.session, &mut h.session, now);

        let later = now + Duration::from_secs(1);
        let candidate = TransportCandidate {
            name: "event".into(),
            address: std::net::SocketAddr::from(([127, 0, 0, 1], 9)),
            kind: crate::protocol::jingle::CandidateType::Local,
            protocol: crate::protocol::jingle::CandidateProtocol::Tcp,
            username: "u".into(),
            password: "p".into(),
            preference: 1.0,
            generation: 0,
        };
        for offset in [0, 10, 20] {
            let at = later + Duration::from_millis(offset);
            c.session.add_local_candidate(candidate.clone(), at);
            c.session.poll_timers(at + Duration::from_millis(2));
        }
        let sent = c.session.take_outbox();
        assert_eq!(sent.len(), 3);
        assert_eq!(c.session.requests.len(), 3);

        let newest = sent[2].attr("id").unwrap().to_string();
        c.session.handle_reply(&newest, Reply::Result, later);
        assert!(c.session.requests.is_empty());
        c.session.poll_timers(later + Duration::from_secs(60));
        assert_eq!(c.session.state(), SessionState::Authenticated);
    }
}
