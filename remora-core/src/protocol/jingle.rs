//! Signaling message codec.
//!
//! Converts [`SignalingMessage`]s to and from `<iq>` stanzas carrying a
//! `<jingle>` payload. This module is a pure data transform: it holds no
//! state and never talks to the network.
//!
//! ```text
//! <iq type="set" id=".." from=".." to="..">
//!   <jingle xmlns="urn:xmpp:jingle:1" action="session-initiate" sid=".." initiator="..">
//!     <content name="chromoting">
//!       <description xmlns="google:remoting">
//!         <control transport="stream" version="2" codec="undefined"/>
//!         <event .../> <video .../>
//!         <authentication>base64</authentication>
//!       </description>
//!       <transport xmlns="http://www.google.com/transport/p2p">
//!         <candidate name address port type protocol username password preference generation/>
//!       </transport>
//!     </content>
//!   </jingle>
//! </iq>
//! ```

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::{ErrorCode, ParseError};
use crate::protocol::session_config::{CandidateSessionConfig, SessionConfig};
use crate::xml::XmlElement;

pub const JINGLE_NS: &str = "urn:xmpp:jingle:1";
pub const REMOTING_NS: &str = "google:remoting";
pub const TRANSPORT_NS: &str = "http://www.google.com/transport/p2p";
pub const STANZAS_NS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
pub const CONTENT_NAME: &str = "chromoting";

// ── Action ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    SessionInitiate,
    SessionAccept,
    SessionInfo,
    TransportInfo,
    SessionTerminate,
}

impl Action {
    pub const fn as_str(self) -> &'static str {
        match self {
            Action::SessionInitiate => "session-initiate",
            Action::SessionAccept => "session-accept",
            Action::SessionInfo => "session-info",
            Action::TransportInfo => "transport-info",
            Action::SessionTerminate => "session-terminate",
        }
    }
}

impl FromStr for Action {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "session-initiate" => Action::SessionInitiate,
            "session-accept" => Action::SessionAccept,
            "session-info" => Action::SessionInfo,
            "transport-info" => Action::TransportInfo,
            "session-terminate" => Action::SessionTerminate,
            other => return Err(ParseError::UnknownAction(other.to_string())),
        })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Reason ───────────────────────────────────────────────────────

/// Termination reason carried in `<reason>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    Success,
    Decline,
    Cancel,
    Timeout,
    IncompatibleParameters,
    SecurityError,
    FailedApplication,
    GeneralError,
}

impl Reason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Reason::Success => "success",
            Reason::Decline => "decline",
            Reason::Cancel => "cancel",
            Reason::Timeout => "timeout",
            Reason::IncompatibleParameters => "incompatible-parameters",
            Reason::SecurityError => "security-error",
            Reason::FailedApplication => "failed-application",
            Reason::GeneralError => "general-error",
        }
    }

    /// Unknown reasons are read as `GeneralError`.
    pub fn from_wire(name: &str) -> Self {
        match name {
            "success" => Reason::Success,
            "decline" => Reason::Decline,
            "cancel" => Reason::Cancel,
            "timeout" => Reason::Timeout,
            "incompatible-parameters" => Reason::IncompatibleParameters,
            "security-error" => Reason::SecurityError,
            "failed-application" => Reason::FailedApplication,
            _ => Reason::GeneralError,
        }
    }

    /// The reason sent when a session ends with `code`.
    pub fn for_error(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Ok => Reason::Success,
            ErrorCode::SessionRejected => Reason::Decline,
            ErrorCode::IncompatibleProtocol => Reason::IncompatibleParameters,
            ErrorCode::AuthenticationFailed => Reason::SecurityError,
            ErrorCode::SignalingTimeout => Reason::Timeout,
            ErrorCode::ChannelConnectionError => Reason::FailedApplication,
            ErrorCode::PeerIsOffline | ErrorCode::SignalingError | ErrorCode::UnknownError => {
                Reason::GeneralError
            }
        }
    }

    /// Best-effort inverse of [`for_error`](Self::for_error), used when
    /// the peer sent no `<error-code>`.
    pub fn to_error(self) -> ErrorCode {
        match self {
            Reason::Success => ErrorCode::Ok,
            Reason::Decline | Reason::Cancel => ErrorCode::SessionRejected,
            Reason::IncompatibleParameters => ErrorCode::IncompatibleProtocol,
            Reason::SecurityError => ErrorCode::AuthenticationFailed,
            Reason::Timeout => ErrorCode::SignalingTimeout,
            Reason::FailedApplication => ErrorCode::ChannelConnectionError,
            Reason::GeneralError => ErrorCode::UnknownError,
        }
    }
}

// ── TransportCandidate ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateType {
    Local,
    Stun,
    Relay,
}

impl CandidateType {
    pub const fn as_str(self) -> &'static str {
        match self {
            CandidateType::Local => "local",
            CandidateType::Stun => "stun",
            CandidateType::Relay => "relay",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateProtocol {
    Tcp,
    Udp,
}

impl CandidateProtocol {
    pub const fn as_str(self) -> &'static str {
        match self {
            CandidateProtocol::Tcp => "tcp",
            CandidateProtocol::Udp => "udp",
        }
    }
}

/// One network address at which a channel may be reached.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportCandidate {
    /// Logical channel name ("control", "event", "video").
    pub name: String,
    pub address: SocketAddr,
    pub kind: CandidateType,
    pub protocol: CandidateProtocol,
    pub username: String,
    pub password: String,
    /// Higher is tried first, in `[0, 1]`.
    pub preference: f32,
    pub generation: u32,
}

impl TransportCandidate {
    pub fn to_xml(&self) -> XmlElement {
        XmlElement::new("candidate")
            .with_attr("name", self.name.as_str())
            .with_attr("address", self.address.ip().to_string())
            .with_attr("port", self.address.port().to_string())
            .with_attr("type", self.kind.as_str())
            .with_attr("protocol", self.protocol.as_str())
            .with_attr("username", self.username.as_str())
            .with_attr("password", self.password.as_str())
            .with_attr("preference", self.preference.to_string())
            .with_attr("generation", self.generation.to_string())
    }

    /// Parse one `<candidate>`. Any malformed field rejects the candidate.
    pub fn from_xml(element: &XmlElement) -> Result<Self, ParseError> {
        let field = |name: &'static str| {
            element
                .attr(name)
                .ok_or_else(|| ParseError::MalformedCandidate(format!("missing {name}")))
        };
        let bad = |what: &str, value: &str| ParseError::MalformedCandidate(format!("bad {what} {value:?}"));

        let name = field("name")?;
        if name.is_empty() {
            return Err(ParseError::MalformedCandidate("empty name".into()));
        }
        let address = field("address")?;
        let ip: IpAddr = address.parse().map_err(|_| bad("address", address))?;
        let port = field("port")?;
        let port: u16 = match port.parse() {
            Ok(0) | Err(_) => return Err(bad("port", port)),
            Ok(p) => p,
        };
        let kind = match field("type")? {
            "local" => CandidateType::Local,
            "stun" => CandidateType::Stun,
            "relay" => CandidateType::Relay,
            other => return Err(bad("type", other)),
        };
        let protocol = match field("protocol")? {
            "tcp" => CandidateProtocol::Tcp,
            "udp" => CandidateProtocol::Udp,
            other => return Err(bad("protocol", other)),
        };
        let preference = field("preference")?;
        let preference: f32 = preference
            .parse()
            .ok()
            .filter(|p: &f32| (0.0..=1.0).contains(p))
            .ok_or_else(|| bad("preference", preference))?;
        let generation = field("generation")?;
        let generation = generation.parse().map_err(|_| bad("generation", generation))?;

        Ok(Self {
            name: name.to_string(),
            address: SocketAddr::new(ip, port),
            kind,
            protocol,
            username: field("username")?.to_string(),
            password: field("password")?.to_string(),
            preference,
            generation,
        })
    }
}

// ── ContentDescription ───────────────────────────────────────────

/// The `<description>` of initiate/accept messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDescription {
    pub config: CandidateSessionConfig,
    /// Opaque authenticator message.
    pub auth: Option<Vec<u8>>,
}

impl ContentDescription {
    /// Interpret the description as a negotiated config: exactly one
    /// entry per channel.
    pub fn session_config(&self) -> Option<SessionConfig> {
        match (
            self.config.control.as_slice(),
            self.config.event.as_slice(),
            self.config.video.as_slice(),
        ) {
            ([control], [event], [video]) => Some(SessionConfig {
                control: *control,
                event: *event,
                video: *video,
            }),
            _ => None,
        }
    }
}

// ── SignalingMessage ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SignalingMessage {
    pub action: Action,
    pub sid: String,
    pub from: String,
    pub to: String,
    pub initiator: Option<String>,
    pub reason: Option<Reason>,
    pub error_code: Option<ErrorCode>,
    pub description: Option<ContentDescription>,
    pub candidates: Vec<TransportCandidate>,
    /// Authenticator message carried by `session-info`.
    pub info: Option<Vec<u8>>,
}

impl SignalingMessage {
    pub fn new(action: Action, sid: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            action,
            sid: sid.into(),
            from: from.into(),
            to: to.into(),
            initiator: None,
            reason: None,
            error_code: None,
            description: None,
            candidates: Vec::new(),
            info: None,
        }
    }

    /// Termination cause: the explicit error code if present, otherwise
    /// derived from the reason.
    pub fn termination_code(&self) -> ErrorCode {
        match (self.error_code, self.reason) {
            (Some(code), _) => code,
            (None, Some(reason)) => reason.to_error(),
            (None, None) => ErrorCode::UnknownError,
        }
    }

    /// Whether a stanza looks like a session message at all (cheap check
    /// used for routing before a full parse).
    pub fn is_session_stanza(stanza: &XmlElement) -> bool {
        stanza.name() == "iq"
            && stanza.attr("type") == Some("set")
            && stanza
                .child("jingle")
                .is_some_and(|j| j.namespace() == Some(JINGLE_NS))
    }

    // ── Parsing ──────────────────────────────────────────────────

    pub fn parse(stanza: &XmlElement) -> Result<Self, ParseError> {
        if !Self::is_session_stanza(stanza) {
            return Err(ParseError::NotSessionMessage);
        }
        let jingle = stanza
            .child("jingle")
            .ok_or(ParseError::NotSessionMessage)?;

        let action: Action = jingle
            .attr("action")
            .ok_or(ParseError::MissingField("action"))?
            .parse()?;
        let sid = jingle.attr("sid").ok_or(ParseError::MissingField("sid"))?;
        if sid.is_empty() {
            return Err(ParseError::MissingField("sid"));
        }
        let from = stanza.attr("from").ok_or(ParseError::MissingField("from"))?;
        let to = stanza.attr("to").unwrap_or_default();

        let mut message = SignalingMessage::new(action, sid, from, to);
        message.initiator = jingle.attr("initiator").map(str::to_string);

        let content = jingle.child("content");
        match action {
            Action::SessionInitiate | Action::SessionAccept => {
                let content = content
                    .filter(|c| c.attr("name") == Some(CONTENT_NAME))
                    .ok_or_else(|| ParseError::IncompatibleProtocol("no chromoting content".into()))?;
                let description = content
                    .child("description")
                    .filter(|d| d.namespace() == Some(REMOTING_NS))
                    .ok_or_else(|| ParseError::IncompatibleProtocol("no remoting description".into()))?;
                message.description = Some(ContentDescription {
                    config: CandidateSessionConfig::read_xml(description)?,
                    auth: read_auth(description)?,
                });
                message.candidates = read_candidates(content)?;
            }
            Action::TransportInfo => {
                if let Some(content) = content {
                    message.candidates = read_candidates(content)?;
                }
            }
            Action::SessionInfo => {
                message.info = read_auth(jingle)?;
            }
            Action::SessionTerminate => {
                if let Some(reason) = jingle.child("reason") {
                    message.reason = reason
                        .children()
                        .iter()
                        .find(|c| c.name() != "text")
                        .map(|c| Reason::from_wire(c.name()));
                }
                message.error_code = jingle.child("error-code").map(|e| ErrorCode::from_wire(e.text()));
            }
        }
        Ok(message)
    }

    // ── Formatting ───────────────────────────────────────────────

    /// Build the `<iq type="set">` stanza. The request id is stamped by the
    /// sender.
    pub fn format(&self) -> XmlElement {
        let mut jingle = XmlElement::with_namespace("jingle", JINGLE_NS)
            .with_attr("action", self.action.as_str())
            .with_attr("sid", self.sid.as_str());
        if let Some(initiator) = &self.initiator {
            jingle.set_attr("initiator", initiator.as_str());
        }

        let needs_content = self.description.is_some() || !self.candidates.is_empty();
        if needs_content && self.action != Action::SessionInfo && self.action != Action::SessionTerminate {
            let mut content = XmlElement::new("content").with_attr("name", CONTENT_NAME);
            if let Some(description) = &self.description {
                let mut desc = XmlElement::with_namespace("description", REMOTING_NS);
                description.config.write_xml(&mut desc);
                if let Some(auth) = &description.auth {
                    desc.add_child(auth_element(auth, false));
                }
                content.add_child(desc);
            }
            if !self.candidates.is_empty() {
                let mut transport = XmlElement::with_namespace("transport", TRANSPORT_NS);
                for candidate in &self.candidates {
                    transport.add_child(candidate.to_xml());
                }
                content.add_child(transport);
            }
            jingle.add_child(content);
        }

        if let Some(info) = &self.info {
            jingle.add_child(auth_element(info, true));
        }

        if self.action == Action::SessionTerminate {
            if let Some(reason) = self.reason {
                jingle.add_child(XmlElement::new("reason").with_child(XmlElement::new(reason.as_str())));
            }
            if let Some(code) = self.error_code {
                jingle.add_child(
                    XmlElement::with_namespace("error-code", REMOTING_NS).with_text(code.as_str()),
                );
            }
        }

        XmlElement::new("iq")
            .with_attr("type", "set")
            .with_attr("from", self.from.as_str())
            .with_attr("to", self.to.as_str())
            .with_child(jingle)
    }
}

fn auth_element(payload: &[u8], namespaced: bool) -> XmlElement {
    let element = if namespaced {
        XmlElement::with_namespace("authentication", REMOTING_NS)
    } else {
        XmlElement::new("authentication")
    };
    element.with_text(BASE64.encode(payload))
}

fn read_auth(parent: &XmlElement) -> Result<Option<Vec<u8>>, ParseError> {
    parent
        .child("authentication")
        .map(|a| {
            BASE64
                .decode(a.text().trim())
                .map_err(|e| ParseError::InvalidPayload(format!("authentication blob: {e}")))
        })
        .transpose()
}

fn read_candidates(content: &XmlElement) -> Result<Vec<TransportCandidate>, ParseError> {
    let Some(transport) = content.child("transport") else {
        return Ok(Vec::new());
    };
    transport
        .children_named("candidate")
        .map(TransportCandidate::from_xml)
        .collect()
}

// ── Replies ──────────────────────────────────────────────────────

/// Error conditions sent back for a request we cannot process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    BadRequest,
    NotImplemented,
    InvalidSessionId,
    UnexpectedRequest,
    UnsupportedInfo,
}

impl ErrorType {
    fn condition(self) -> &'static str {
        match self {
            ErrorType::BadRequest => "bad-request",
            ErrorType::NotImplemented | ErrorType::UnsupportedInfo => "feature-not-implemented",
            ErrorType::InvalidSessionId => "item-not-found",
            ErrorType::UnexpectedRequest => "unexpected-request",
        }
    }

    fn error_kind(self) -> &'static str {
        match self {
            ErrorType::BadRequest => "modify",
            _ => "cancel",
        }
    }

    /// The error type to answer with when an incoming stanza fails to
    /// parse.
    pub fn for_parse_error(error: &ParseError) -> Self {
        match error {
            ParseError::UnknownAction(_) => ErrorType::NotImplemented,
            _ => ErrorType::BadRequest,
        }
    }
}

/// The answer to one signaling request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Result,
    Error(ErrorType),
}

/// Build the reply to `request`, addressed back to its sender.
pub fn reply_to(request: &XmlElement, reply: Reply) -> XmlElement {
    let mut stanza = XmlElement::new("iq")
        .with_attr("id", request.attr("id").unwrap_or_default())
        .with_attr("from", request.attr("to").unwrap_or_default())
        .with_attr("to", request.attr("from").unwrap_or_default());
    match reply {
        Reply::Result => stanza.set_attr("type", "result"),
        Reply::Error(kind) => {
            stanza.set_attr("type", "error");
            let mut error = XmlElement::new("error")
                .with_attr("type", kind.error_kind())
                .with_child(XmlElement::with_namespace(kind.condition(), STANZAS_NS));
            if kind == ErrorType::UnsupportedInfo {
                error.add_child(XmlElement::with_namespace("unsupported-info", JINGLE_NS));
            }
            stanza.add_child(error);
        }
    }
    stanza
}

/// Recognize a `result`/`error` stanza; returns its id and reply kind.
pub fn parse_reply(stanza: &XmlElement) -> Option<(String, Reply)> {
    if stanza.name() != "iq" {
        return None;
    }
    let id = stanza.attr("id")?.to_string();
    match stanza.attr("type")? {
        "result" => Some((id, Reply::Result)),
        "error" => {
            let error = stanza.child("error");
            let has = |name: &str| error.is_some_and(|e| e.child(name).is_some());
            let kind = if has("unsupported-info") {
                ErrorType::UnsupportedInfo
            } else if has("feature-not-implemented") {
                ErrorType::NotImplemented
            } else if has("item-not-found") {
                ErrorType::InvalidSessionId
            } else if has("unexpected-request") {
                ErrorType::UnexpectedRequest
            } else {
                ErrorType::BadRequest
            };
            Some((id, Reply::Error(kind)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::session_config::Codec;

    fn candidate(name: &str, port: u16) -> TransportCandidate {
        TransportCandidate {
            name: name.into(),
            address: SocketAddr::from(([192, 168, 1, 7], port)),
            kind: CandidateType::Local,
            protocol: CandidateProtocol::Tcp,
            username: "u1".into(),
            password: "p1".into(),
            preference: 1.0,
            generation: 0,
        }
    }

    fn initiate() -> SignalingMessage {
        let mut m = SignalingMessage::new(Action::SessionInitiate, "1234", "client@x/r", "host@x/r");
        m.initiator = Some("client@x/r".into());
        m.description = Some(ContentDescription {
            config: CandidateSessionConfig::with_video_codecs(&[Codec::Zlib]),
            auth: Some(vec![1, 2, 3, 250]),
        });
        m
    }

    fn reparse(m: &SignalingMessage) -> SignalingMessage {
        let text = m.format().to_xml().unwrap();
        SignalingMessage::parse(&XmlElement::parse(&text).unwrap()).unwrap()
    }

    #[test]
    fn initiate_round_trip() {
        let m = initiate();
        assert_eq!(reparse(&m), m);
    }

    #[test]
    fn transport_info_round_trip() {
        let mut m = SignalingMessage::new(Action::TransportInfo, "9", "a", "b");
        m.candidates = vec![candidate("video", 4000), candidate("event", 4001)];
        assert_eq!(reparse(&m), m);
    }

    #[test]
    fn terminate_round_trip() {
        let mut m = SignalingMessage::new(Action::SessionTerminate, "9", "a", "b");
        m.reason = Some(Reason::Decline);
        m.error_code = Some(ErrorCode::SessionRejected);
        let back = reparse(&m);
        assert_eq!(back, m);
        assert_eq!(back.termination_code(), ErrorCode::SessionRejected);
    }

    #[test]
    fn session_info_round_trip() {
        let mut m = SignalingMessage::new(Action::SessionInfo, "9", "a", "b");
        m.info = Some(b"spake".to_vec());
        assert_eq!(reparse(&m), m);
    }

    #[test]
    fn reason_alone_determines_code() {
        let mut m = SignalingMessage::new(Action::SessionTerminate, "9", "a", "b");
        m.reason = Some(Reason::Success);
        assert_eq!(m.termination_code(), ErrorCode::Ok);
    }

    #[test]
    fn unknown_action_is_rejected() {
        let mut stanza = initiate().format();
        let mut jingle = stanza.child("jingle").unwrap().clone();
        jingle.set_attr("action", "content-add");
        stanza = XmlElement::new("iq")
            .with_attr("type", "set")
            .with_attr("from", "a")
            .with_child(jingle);
        assert_eq!(
            SignalingMessage::parse(&stanza),
            Err(ParseError::UnknownAction("content-add".into()))
        );
    }

    #[test]
    fn missing_sid_is_rejected() {
        let stanza = XmlElement::parse(
            r#"<iq type="set" from="a"><jingle xmlns="urn:xmpp:jingle:1" action="session-info"/></iq>"#,
        )
        .unwrap();
        assert_eq!(SignalingMessage::parse(&stanza), Err(ParseError::MissingField("sid")));
    }

    #[test]
    fn wrong_namespace_is_not_a_session_message() {
        let stanza = XmlElement::parse(
            r#"<iq type="set" from="a"><jingle xmlns="urn:other" action="session-info" sid="1"/></iq>"#,
        )
        .unwrap();
        assert_eq!(SignalingMessage::parse(&stanza), Err(ParseError::NotSessionMessage));
    }

    #[test]
    fn initiate_without_content_is_incompatible() {
        let stanza = XmlElement::parse(
            r#"<iq type="set" from="a"><jingle xmlns="urn:xmpp:jingle:1" action="session-initiate" sid="1"><content name="other"/></jingle></iq>"#,
        )
        .unwrap();
        assert!(matches!(
            SignalingMessage::parse(&stanza),
            Err(ParseError::IncompatibleProtocol(_))
        ));
    }

    #[test]
    fn one_bad_candidate_fails_the_message() {
        let mut m = SignalingMessage::new(Action::TransportInfo, "9", "a", "b");
        m.candidates = vec![candidate("video", 4000), candidate("event", 4001)];
        let text = m
            .format()
            .to_xml()
            .unwrap()
            .replace("port=\"4001\"", "port=\"70000\"");
        let stanza = XmlElement::parse(&text).unwrap();
        assert!(matches!(
            SignalingMessage::parse(&stanza),
            Err(ParseError::MalformedCandidate(_))
        ));
    }

    #[test]
    fn candidate_without_address_is_malformed() {
        let el = candidate("video", 1).to_xml();
        let mut stripped = XmlElement::new("candidate");
        for (k, v) in el.attributes().filter(|(k, _)| *k != "address") {
            stripped.set_attr(k, v);
        }
        assert!(matches!(
            TransportCandidate::from_xml(&stripped),
            Err(ParseError::MalformedCandidate(_))
        ));
    }

    #[test]
    fn error_reply_round_trip() {
        let request = initiate().format().with_attr("id", "17");
        for kind in [
            ErrorType::BadRequest,
            ErrorType::NotImplemented,
            ErrorType::InvalidSessionId,
            ErrorType::UnexpectedRequest,
            ErrorType::UnsupportedInfo,
        ] {
            let reply = reply_to(&request, Reply::Error(kind));
            assert_eq!(reply.attr("to"), Some("client@x/r"));
            assert_eq!(parse_reply(&reply), Some(("17".into(), Reply::Error(kind))));
        }
        let ok = reply_to(&request, Reply::Result);
        assert_eq!(parse_reply(&ok), Some(("17".into(), Reply::Result)));
    }

    #[test]
    fn accept_description_yields_session_config() {
        let description = ContentDescription {
            config: CandidateSessionConfig::with_video_codecs(&[Codec::Zlib]),
            auth: None,
        };
        assert!(description.session_config().is_some());

        let offer = ContentDescription {
            config: CandidateSessionConfig::default(),
            auth: None,
        };
        assert!(offer.session_config().is_none());
    }
}
