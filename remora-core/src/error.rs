//! Domain-specific error types for the remoting engine.
//!
//! All fallible operations return `Result<T, RemotingError>`.
//! Untrusted input (stanzas, channel frames, video packets) never panics:
//! every failure is typed and either reported to the peer or surfaced to
//! the owning session.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

// ── ErrorCode ────────────────────────────────────────────────────

/// Reason code attached to a terminal session transition.
///
/// This is the only failure information exposed upward: a session ends
/// with exactly one `ErrorCode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ErrorCode {
    /// Normal termination.
    #[default]
    Ok,
    /// The peer never answered or bounced our session-initiate.
    PeerIsOffline,
    /// The peer declined the session.
    SessionRejected,
    /// No mutually supported configuration or authenticator protocol error.
    IncompatibleProtocol,
    /// Credentials did not match.
    AuthenticationFailed,
    /// A well-known channel could not be established or authenticated.
    ChannelConnectionError,
    /// Malformed or unexpected signaling traffic.
    SignalingError,
    /// A signaling request was not answered within its budget.
    SignalingTimeout,
    /// Anything else.
    UnknownError,
}

impl ErrorCode {
    /// Wire name used inside `<error-code>` of a session-terminate.
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Ok => "ok",
            ErrorCode::PeerIsOffline => "peer-is-offline",
            ErrorCode::SessionRejected => "session-rejected",
            ErrorCode::IncompatibleProtocol => "incompatible-protocol",
            ErrorCode::AuthenticationFailed => "authentication-failed",
            ErrorCode::ChannelConnectionError => "channel-connection-error",
            ErrorCode::SignalingError => "signaling-error",
            ErrorCode::SignalingTimeout => "signaling-timeout",
            ErrorCode::UnknownError => "unknown-error",
        }
    }

    /// Inverse of [`as_str`](Self::as_str). Unknown names map to
    /// `UnknownError` so that newer peers never break older ones.
    pub fn from_wire(name: &str) -> Self {
        match name {
            "ok" => ErrorCode::Ok,
            "peer-is-offline" => ErrorCode::PeerIsOffline,
            "session-rejected" => ErrorCode::SessionRejected,
            "incompatible-protocol" => ErrorCode::IncompatibleProtocol,
            "authentication-failed" => ErrorCode::AuthenticationFailed,
            "channel-connection-error" => ErrorCode::ChannelConnectionError,
            "signaling-error" => ErrorCode::SignalingError,
            "signaling-timeout" => ErrorCode::SignalingTimeout,
            _ => ErrorCode::UnknownError,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── RemotingError ────────────────────────────────────────────────

/// The canonical error type for `remora-core`.
#[derive(Debug, Error)]
pub enum RemotingError {
    // ── Signaling ────────────────────────────────────────────────
    /// A stanza could not be turned into a signaling message.
    #[error("signaling parse error: {0}")]
    Parse(#[from] ParseError),

    /// XML could not be read or written.
    #[error("xml error: {0}")]
    Xml(String),

    /// The signaling transport refused or lost a stanza.
    #[error("signaling transport error: {0}")]
    Signaling(String),

    // ── Session ──────────────────────────────────────────────────
    /// The session ended; carries the terminal reason.
    #[error("session closed: {0}")]
    SessionClosed(ErrorCode),

    /// An operation was attempted in a state that does not allow it.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// No session with this id is known to the session manager.
    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// Channel creation was cancelled before the channel connected.
    #[error("channel creation cancelled: {0}")]
    ChannelCancelled(String),

    /// Channel transport or per-channel authentication failed.
    #[error("channel {name} failed: {reason}")]
    ChannelFailed { name: String, reason: String },

    // ── Video ────────────────────────────────────────────────────
    /// The row-based codec rejected a stream.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The capture backend failed.
    #[error("capture error: {0}")]
    Capture(String),

    // ── Plumbing ─────────────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding or decoding of a payload failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// An mpsc/oneshot channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── ParseError ───────────────────────────────────────────────────

/// Failure to interpret a signaling stanza.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The stanza is not a session-protocol message at all.
    #[error("stanza is not addressed to the session namespace")]
    NotSessionMessage,

    /// The `action` attribute names an action we do not know.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// A required attribute or element is absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// The content block does not describe our application.
    #[error("incompatible protocol: {0}")]
    IncompatibleProtocol(String),

    /// A transport candidate is malformed; the whole message is rejected.
    #[error("malformed candidate: {0}")]
    MalformedCandidate(String),

    /// An embedded payload (authenticator blob, channel config) is invalid.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

// ── CodecError ───────────────────────────────────────────────────

/// Failure inside the row-based encoder/decoder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The compressor or decompressor reported an internal error.
    #[error("compression failed: {0}")]
    Compression(String),

    /// Packets arrived in an order the decoder cannot accept.
    #[error("out-of-order packet: {0}")]
    OutOfOrder(&'static str),

    /// A rectangle lies outside the known screen.
    #[error("rectangle {0} outside screen {1}")]
    OutOfBounds(String, String),

    /// More pixel data than the rectangle can hold.
    #[error("too much data for rectangle")]
    Overflow,

    /// The compressed stream did not end with the rectangle.
    #[error("compressed stream truncated")]
    Truncated,

    /// A packet declared a screen the decoder will not allocate.
    #[error("screen size {0} not accepted")]
    ScreenTooLarge(String),

    /// `LAST_PACKET` arrived before every row was filled.
    #[error("rectangle incomplete: {filled} of {expected} bytes")]
    Underflow { filled: usize, expected: usize },

    /// The decoder has not been told the screen size yet.
    #[error("decoder not initialized")]
    Uninitialized,

    /// The packet's encoding is not handled by the row-based codec.
    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for RemotingError {
    fn from(s: String) -> Self {
        RemotingError::Other(s)
    }
}

impl From<&str> for RemotingError {
    fn from(s: &str) -> Self {
        RemotingError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for RemotingError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        RemotingError::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for RemotingError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        RemotingError::ChannelClosed
    }
}

impl From<Box<bincode::ErrorKind>> for RemotingError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        RemotingError::Encoding(e.to_string())
    }
}

impl From<quick_xml::Error> for RemotingError {
    fn from(e: quick_xml::Error) -> Self {
        RemotingError::Xml(e.to_string())
    }
}
