//! Session protocol: signaling messages, the session state machine and
//! its manager, authentication, channel transport and the typed
//! connection built on top.
//!
//! Signaling stanzas are XML ([`jingle`]); channel payloads are
//! serialized with `serde` + `bincode` and framed by [`codec`].

pub mod auth;
pub mod channel;
pub mod codec;
pub mod connection;
pub mod jingle;
pub mod message;
pub mod relay;
pub mod requests;
pub mod session;
pub mod session_config;
pub mod session_manager;
pub mod transport;

// Re-export the most commonly used types at the protocol level.
pub use auth::{
    AuthConfig, AuthMethod, AuthState, Authenticator, RejectionReason, Role, SecretHash,
};
pub use channel::{ChannelGuard, ChannelWriter, spawn_channel};
pub use codec::MessageCodec;
pub use connection::{Connection, ConnectionEvent};
pub use jingle::{Action, Reason, SignalingMessage, TransportCandidate};
pub use message::{
    ControlMessage, EventMessage, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
pub use relay::{NoRelay, RelayInfo, RelayInfoProvider, StunRelayInfoProvider};
pub use session::{Session, SessionState, SessionStatus};
pub use session_config::{
    CONTROL_CHANNEL, CandidateSessionConfig, ChannelConfig, Codec, EVENT_CHANNEL, SessionConfig,
    VIDEO_CHANNEL,
};
pub use session_manager::{
    IncomingResponse, SessionHandle, SessionListener, SessionManager, SessionManagerConfig,
};
pub use transport::{ChannelStream, TransportConfig};
