//! # remora-core
//!
//! Remote desktop engine: a host streams its screen to an authenticated
//! client over peer-to-peer channels negotiated through XML signaling.
//!
//! This crate contains:
//! - **Signaling**: `XmlElement`, the `SignalStrategy` trait with an
//!   in-memory bus and a TCP link, and the session stanza codec
//! - **Sessions**: the per-session state machine, `SessionManager` and the
//!   typed `Connection` with its control, event and video channels
//! - **Authentication**: SPAKE2 and shared-token authenticators plus the
//!   per-channel handshake
//! - **Video**: dirty-region capture, the row-based encoder/decoder and
//!   the frame types they share
//! - **Host**: `ScreenRecorder`, client sessions and the `Host` service
//! - **Client**: `RectangleUpdateDecoder`, video statistics and `Client`
//! - **Error**: `RemotingError` and the session-level `ErrorCode`

pub mod client;
pub mod error;
pub mod host;
pub mod protocol;
pub mod signal;
pub mod video;
pub mod xml;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use client::{Client, ClientConfig, ClientUserInterface, ConnectionState, FrameConsumer};
pub use error::{CodecError, ErrorCode, ParseError, RemotingError};
pub use host::{Capturer, Host, HostConfig, HostStatusMonitor, HostStatusObserver, ScreenRecorder};
pub use protocol::{
    AuthConfig, Connection, ConnectionEvent, SessionHandle, SessionManager, SessionManagerConfig,
    SessionState,
};
pub use signal::{LoopbackBus, SignalStrategy, TcpSignalLink};
pub use xml::XmlElement;
