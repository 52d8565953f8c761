//! Session authentication.
//!
//! An [`Authenticator`] is a small state machine driven by the session:
//! while it is `MessageReady` the session asks it for the next message and
//! ships that to the peer; while it is `WaitingMessage` the session feeds
//! it whatever the peer sends. It ends `Accepted` or `Rejected`.
//!
//! Messages travel as opaque bytes (bincode-encoded [`AuthMessage`]) inside
//! the signaling stanzas. Once accepted, the authenticator hands out a
//! [`ChannelAuthenticator`] keyed on the session secret for the per-channel
//! handshake.

pub mod channel;
pub mod legacy;
pub mod spake2;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ErrorCode, RemotingError};

pub use channel::ChannelAuthenticator;
pub use legacy::LegacyTokenAuthenticator;
pub use spake2::Spake2Authenticator;

// ── State ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthState {
    /// `next_message` must be called.
    MessageReady,
    /// Waiting for the peer's next message.
    WaitingMessage,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionReason {
    InvalidCredentials,
    ProtocolError,
}

impl RejectionReason {
    pub fn error_code(self) -> ErrorCode {
        match self {
            RejectionReason::InvalidCredentials => ErrorCode::AuthenticationFailed,
            RejectionReason::ProtocolError => ErrorCode::IncompatibleProtocol,
        }
    }
}

/// Which end of the session an authenticator serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Client,
    Host,
}

impl Role {
    pub const fn tag(self) -> &'static [u8] {
        match self {
            Role::Client => b"client",
            Role::Host => b"host",
        }
    }

    pub const fn peer(self) -> Role {
        match self {
            Role::Client => Role::Host,
            Role::Host => Role::Client,
        }
    }
}

// ── Shared secret ────────────────────────────────────────────────

/// How the configured secret is turned into authentication material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecretHash {
    /// Use the secret bytes directly.
    #[default]
    Plain,
    /// Bind the secret to the host identity first, so the same PIN on
    /// two hosts yields unrelated keys.
    HostKeyed,
}

/// Which authenticator a config asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethod {
    #[default]
    Spake2,
    LegacyToken,
}

/// Shared-secret settings common to both ends of a session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub method: AuthMethod,
    pub secret: String,
    pub hash: SecretHash,
}

impl AuthConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            ..Self::default()
        }
    }

    /// A fresh authenticator for one session with `host_id`.
    pub fn authenticator(&self, role: Role, host_id: &str) -> Authenticator {
        Authenticator::new(self.method, role, host_id, &self.secret, self.hash)
    }
}

impl SecretHash {
    pub fn apply(self, host_id: &str, secret: &str) -> Vec<u8> {
        match self {
            SecretHash::Plain => secret.as_bytes().to_vec(),
            SecretHash::HostKeyed => {
                let mut material = Vec::with_capacity(host_id.len() + secret.len() + 1);
                material.extend_from_slice(host_id.as_bytes());
                material.push(0);
                material.extend_from_slice(secret.as_bytes());
                blake3::derive_key("remora 2024 host-keyed shared secret", &material).to_vec()
            }
        }
    }
}

// ── Wire messages ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMessage {
    Spake2Start { spake: Vec<u8> },
    Spake2Reply { spake: Vec<u8>, confirm: [u8; 32] },
    Spake2Confirm { confirm: [u8; 32] },
    LegacyToken { token: [u8; 32] },
}

impl AuthMessage {
    pub fn encode(&self) -> Result<Vec<u8>, RemotingError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        bincode::deserialize(bytes).ok()
    }
}

// ── Authenticator ────────────────────────────────────────────────

/// Closed set of supported authentication methods.
pub enum Authenticator {
    Spake2(Spake2Authenticator),
    LegacyToken(LegacyTokenAuthenticator),
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("method", &self.method())
            .field("state", &self.state())
            .finish()
    }
}

impl Authenticator {
    pub fn spake2(role: Role, host_id: &str, secret: &str, hash: SecretHash) -> Self {
        Authenticator::Spake2(Spake2Authenticator::new(role, &hash.apply(host_id, secret)))
    }

    pub fn legacy_token(role: Role, host_id: &str, secret: &str) -> Self {
        Authenticator::LegacyToken(LegacyTokenAuthenticator::new(role, host_id, secret))
    }

    /// Build the authenticator named by `method`. `hash` only applies to
    /// SPAKE2; legacy tokens are always keyed on the host id.
    pub fn new(method: AuthMethod, role: Role, host_id: &str, secret: &str, hash: SecretHash) -> Self {
        match method {
            AuthMethod::Spake2 => Self::spake2(role, host_id, secret, hash),
            AuthMethod::LegacyToken => Self::legacy_token(role, host_id, secret),
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Authenticator::Spake2(_) => "spake2",
            Authenticator::LegacyToken(_) => "legacy-token",
        }
    }

    pub fn state(&self) -> AuthState {
        match self {
            Authenticator::Spake2(a) => a.state(),
            Authenticator::LegacyToken(a) => a.state(),
        }
    }

    pub fn rejection_reason(&self) -> Option<RejectionReason> {
        match self {
            Authenticator::Spake2(a) => a.rejection_reason(),
            Authenticator::LegacyToken(a) => a.rejection_reason(),
        }
    }

    /// Produce the next outgoing message. Only valid in `MessageReady`.
    pub fn next_message(&mut self) -> Result<Vec<u8>, RemotingError> {
        if self.state() != AuthState::MessageReady {
            return Err(RemotingError::InvalidState("authenticator has no message ready"));
        }
        let message = match self {
            Authenticator::Spake2(a) => a.next_message(),
            Authenticator::LegacyToken(a) => a.next_message(),
        };
        message
            .ok_or(RemotingError::InvalidState("authenticator has no message ready"))?
            .encode()
    }

    /// Consume a message from the peer. Only valid in `WaitingMessage`;
    /// undecodable or unexpected messages reject with `ProtocolError`.
    pub fn process_message(&mut self, bytes: &[u8]) {
        if self.state() != AuthState::WaitingMessage {
            debug!(state = ?self.state(), "authenticator message ignored");
            return;
        }
        let message = AuthMessage::decode(bytes);
        match self {
            Authenticator::Spake2(a) => a.process_message(message),
            Authenticator::LegacyToken(a) => a.process_message(message),
        }
    }

    /// Per-channel authenticator; `None` until `Accepted`.
    pub fn channel_authenticator(&self) -> Option<ChannelAuthenticator> {
        if self.state() != AuthState::Accepted {
            return None;
        }
        match self {
            Authenticator::Spake2(a) => a.channel_authenticator(),
            Authenticator::LegacyToken(a) => a.channel_authenticator(),
        }
    }
}

/// Keyed hash used for key confirmation and tokens.
pub(crate) fn keyed_tag(key: &[u8; 32], parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_keyed(key);
    for part in parts {
        hasher.update(&(part.len() as u32).to_le_bytes());
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// Constant-time comparison of two tags.
pub(crate) fn tags_match(a: &[u8; 32], b: &[u8; 32]) -> bool {
    blake3::Hash::from(*a) == blake3::Hash::from(*b)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pump messages between two authenticators until neither has one
    /// ready; returns the number of messages exchanged.
    pub(crate) fn exchange(client: &mut Authenticator, host: &mut Authenticator) -> usize {
        let mut count = 0;
        loop {
            if client.state() == AuthState::MessageReady {
                let m = client.next_message().unwrap();
                host.process_message(&m);
                count += 1;
            } else if host.state() == AuthState::MessageReady {
                let m = host.next_message().unwrap();
                client.process_message(&m);
                count += 1;
            } else {
                return count;
            }
        }
    }

    #[test]
    fn spake2_accepts_matching_secret() {
        let mut client = Authenticator::spake2(Role::Client, "host@x", "123456", SecretHash::HostKeyed);
        let mut host = Authenticator::spake2(Role::Host, "host@x", "123456", SecretHash::HostKeyed);
        assert_eq!(exchange(&mut client, &mut host), 3);
        assert_eq!(client.state(), AuthState::Accepted);
        assert_eq!(host.state(), AuthState::Accepted);
        assert_eq!(
            client.channel_authenticator().unwrap().key(),
            host.channel_authenticator().unwrap().key()
        );
    }

    #[test]
    fn spake2_rejects_wrong_secret() {
        let mut client = Authenticator::spake2(Role::Client, "host@x", "123456", SecretHash::Plain);
        let mut host = Authenticator::spake2(Role::Host, "host@x", "654321", SecretHash::Plain);
        exchange(&mut client, &mut host);
        assert_eq!(client.state(), AuthState::Rejected);
        assert_eq!(client.rejection_reason(), Some(RejectionReason::InvalidCredentials));
        assert!(client.channel_authenticator().is_none());
    }

    #[test]
    fn host_keyed_secret_depends_on_host() {
        let a = SecretHash::HostKeyed.apply("host-a", "1234");
        let b = SecretHash::HostKeyed.apply("host-b", "1234");
        assert_ne!(a, b);
        assert_eq!(SecretHash::Plain.apply("host-a", "1234"), b"1234");
    }

    #[test]
    fn garbage_is_a_protocol_error() {
        let mut host = Authenticator::spake2(Role::Host, "h", "s", SecretHash::Plain);
        host.process_message(b"\xff\xff\xff");
        assert_eq!(host.state(), AuthState::Rejected);
        assert_eq!(host.rejection_reason(), Some(RejectionReason::ProtocolError));
        assert_eq!(
            host.rejection_reason().map(RejectionReason::error_code),
            Some(ErrorCode::IncompatibleProtocol)
        );
    }

    #[test]
    fn method_mismatch_is_a_protocol_error() {
        let mut client = Authenticator::legacy_token(Role::Client, "h", "s");
        let mut host = Authenticator::spake2(Role::Host, "h", "s", SecretHash::Plain);
        let m = client.next_message().unwrap();
        host.process_message(&m);
        assert_eq!(host.rejection_reason(), Some(RejectionReason::ProtocolError));
    }

    #[test]
    fn next_message_out_of_turn_is_an_error() {
        let mut host = Authenticator::spake2(Role::Host, "h", "s", SecretHash::Plain);
        assert!(host.next_message().is_err());
    }
}
