//! Legacy shared-secret token authentication.
//!
//! Both ends derive a token key from the secret and the host jid. The
//! client sends `tag(key, client, host_jid)` in its session-initiate; the
//! host checks it and answers with `tag(key, host, host_jid)` in the
//! session-accept. There is no key agreement, so the secret itself keys
//! the channel handshakes.

use tracing::warn;

use super::{AuthMessage, AuthState, ChannelAuthenticator, RejectionReason, Role, keyed_tag, tags_match};
use crate::signal::bare_jid;

pub struct LegacyTokenAuthenticator {
    role: Role,
    state: AuthState,
    rejection: Option<RejectionReason>,
    key: [u8; 32],
    host_jid: String,
}

impl LegacyTokenAuthenticator {
    pub fn new(role: Role, host_jid: &str, secret: &str) -> Self {
        Self {
            role,
            state: match role {
                Role::Client => AuthState::MessageReady,
                Role::Host => AuthState::WaitingMessage,
            },
            rejection: None,
            key: blake3::derive_key("remora 2024 legacy token key", secret.as_bytes()),
            host_jid: bare_jid(host_jid).to_string(),
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn rejection_reason(&self) -> Option<RejectionReason> {
        self.rejection
    }

    fn token(&self, from: Role) -> [u8; 32] {
        keyed_tag(&self.key, &[from.tag(), self.host_jid.as_bytes()])
    }

    pub(super) fn next_message(&mut self) -> Option<AuthMessage> {
        if self.state != AuthState::MessageReady {
            return None;
        }
        self.state = match self.role {
            Role::Client => AuthState::WaitingMessage,
            Role::Host => AuthState::Accepted,
        };
        Some(AuthMessage::LegacyToken {
            token: self.token(self.role),
        })
    }

    pub(super) fn process_message(&mut self, message: Option<AuthMessage>) {
        let Some(AuthMessage::LegacyToken { token }) = message else {
            warn!(role = ?self.role, "unexpected legacy auth message");
            self.state = AuthState::Rejected;
            self.rejection = Some(RejectionReason::ProtocolError);
            return;
        };
        if !tags_match(&token, &self.token(self.role.peer())) {
            self.state = AuthState::Rejected;
            self.rejection = Some(RejectionReason::InvalidCredentials);
            return;
        }
        self.state = match self.role {
            Role::Host => AuthState::MessageReady,
            Role::Client => AuthState::Accepted,
        };
    }

    pub(super) fn channel_authenticator(&self) -> Option<ChannelAuthenticator> {
        let key = keyed_tag(&self.key, &[b"channel".as_slice(), self.host_jid.as_bytes()]);
        Some(ChannelAuthenticator::new(self.role, key))
    }
}
