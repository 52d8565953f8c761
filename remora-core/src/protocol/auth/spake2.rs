//! SPAKE2 (Ed25519) shared-secret authentication with key confirmation.
//!
//! ```text
//!  client (A)                              host (B)
//!  Spake2Start{pA}          ─initiate──▶   finish(pA) → K
//!                           ◀─accept───    Spake2Reply{pB, tag(K, host)}
//!  finish(pB) → K, verify
//!  Spake2Confirm{tag(K, client)} ─info──▶  verify
//!  Accepted                                Accepted
//! ```

use ::spake2::{Ed25519Group, Identity, Password, Spake2};
use tracing::{debug, warn};

use super::{AuthMessage, AuthState, ChannelAuthenticator, RejectionReason, Role, keyed_tag, tags_match};

const CLIENT_IDENTITY: &[u8] = b"remora-client";
const HOST_IDENTITY: &[u8] = b"remora-host";

pub struct Spake2Authenticator {
    role: Role,
    state: AuthState,
    rejection: Option<RejectionReason>,
    spake: Option<Spake2<Ed25519Group>>,
    outbound: Vec<u8>,
    key: Option<[u8; 32]>,
}

impl Spake2Authenticator {
    pub fn new(role: Role, secret: &[u8]) -> Self {
        let password = Password::new(secret);
        let id_a = Identity::new(CLIENT_IDENTITY);
        let id_b = Identity::new(HOST_IDENTITY);
        let (spake, outbound) = match role {
            Role::Client => Spake2::<Ed25519Group>::start_a(&password, &id_a, &id_b),
            Role::Host => Spake2::<Ed25519Group>::start_b(&password, &id_a, &id_b),
        };
        Self {
            role,
            // The client speaks first.
            state: match role {
                Role::Client => AuthState::MessageReady,
                Role::Host => AuthState::WaitingMessage,
            },
            rejection: None,
            spake: Some(spake),
            outbound,
            key: None,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn rejection_reason(&self) -> Option<RejectionReason> {
        self.rejection
    }

    /// `None` when called out of turn.
    pub(super) fn next_message(&mut self) -> Option<AuthMessage> {
        let message = match (self.role, self.key) {
            (Role::Client, None) => {
                self.state = AuthState::WaitingMessage;
                AuthMessage::Spake2Start {
                    spake: self.outbound.clone(),
                }
            }
            (Role::Host, Some(key)) => {
                self.state = AuthState::WaitingMessage;
                AuthMessage::Spake2Reply {
                    spake: self.outbound.clone(),
                    confirm: confirmation(&key, Role::Host),
                }
            }
            (Role::Client, Some(key)) => {
                self.state = AuthState::Accepted;
                AuthMessage::Spake2Confirm {
                    confirm: confirmation(&key, Role::Client),
                }
            }
            (Role::Host, None) => return None,
        };
        Some(message)
    }

    pub(super) fn process_message(&mut self, message: Option<AuthMessage>) {
        match (self.role, message) {
            (Role::Host, Some(AuthMessage::Spake2Start { spake })) if self.key.is_none() => {
                if self.derive_key(&spake) {
                    self.state = AuthState::MessageReady;
                }
            }
            (Role::Client, Some(AuthMessage::Spake2Reply { spake, confirm })) if self.key.is_none() => {
                if self.derive_key(&spake) && self.verify(&confirm, Role::Host) {
                    self.state = AuthState::MessageReady;
                }
            }
            (Role::Host, Some(AuthMessage::Spake2Confirm { confirm })) if self.key.is_some() => {
                if self.verify(&confirm, Role::Client) {
                    debug!("spake2 peer confirmed");
                    self.state = AuthState::Accepted;
                }
            }
            (_, other) => {
                warn!(role = ?self.role, message = ?other, "unexpected spake2 message");
                self.reject(RejectionReason::ProtocolError);
            }
        }
    }

    pub(super) fn channel_authenticator(&self) -> Option<ChannelAuthenticator> {
        self.key
            .map(|key| ChannelAuthenticator::new(self.role, blake3::derive_key("remora 2024 channel key", &key)))
    }

    fn derive_key(&mut self, peer: &[u8]) -> bool {
        let Some(spake) = self.spake.take() else {
            self.reject(RejectionReason::ProtocolError);
            return false;
        };
        match spake.finish(peer) {
            Ok(shared) => {
                self.key = Some(blake3::derive_key("remora 2024 spake2 session key", &shared));
                true
            }
            Err(e) => {
                warn!(error = ?e, "spake2 exchange failed");
                self.reject(RejectionReason::ProtocolError);
                false
            }
        }
    }

    fn verify(&mut self, confirm: &[u8; 32], from: Role) -> bool {
        let ok = self
            .key
            .is_some_and(|key| tags_match(&confirmation(&key, from), confirm));
        if !ok {
            self.reject(RejectionReason::InvalidCredentials);
        }
        ok
    }

    fn reject(&mut self, reason: RejectionReason) {
        self.state = AuthState::Rejected;
        self.rejection = Some(reason);
    }
}

fn confirmation(key: &[u8; 32], from: Role) -> [u8; 32] {
    keyed_tag(key, &[from.tag(), b"confirm".as_slice()])
}
