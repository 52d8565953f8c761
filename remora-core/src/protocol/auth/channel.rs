//! Per-channel handshake.
//!
//! Run on every freshly connected channel stream before any payload: each
//! side writes a 32-byte tag over the channel name under the session key,
//! then reads and checks the peer's tag.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{Role, keyed_tag, tags_match};
use crate::error::RemotingError;

#[derive(Clone)]
pub struct ChannelAuthenticator {
    role: Role,
    key: [u8; 32],
}

impl std::fmt::Debug for ChannelAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelAuthenticator")
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl ChannelAuthenticator {
    pub fn new(role: Role, key: [u8; 32]) -> Self {
        Self { role, key }
    }

    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    fn tag(&self, from: Role, channel: &str) -> [u8; 32] {
        keyed_tag(&self.key, &[from.tag(), channel.as_bytes()])
    }

    /// Exchange and verify tags over `stream`.
    pub async fn authenticate<S>(&self, stream: &mut S, channel: &str) -> Result<(), RemotingError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        stream.write_all(&self.tag(self.role, channel)).await?;
        stream.flush().await?;

        let mut peer = [0u8; 32];
        stream.read_exact(&mut peer).await?;
        if !tags_match(&peer, &self.tag(self.role.peer(), channel)) {
            return Err(RemotingError::ChannelFailed {
                name: channel.to_string(),
                reason: "channel authentication failed".into(),
            });
        }
        Ok(())
    }
}
