//! Signaling transports.
//!
//! A [`SignalStrategy`] delivers outgoing stanzas; incoming stanzas arrive
//! on the `mpsc::Receiver<XmlElement>` returned alongside it, and the
//! receiver closing means the signaling connection is gone.

pub mod loopback;
pub mod tcp;

use async_trait::async_trait;

use crate::error::RemotingError;
use crate::xml::XmlElement;

pub use loopback::{LoopbackBus, LoopbackSignal};
pub use tcp::TcpSignalLink;

/// Capacity of the incoming-stanza queue of every transport.
pub const INCOMING_QUEUE: usize = 256;

#[async_trait]
pub trait SignalStrategy: Send + Sync {
    /// Full jid (`user@domain/resource`) of the local endpoint.
    fn local_jid(&self) -> &str;

    /// Queue one stanza for delivery. A `from` attribute is filled in when
    /// missing.
    async fn send_stanza(&self, stanza: XmlElement) -> Result<(), RemotingError>;
}

/// `user@domain/resource` → `user@domain`.
pub fn bare_jid(jid: &str) -> &str {
    jid.split_once('/').map_or(jid, |(bare, _)| bare)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_jid_strips_resource() {
        assert_eq!(bare_jid("alice@example.com/laptop"), "alice@example.com");
        assert_eq!(bare_jid("alice@example.com"), "alice@example.com");
    }
}
