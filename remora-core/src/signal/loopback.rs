//! In-memory signaling bus.
//!
//! Routes stanzas between registered jids by their `to` attribute, first by
//! full jid, then by bare jid. A request (`type="set"`) addressed to nobody
//! bounces back to its sender as a `service-unavailable` error, the way an
//! XMPP server reports an offline peer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::RemotingError;
use crate::protocol::jingle::STANZAS_NS;
use crate::signal::{INCOMING_QUEUE, SignalStrategy, bare_jid};
use crate::xml::XmlElement;

type Routes = Arc<Mutex<HashMap<String, mpsc::Sender<XmlElement>>>>;

#[derive(Clone, Default)]
pub struct LoopbackBus {
    routes: Routes,
}

impl LoopbackBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an endpoint. Registering a jid twice replaces the old route.
    pub fn register(&self, jid: &str) -> (Arc<LoopbackSignal>, mpsc::Receiver<XmlElement>) {
        let (tx, rx) = mpsc::channel(INCOMING_QUEUE);
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(jid.to_string(), tx);
        }
        let signal = Arc::new(LoopbackSignal {
            jid: jid.to_string(),
            routes: self.routes.clone(),
        });
        (signal, rx)
    }

    /// Detach an endpoint; later stanzas to it bounce.
    pub fn unregister(&self, jid: &str) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.remove(jid);
        }
    }
}

pub struct LoopbackSignal {
    jid: String,
    routes: Routes,
}

impl LoopbackSignal {
    fn route(&self, to: &str) -> Option<mpsc::Sender<XmlElement>> {
        let routes = self.routes.lock().ok()?;
        routes.get(to).cloned().or_else(|| {
            let bare = bare_jid(to);
            routes
                .iter()
                .find(|(jid, _)| bare_jid(jid) == bare)
                .map(|(_, tx)| tx.clone())
        })
    }
}

#[async_trait]
impl SignalStrategy for LoopbackSignal {
    fn local_jid(&self) -> &str {
        &self.jid
    }

    async fn send_stanza(&self, mut stanza: XmlElement) -> Result<(), RemotingError> {
        if stanza.attr("from").is_none_or(str::is_empty) {
            stanza.set_attr("from", self.jid.as_str());
        }
        let to = stanza.attr("to").unwrap_or_default().to_string();

        match self.route(&to) {
            Some(tx) => {
                trace!(from = %self.jid, %to, "loopback stanza");
                tx.send(stanza)
                    .await
                    .map_err(|_| RemotingError::Signaling(format!("{to} went away")))
            }
            None if stanza.attr("type") == Some("set") => {
                debug!(%to, "no route, bouncing request");
                let bounce = XmlElement::new("iq")
                    .with_attr("type", "error")
                    .with_attr("id", stanza.attr("id").unwrap_or_default())
                    .with_attr("from", to.as_str())
                    .with_attr("to", self.jid.as_str())
                    .with_child(
                        XmlElement::new("error")
                            .with_attr("type", "cancel")
                            .with_child(XmlElement::with_namespace("service-unavailable", STANZAS_NS)),
                    );
                match self.route(&self.jid) {
                    Some(tx) => tx.send(bounce).await.map_err(|_| RemotingError::ChannelClosed),
                    None => Ok(()),
                }
            }
            None => {
                debug!(%to, "no route, dropping reply");
                Ok(())
            }
        }
    }
}
