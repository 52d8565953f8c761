//! Point-to-point signaling over a TCP stream.
//!
//! Each stanza is one length-delimited frame of UTF-8 XML. A background
//! reader parses frames into [`XmlElement`]s and a background writer
//! drains the outgoing queue, so `send_stanza` never blocks on the socket.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, warn};

use crate::error::RemotingError;
use crate::signal::{INCOMING_QUEUE, SignalStrategy};
use crate::xml::XmlElement;

/// Largest stanza accepted from the wire.
pub const MAX_STANZA_SIZE: usize = 256 * 1024;

pub struct TcpSignalLink {
    jid: String,
    tx: mpsc::Sender<XmlElement>,
}

impl TcpSignalLink {
    /// Take over `stream`. Returns the link and the incoming-stanza queue;
    /// the queue closes when the peer disconnects.
    pub fn new(stream: TcpStream, local_jid: impl Into<String>) -> (Self, mpsc::Receiver<XmlElement>) {
        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(MAX_STANZA_SIZE)
            .new_codec();
        let (mut net_writer, mut net_reader) = Framed::new(stream, codec).split();

        // User -> Network
        let (user_tx, mut network_rx) = mpsc::channel::<XmlElement>(INCOMING_QUEUE);
        // Network -> User
        let (network_tx, user_rx) = mpsc::channel(INCOMING_QUEUE);

        tokio::spawn(async move {
            while let Some(stanza) = network_rx.recv().await {
                let text = match stanza.to_xml() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "unserializable stanza dropped");
                        continue;
                    }
                };
                if let Err(e) = net_writer.send(Bytes::from(text)).await {
                    debug!(error = %e, "signaling write failed");
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(frame) = net_reader.next().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!(error = %e, "signaling read failed");
                        break;
                    }
                };
                let parsed = std::str::from_utf8(&frame)
                    .map_err(|e| RemotingError::Xml(e.to_string()))
                    .and_then(XmlElement::parse);
                match parsed {
                    Ok(stanza) => {
                        if network_tx.send(stanza).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "malformed stanza ignored"),
                }
            }
        });

        (
            Self {
                jid: local_jid.into(),
                tx: user_tx,
            },
            user_rx,
        )
    }

    /// Dial `addr` and wrap the stream.
    pub async fn connect(
        addr: &str,
        local_jid: impl Into<String>,
    ) -> Result<(Self, mpsc::Receiver<XmlElement>), RemotingError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, local_jid))
    }
}

#[async_trait]
impl SignalStrategy for TcpSignalLink {
    fn local_jid(&self) -> &str {
        &self.jid
    }

    async fn send_stanza(&self, mut stanza: XmlElement) -> Result<(), RemotingError> {
        if stanza.attr("from").is_none_or(str::is_empty) {
            stanza.set_attr("from", self.jid.as_str());
        }
        self.tx
            .send(stanza)
            .await
            .map_err(|_| RemotingError::Signaling("signaling link closed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn stanzas_cross_the_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            TcpSignalLink::new(stream, "host@x/1")
        });
        let (client, mut client_rx) = TcpSignalLink::connect(&addr, "client@x/1").await.unwrap();
        let (host, mut host_rx) = accept.await.unwrap();

        client
            .send_stanza(XmlElement::new("iq").with_attr("to", "host@x/1").with_text("hi & bye"))
            .await
            .unwrap();
        let got = host_rx.recv().await.unwrap();
        assert_eq!(got.attr("from"), Some("client@x/1"));
        assert_eq!(got.text(), "hi & bye");

        host.send_stanza(XmlElement::new("iq")).await.unwrap();
        assert_eq!(client_rx.recv().await.unwrap().attr("from"), Some("host@x/1"));
    }

    #[tokio::test]
    async fn queue_closes_when_peer_leaves() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });

        let (_client, mut client_rx) = TcpSignalLink::connect(&addr, "c").await.unwrap();
        drop(accept.await.unwrap());
        assert!(client_rx.recv().await.is_none());
    }
}
