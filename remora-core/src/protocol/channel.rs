//! Typed message channels over an authenticated channel stream.
//!
//! Each channel gets a writer task and a reader task around a
//! [`MessageCodec`]-framed socket, joined to the owner by mpsc queues.
//! Dropping the [`ChannelGuard`] aborts both tasks and closes the socket.

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use crate::error::RemotingError;
use crate::protocol::codec::MessageCodec;
use crate::protocol::transport::ChannelStream;

/// Depth of the per-channel send and receive queues.
pub const CHANNEL_QUEUE: usize = 64;

struct Outgoing<T> {
    message: T,
    written: Option<oneshot::Sender<()>>,
}

// ── ChannelWriter ────────────────────────────────────────────────

/// Sending half of a channel. Cheap to clone.
pub struct ChannelWriter<T> {
    name: String,
    tx: mpsc::Sender<Outgoing<T>>,
}

impl<T> Clone for ChannelWriter<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<T> std::fmt::Debug for ChannelWriter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelWriter")
            .field("name", &self.name)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<T> ChannelWriter<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Queue a message.
    pub async fn send(&self, message: T) -> Result<(), RemotingError> {
        self.tx
            .send(Outgoing {
                message,
                written: None,
            })
            .await?;
        Ok(())
    }

    /// Queue a message and wait until it has been written to the socket.
    pub async fn send_and_wait(&self, message: T) -> Result<(), RemotingError> {
        let (written, done) = oneshot::channel();
        self.tx
            .send(Outgoing {
                message,
                written: Some(written),
            })
            .await?;
        done.await?;
        Ok(())
    }
}

// ── ChannelGuard ─────────────────────────────────────────────────

/// Owns the I/O tasks of one channel.
#[derive(Debug)]
pub struct ChannelGuard {
    name: String,
    tasks: [JoinHandle<()>; 2],
}

impl ChannelGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Split an authenticated stream into a typed writer and a typed inbound
/// queue. The inbound queue ends when the peer closes the channel or sends
/// something undecodable.
pub fn spawn_channel<W, R>(stream: ChannelStream) -> (ChannelWriter<W>, mpsc::Receiver<R>, ChannelGuard)
where
    W: Serialize + Send + 'static,
    R: DeserializeOwned + Send + 'static,
{
    let name = stream.name().to_string();
    let (read_half, write_half) = stream.into_inner().into_split();
    let mut net_writer = FramedWrite::new(write_half, MessageCodec::<W>::new());
    let mut net_reader = FramedRead::new(read_half, MessageCodec::<R>::new());

    // Owner -> network
    let (user_tx, mut network_rx) = mpsc::channel::<Outgoing<W>>(CHANNEL_QUEUE);
    // Network -> owner
    let (network_tx, user_rx) = mpsc::channel(CHANNEL_QUEUE);

    let writer_name = name.clone();
    let writer = tokio::spawn(async move {
        while let Some(Outgoing { message, written }) = network_rx.recv().await {
            if let Err(e) = net_writer.send(message).await {
                warn!(channel = %writer_name, error = %e, "channel write failed");
                break;
            }
            if let Some(written) = written {
                let _ = written.send(());
            }
        }
    });

    let reader_name = name.clone();
    let reader = tokio::spawn(async move {
        while let Some(result) = net_reader.next().await {
            match result {
                Ok(message) => {
                    if network_tx.send(message).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(channel = %reader_name, error = %e, "channel read failed");
                    break;
                }
            }
        }
        debug!(channel = %reader_name, "channel reader finished");
    });

    (
        ChannelWriter {
            name: name.clone(),
            tx: user_tx,
        },
        user_rx,
        ChannelGuard {
            name,
            tasks: [writer, reader],
        },
    )
}
