//! Per-connection state and the push-channel writer task.
//!
//! Each open reverse channel gets one dedicated writer task fed by an mpsc
//! channel. All frames for a connection funnel through that single task, so
//! writes are serialized and frame order on the stream matches send order.
//!
//! ```text
//! dispatch task 1 ─┐
//! supervisors     ─┼─► mpsc::Sender<Message> ─► writer task ─► HTTP body sink
//! callbacks       ─┘
//! ```

use std::future::Future;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{Result, RpcError};
use crate::protocol::{encode_frame, Message, LENGTH_PREFIX_SIZE};

/// Handle for pushing messages down one connection's reverse channel.
///
/// Cheaply cloneable; clones are held by dispatch tasks, the supervisors and
/// any [`RemoteCallback`](super::RemoteCallback) handed to application code.
#[derive(Clone)]
pub struct PushHandle {
    tx: mpsc::Sender<Message>,
}

impl PushHandle {
    /// Queue a message for the writer task.
    pub async fn send(&self, message: Message) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| RpcError::ChannelClosed)
    }

    /// Queue a message without waiting for channel capacity.
    pub fn try_send(&self, message: Message) -> Result<()> {
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                RpcError::Protocol("push channel full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => RpcError::ChannelClosed,
        })
    }
}

/// One live client connection owned by the session's connection table.
pub(crate) struct Connection {
    /// Sender side of the push channel.
    pub push: PushHandle,
    /// Proxy ids created for this connection; their registry entries are
    /// purged en masse on teardown.
    pub proxies: Vec<u64>,
    /// Connection is torn down by the sweeper once this lapses.
    pub expires_at: Instant,
    /// Writer task, aborted on teardown.
    pub writer_task: JoinHandle<()>,
}

/// Spawn the writer task for a reverse channel.
///
/// The task encodes each queued message as one frame and writes it to the
/// sink. A frame whose body exceeds `max_frame_size` is dropped with an
/// error log; the peer's decoder would refuse it anyway. A write failure is
/// the transport-level disconnect signal: the task stops and runs `on_closed`
/// so the session can reclaim the connection. Closing the channel (dropping
/// all senders) ends the task cleanly without invoking `on_closed`.
pub(crate) fn spawn_push_writer<W, F, Fut>(
    mut sink: W,
    capacity: usize,
    max_frame_size: u32,
    on_closed: F,
) -> (PushHandle, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let (tx, mut rx) = mpsc::channel::<Message>(capacity);

    let task = tokio::spawn(async move {
        let mut failed = false;

        while let Some(message) = rx.recv().await {
            let bytes = match encode_frame(&message) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!("failed to encode push frame: {}", e);
                    continue;
                }
            };
            let body_len = bytes.len() - LENGTH_PREFIX_SIZE;
            if body_len > max_frame_size as usize {
                tracing::error!(
                    "dropping push frame of {} bytes (maximum {})",
                    body_len,
                    max_frame_size
                );
                continue;
            }

            if let Err(e) = sink.write_all(&bytes).await {
                tracing::debug!("reverse channel write failed: {}", e);
                failed = true;
                break;
            }
            if let Err(e) = sink.flush().await {
                tracing::debug!("reverse channel flush failed: {}", e);
                failed = true;
                break;
            }
        }

        if failed {
            on_closed().await;
        }
    });

    (PushHandle { tx }, task)
}
