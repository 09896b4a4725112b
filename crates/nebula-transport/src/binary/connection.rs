use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio_util::codec::Framed;

use super::framing::{Frame, VelocystreamCodec, WireVersion};

type PendingTable = Mutex<HashMap<u64, oneshot::Sender<Frame>>>;

/// One multiplexed connection to an endpoint. A single connection carries
/// many in-flight requests; responses may arrive out of order and are
/// correlated back to their caller by `message_id`.
pub struct Connection {
    writer: AsyncMutex<futures::stream::SplitSink<Framed<TcpStream, VelocystreamCodec>, Frame>>,
    pending: std::sync::Arc<PendingTable>,
    next_message_id: AtomicU64,
    reader_task: tokio::task::JoinHandle<()>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("failed to connect to {address}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("connection closed before a response was received")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Connection {
    pub async fn dial(address: &str, version: WireVersion) -> Result<Self, ConnectionError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|source| ConnectionError::Connect {
                address: address.to_string(),
                source,
            })?;
        stream.set_nodelay(true).ok();

        let framed = Framed::new(stream, VelocystreamCodec::new(version));
        let (writer, mut reader) = framed.split();

        let pending: std::sync::Arc<PendingTable> = Default::default();
        let pending_for_task = pending.clone();

        let reader_task = tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(frame) => {
                        let sender = pending_for_task
                            .lock()
                            .expect("pending table lock poisoned")
                            .remove(&frame.message_id);
                        if let Some(sender) = sender {
                            let _ = sender.send(frame);
                        }
                        // No waiter: the caller already gave up (cancelled);
                        // dropping the frame is correct.
                    }
                    Err(_) => break,
                }
            }
            // The socket closed or errored: every still-pending caller gets
            // woken by the sender being dropped, which they observe as a
            // `RecvError` and translate into `ConnectionError::Closed`.
            pending_for_task
                .lock()
                .expect("pending table lock poisoned")
                .clear();
        });

        Ok(Self {
            writer: AsyncMutex::new(writer),
            pending,
            next_message_id: AtomicU64::new(1),
            reader_task,
        })
    }

    /// Sends `header`/`payload` as a new request frame and awaits its
    /// correlated response frame.
    pub async fn call(&self, header: Bytes, payload: Bytes) -> Result<Frame, ConnectionError> {
        let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending table lock poisoned")
            .insert(message_id, tx);

        let frame = Frame {
            message_id,
            header,
            payload,
        };

        {
            let mut writer = self.writer.lock().await;
            if let Err(err) = writer.send(frame).await {
                self.pending
                    .lock()
                    .expect("pending table lock poisoned")
                    .remove(&message_id);
                return Err(ConnectionError::Io(err));
            }
        }

        rx.await.map_err(|_| ConnectionError::Closed)
    }

    /// Number of requests awaiting a correlated response.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().expect("pending table lock poisoned").len()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}
