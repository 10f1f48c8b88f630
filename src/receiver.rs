//! Ingestion endpoint
//!
//! [`Receiver`] is the remote side of the protocol: it accepts connections,
//! decodes frames from each peer on its own task and publishes every message
//! on a bounded channel. Plot storage and rendering are left to whoever
//! consumes the stream.
//!
//! A peer that sends malformed data or a mismatched preamble is dropped;
//! other peers keep streaming.

use futures::{Stream, StreamExt};
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::codec::FrameCodec;
use crate::config::ReceiverConfig;
use crate::types::Message;
use crate::{Result, StreamError};

/// A decoded message and the peer that sent it.
#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub peer: SocketAddr,
    pub message: Message,
}

/// Listening endpoint yielding decoded messages as a [`Stream`].
///
/// ```rust,no_run
/// use futures::StreamExt;
/// use plotstream::config::ReceiverConfig;
/// use plotstream::receiver::Receiver;
///
/// # #[tokio::main]
/// # async fn main() -> plotstream::Result<()> {
/// let mut receiver = Receiver::bind(ReceiverConfig::new("127.0.0.1:0")).await?;
/// println!("listening on {}", receiver.local_addr());
/// while let Some(received) = receiver.next().await {
///     for (t, value) in received.message.observations() {
///         println!("{} {} {}", received.message.name(), t, value);
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct Receiver {
    local_addr: SocketAddr,
    messages: ReceiverStream<Received>,
    cancel: CancellationToken,
    accept: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("local_addr", &self.local_addr)
            .field("stopped", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Receiver {
    /// Bind the listener and start accepting peers.
    pub async fn bind(config: ReceiverConfig) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind(&config.bind).await.map_err(|e| {
            StreamError::connection_failed_with_source(&config.bind, format!("bind failed: {}", e), Box::new(e))
        })?;
        let local_addr = listener.local_addr().map_err(|e| StreamError::io("local_addr", e))?;

        let (tx, rx) = mpsc::channel(config.channel_capacity);
        let cancel = CancellationToken::new();
        let accept = tokio::spawn(accept_loop(listener, tx, cancel.clone(), config.max_frame_len));

        info!("Receiver listening on {}", local_addr);
        Ok(Self { local_addr, messages: ReceiverStream::new(rx), cancel, accept: Some(accept) })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Next decoded message, or `None` once stopped and drained.
    pub async fn recv(&mut self) -> Option<Received> {
        self.messages.next().await
    }

    /// Stop accepting, disconnect every peer and wait for their tasks.
    ///
    /// Messages decoded before the stop can still be read afterwards.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        let Some(accept) = self.accept.take() else {
            return;
        };
        if let Err(e) = accept.await {
            warn!("Receiver accept task ended abnormally: {}", e);
        }
    }
}

impl Stream for Receiver {
    type Item = Received;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Received>> {
        Pin::new(&mut self.messages).poll_next(cx)
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    tx: mpsc::Sender<Received>,
    cancel: CancellationToken,
    max_frame_len: usize,
) {
    let mut peers = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    info!("Accepted peer {}", peer);
                    peers.spawn(read_peer(socket, peer, tx.clone(), cancel.clone(), max_frame_len));
                }
                Err(e) => warn!("Accept failed: {}", e),
            },
            Some(joined) = peers.join_next(), if !peers.is_empty() => {
                if let Err(e) = joined {
                    warn!("Peer task ended abnormally: {}", e);
                }
            }
        }
    }

    drop(tx);
    while peers.join_next().await.is_some() {}
    info!("Receiver stopped");
}

async fn read_peer(
    socket: TcpStream,
    peer: SocketAddr,
    tx: mpsc::Sender<Received>,
    cancel: CancellationToken,
    max_frame_len: usize,
) {
    let mut frames = FramedRead::new(socket, FrameCodec::with_max_frame_len(max_frame_len));
    let mut count = 0u64;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = frames.next() => next,
        };

        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                error!("Dropping peer {} after {} frames: {}", peer, count, e);
                break;
            }
            None => break,
        };

        count += 1;
        trace!("Peer {} sent {:?} for '{}'", peer, message.kind(), message.name());

        let delivered = tokio::select! {
            _ = cancel.cancelled() => break,
            sent = tx.send(Received { peer, message }) => sent.is_ok(),
        };
        if !delivered {
            debug!("Message consumer went away, closing peer {}", peer);
            break;
        }
    }

    debug!("Peer {} disconnected after {} frames", peer, count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_preamble, encode_sample, encode_text};
    use crate::test_utils::init_tracing;
    use crate::types::{Sample, Timestamp};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    async fn receiver() -> Receiver {
        init_tracing();
        Receiver::bind(ReceiverConfig::new("127.0.0.1:0")).await.unwrap()
    }

    async fn next(receiver: &mut Receiver) -> Received {
        tokio::time::timeout(Duration::from_secs(5), receiver.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("receiver closed")
    }

    #[tokio::test]
    async fn decodes_frames_split_across_writes() {
        let mut receiver = receiver().await;
        let mut socket = TcpStream::connect(receiver.local_addr()).await.unwrap();

        let frame = encode_sample("temp", Timestamp::from(2.0), 21.5).unwrap();
        socket.write_all(&encode_preamble()).await.unwrap();
        socket.write_all(&frame[..7]).await.unwrap();
        socket.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        socket.write_all(&frame[7..]).await.unwrap();

        let received = next(&mut receiver).await;
        assert_eq!(received.peer, socket.local_addr().unwrap());
        assert_eq!(received.message, Message::from(Sample::new("temp", 2.0, 21.5)));
    }

    #[tokio::test]
    async fn bad_peer_does_not_affect_others() {
        let mut receiver = receiver().await;

        let mut bad = TcpStream::connect(receiver.local_addr()).await.unwrap();
        bad.write_all(&[0x7f, 0, 0, 0, 0]).await.unwrap();

        let mut good = TcpStream::connect(receiver.local_addr()).await.unwrap();
        good.write_all(&encode_text("log", Timestamp::EPOCH, "still here").unwrap()).await.unwrap();

        let received = next(&mut receiver).await;
        assert_eq!(received.message.name(), "log");
    }

    #[tokio::test]
    async fn stop_ends_the_stream() {
        let mut receiver = receiver().await;
        let mut socket = TcpStream::connect(receiver.local_addr()).await.unwrap();
        socket.write_all(&encode_sample("a", Timestamp::EPOCH, 1.0).unwrap()).await.unwrap();
        next(&mut receiver).await;

        receiver.stop().await;
        let end = tokio::time::timeout(Duration::from_secs(5), receiver.recv()).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn bind_conflict_is_a_connection_error() {
        let first = receiver().await;
        let err = Receiver::bind(ReceiverConfig::new(first.local_addr().to_string())).await.unwrap_err();
        assert!(matches!(err, StreamError::Connection { .. }));
    }
}
