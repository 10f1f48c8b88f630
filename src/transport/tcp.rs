//! TCP transport

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, trace};

use super::Transport;
use crate::config::ClientConfig;
use crate::{Result, StreamError};

/// A connected TCP stream to a receiver.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    peer: String,
}

impl TcpTransport {
    /// Make one connection attempt, bounded by `connect_timeout`.
    ///
    /// Refusal, unreachable hosts and resolution failures all surface as
    /// [`StreamError::Connection`]; an expired bound is a
    /// [`StreamError::Timeout`].
    pub async fn connect(address: &str, config: &ClientConfig) -> Result<Self> {
        let attempt = tokio::time::timeout(config.connect_timeout, TcpStream::connect(address)).await;
        let stream = match attempt {
            Err(_) => return Err(StreamError::timeout("connect", config.connect_timeout)),
            Ok(Err(e)) => {
                return Err(StreamError::connection_failed_with_source(address, e.to_string(), Box::new(e)));
            }
            Ok(Ok(stream)) => stream,
        };

        if let Err(e) = stream.set_nodelay(config.nodelay) {
            debug!("Could not set TCP_NODELAY on {}: {}", address, e);
        }

        let peer = stream.peer_addr().map(|addr| addr.to_string()).unwrap_or_else(|_| address.to_string());
        debug!("TCP connection established to {}", peer);
        Ok(Self { stream, peer })
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.stream.write_all(frame).await.map_err(|e| StreamError::io("write", e))?;
        trace!("Wrote {} bytes to {}", frame.len(), self.peer);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await.map_err(|e| StreamError::io("shutdown", e))
    }

    fn peer(&self) -> &str {
        &self.peer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn writes_reach_the_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let accept = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.unwrap();
            received
        });

        let mut transport = TcpTransport::connect(&address, &ClientConfig::default()).await.unwrap();
        assert_eq!(transport.peer(), address);
        transport.write_frame(b"abc").await.unwrap();
        transport.write_frame(b"def").await.unwrap();
        transport.shutdown().await.unwrap();

        assert_eq!(accept.await.unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn refused_connect_is_a_connection_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let config = ClientConfig::default().with_connect_timeout(Duration::from_secs(2));
        let err = TcpTransport::connect(&address, &config).await.unwrap_err();
        match err {
            StreamError::Connection { address: reported, .. } => assert_eq!(reported, address),
            other => panic!("expected connection error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn connect_past_timeout_is_a_timeout_error() {
        // A listener with a backlog of one stops answering once its accept
        // queue is full, leaving later connects hanging.
        let socket = tokio::net::TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let listener = socket.listen(1).unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let config = ClientConfig::default().with_connect_timeout(Duration::from_millis(100));
        let mut queued = Vec::new();
        for _ in 0..16 {
            match TcpTransport::connect(&address, &config).await {
                Ok(transport) => queued.push(transport),
                Err(err) => {
                    assert!(
                        matches!(err, StreamError::Timeout { operation: "connect", .. }),
                        "expected connect timeout, got {:?}",
                        err
                    );
                    assert!(err.is_retryable());
                    return;
                }
            }
        }
        eprintln!("skipping: listen backlog never filled after {} connects", queued.len());
    }

    #[tokio::test]
    async fn unresolvable_host_is_a_connection_error() {
        let err = TcpTransport::connect("not a host", &ClientConfig::default()).await.unwrap_err();
        assert!(matches!(err, StreamError::Connection { .. }));
    }
}
