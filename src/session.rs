//! Transport session lifecycle
//!
//! A [`Session`] owns exactly one outbound transport and moves through
//! `Unopened -> Open -> Closed`. It never goes back: a client that wants a
//! new connection builds a new session.
//!
//! Writes are serialized through an async mutex so concurrent senders never
//! interleave frames. Closing first cancels a token and only then takes the
//! lock, so a write stuck on a slow peer fails fast instead of holding up
//! shutdown.

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::encode_preamble;
use crate::config::ClientConfig;
use crate::transport::{TcpTransport, Transport};
use crate::{Result, StreamError};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    /// No connection was ever established.
    Unopened,
    /// Connected and accepting writes.
    Open,
    /// Closed by the caller or by a transport failure.
    Closed,
}

impl SessionStatus {
    const fn to_u8(self) -> u8 {
        match self {
            SessionStatus::Unopened => 0,
            SessionStatus::Open => 1,
            SessionStatus::Closed => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionStatus::Unopened,
            1 => SessionStatus::Open,
            _ => SessionStatus::Closed,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Unopened => "unopened",
            SessionStatus::Open => "open",
            SessionStatus::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// One outbound connection to a receiver.
pub struct Session {
    transport: Mutex<Option<Box<dyn Transport>>>,
    status: AtomicU8,
    cancel: CancellationToken,
    write_timeout: Duration,
    peer: String,
    frames_written: AtomicU64,
    bytes_written: AtomicU64,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.peer)
            .field("status", &self.status())
            .field("frames_written", &self.frames_written())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// A session that was never connected.
    ///
    /// Every write fails with [`StreamError::InvalidState`] and closing it
    /// does nothing.
    pub fn unopened() -> Self {
        Self {
            transport: Mutex::new(None),
            status: AtomicU8::new(SessionStatus::Unopened.to_u8()),
            cancel: CancellationToken::new(),
            write_timeout: Duration::ZERO,
            peer: String::new(),
            frames_written: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    /// Connect over TCP, retrying as configured.
    pub async fn open(address: &str, config: &ClientConfig) -> Result<Self> {
        let mut attempt = 0;
        let transport = loop {
            match TcpTransport::connect(address, config).await {
                Ok(transport) => break transport,
                Err(e) if attempt < config.connect_retries && e.is_retryable() => {
                    attempt += 1;
                    let delay = config.backoff_for(attempt);
                    debug!(
                        "Connect to {} failed ({}), retry {}/{} in {:?}",
                        address, e, attempt, config.connect_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        };

        Self::with_transport(Box::new(transport), config).await
    }

    /// Wrap an already connected transport.
    ///
    /// Sends the protocol preamble first when `config.handshake` is set.
    pub async fn with_transport(transport: Box<dyn Transport>, config: &ClientConfig) -> Result<Self> {
        let peer = transport.peer().to_string();
        let session = Self {
            transport: Mutex::new(Some(transport)),
            status: AtomicU8::new(SessionStatus::Open.to_u8()),
            cancel: CancellationToken::new(),
            write_timeout: config.write_timeout,
            peer,
            frames_written: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        };

        if config.handshake {
            session.send(&encode_preamble(), "handshake").await?;
            debug!("Sent protocol preamble to {}", session.peer);
        }

        info!("Session opened to {}", session.peer);
        Ok(session)
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.status() == SessionStatus::Open
    }

    /// Remote address, empty for an unopened session.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Fail with `InvalidState` unless the session is open.
    pub fn ensure_open(&self, operation: &'static str) -> Result<()> {
        match self.status() {
            SessionStatus::Open => Ok(()),
            state => Err(StreamError::invalid_state(state, operation)),
        }
    }

    /// Fail with `InvalidState` if the session is already open.
    pub(crate) fn ensure_not_open(&self, operation: &'static str) -> Result<()> {
        match self.status() {
            SessionStatus::Open => Err(StreamError::invalid_state(SessionStatus::Open, operation)),
            _ => Ok(()),
        }
    }

    /// Write one complete frame.
    ///
    /// The write holds the session lock for its whole duration and is bounded
    /// by the write timeout. An I/O failure or timeout closes the session,
    /// since part of the frame may already be on the wire.
    pub async fn write(&self, frame: &[u8]) -> Result<()> {
        self.send(frame, "write").await?;
        self.frames_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(frame.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    async fn send(&self, bytes: &[u8], operation: &'static str) -> Result<()> {
        self.ensure_open(operation)?;

        let mut slot = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(StreamError::invalid_state(SessionStatus::Closed, operation));
            }
            slot = self.transport.lock() => slot,
        };

        let Some(transport) = slot.as_mut() else {
            return Err(StreamError::invalid_state(self.status(), operation));
        };

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                Err(StreamError::invalid_state(SessionStatus::Closed, operation))
            }
            written = tokio::time::timeout(self.write_timeout, transport.write_frame(bytes)) => {
                match written {
                    Err(_) => Err(StreamError::timeout(operation, self.write_timeout)),
                    Ok(result) => result,
                }
            }
        };

        if let Some(e) = result.as_ref().err().filter(|e| e.closes_session()) {
            warn!("Closing session to {} after failed {}: {}", self.peer, operation, e);
            self.status.store(SessionStatus::Closed.to_u8(), Ordering::Release);
            self.cancel.cancel();
            *slot = None;
        }

        result
    }

    /// Release the connection.
    ///
    /// Idempotent. Does nothing on an unopened session. Any in-flight write
    /// is cancelled and fails with `InvalidState`. The returned error only
    /// reports a failed transport shutdown; the session is closed either way.
    pub async fn close(&self) -> Result<()> {
        if self.status() == SessionStatus::Unopened {
            return Ok(());
        }

        self.status.store(SessionStatus::Closed.to_u8(), Ordering::Release);
        self.cancel.cancel();

        let Some(mut transport) = self.transport.lock().await.take() else {
            return Ok(());
        };

        let shutdown = tokio::time::timeout(self.write_timeout, transport.shutdown()).await;
        info!(
            "Session to {} closed ({} frames, {} bytes)",
            self.peer,
            self.frames_written(),
            self.bytes_written()
        );

        match shutdown {
            Err(_) => Err(StreamError::timeout("shutdown", self.write_timeout)),
            Ok(result) => result,
        }
    }
}
