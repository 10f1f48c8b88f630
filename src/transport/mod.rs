//! Byte transports a session writes frames to

mod tcp;

pub use tcp::TcpTransport;

use crate::Result;

/// Trait for outbound byte streams
///
/// A transport only moves bytes. Framing, timeouts and state tracking live
/// in the session that owns it, so implementations stay small: TCP for real
/// connections and a recording transport for tests.
#[async_trait::async_trait]
pub trait Transport: Send + 'static {
    /// Write one complete frame
    ///
    /// Returns only after every byte of `frame` has been handed to the
    /// underlying stream. A failure may leave part of the frame written.
    async fn write_frame(&mut self, frame: &[u8]) -> Result<()>;

    /// Flush and release the connection
    async fn shutdown(&mut self) -> Result<()>;

    /// Remote address, used in logs and errors
    fn peer(&self) -> &str;
}
