//! Error types for sample streaming.
//!
//! Every fallible operation in plotstream returns [`StreamError`]. The variants
//! follow the life of a frame: argument validation, encoding, the session state
//! machine, the socket, and finally decoding on the receiving side.
//!
//! ## Error Categories
//!
//! - **Connection Errors**: The remote refused, was unreachable, or did not resolve
//! - **Timeouts**: A connect or write exceeded its configured bound
//! - **I/O Errors**: The transport failed mid-session (broken pipe, reset)
//! - **State Errors**: An operation was attempted on an unopened or closed session
//! - **Codec Errors**: Malformed data on either side of the wire, or a protocol mismatch
//! - **Argument Errors**: Rejected at the call site before anything is written
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use plotstream::StreamError;
//!
//! let error = StreamError::connection_failed("127.0.0.1:12345", "connection refused");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

use crate::session::SessionStatus;

/// Result type alias for streaming operations.
pub type Result<T, E = StreamError> = std::result::Result<T, E>;

/// Main error type for streaming operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StreamError {
    #[error("Failed to connect to {address}: {reason}")]
    Connection {
        address: String,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("{operation} timed out after {duration:?}")]
    Timeout { operation: &'static str, duration: Duration },

    #[error("Transport failure during {operation}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot {operation}: session is {state}")]
    InvalidState { state: SessionStatus, operation: &'static str },

    #[error("Encoding failed: {reason}")]
    Encoding { reason: String },

    #[error("Decoding failed: {reason}")]
    Decoding { reason: DecodeFailure },

    #[error("Protocol version mismatch: expected {expected}, found {found}")]
    ProtocolVersion { expected: u16, found: u16 },

    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("Invalid configuration: {reason}")]
    Config {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Why a byte sequence could not be turned back into a message.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum DecodeFailure {
    #[error("truncated input (need {needed} bytes, have {available})")]
    Truncated { needed: usize, available: usize },

    #[error("unknown message tag {0:#04x}")]
    UnknownTag(u8),

    #[error("unknown profile event kind {0:#04x}")]
    UnknownProfileKind(u8),

    #[error("length field {length} exceeds maximum {max}")]
    LengthOutOfRange { length: u32, max: u32 },

    #[error("{count} trailing bytes after frame")]
    TrailingBytes { count: usize },

    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    #[error("channel name is empty")]
    EmptyName,

    #[error("sampled batch interval {dt} is not strictly positive")]
    InvalidInterval { dt: f64 },

    #[error("frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    #[error("connection preamble has bad magic")]
    BadMagic,
}

impl StreamError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::Connection { .. } => true,
            StreamError::Timeout { .. } => true,
            StreamError::Io { .. } => true,
            StreamError::InvalidState { .. } => false,
            StreamError::Encoding { .. } => false,
            StreamError::Decoding { .. } => false,
            StreamError::ProtocolVersion { .. } => false,
            StreamError::InvalidArgument { .. } => false,
            StreamError::Config { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            StreamError::Connection { .. } => vec![
                "Ensure the plotting process is running and listening",
                "Check the host:port address",
                "Increase connect_retries for slow-starting receivers",
            ],
            StreamError::Timeout { .. } => vec![
                "Increase the connect or write timeout",
                "Check that the receiver is draining its socket",
                "Enable batching to reduce per-frame overhead",
            ],
            StreamError::Io { .. } => vec![
                "Reconnect the client",
                "Check whether the receiver was restarted",
            ],
            StreamError::InvalidState { .. } => vec![
                "Call connect before sending",
                "Do not send after disconnect",
                "Use reconnect after a transport failure",
            ],
            StreamError::Encoding { .. } => vec![
                "Split large batches into smaller ones",
                "Shorten channel names or text payloads",
            ],
            StreamError::Decoding { .. } => vec![
                "Verify the peer speaks the plotstream wire format",
                "Check for partial writes after a timeout",
            ],
            StreamError::ProtocolVersion { .. } => vec![
                "Upgrade the client and receiver to matching versions",
                "Disable the handshake when talking to legacy receivers",
            ],
            StreamError::InvalidArgument { .. } => vec![
                "Check channel names are non-empty",
                "Use a strictly positive sample interval",
            ],
            StreamError::Config { .. } => vec![
                "Check configuration key names and value ranges",
                "Durations are given in milliseconds",
            ],
        }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(address: impl Into<String>, reason: impl Into<String>) -> Self {
        StreamError::Connection { address: address.into(), reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        address: impl Into<String>,
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        StreamError::Connection { address: address.into(), reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for timeouts.
    pub fn timeout(operation: &'static str, duration: Duration) -> Self {
        StreamError::Timeout { operation, duration }
    }

    /// Helper constructor for transport failures.
    pub fn io(operation: &'static str, source: std::io::Error) -> Self {
        StreamError::Io { operation, source }
    }

    /// Helper constructor for state machine violations.
    pub fn invalid_state(state: SessionStatus, operation: &'static str) -> Self {
        StreamError::InvalidState { state, operation }
    }

    /// Helper constructor for encoding errors.
    pub fn encoding(reason: impl Into<String>) -> Self {
        StreamError::Encoding { reason: reason.into() }
    }

    /// Helper constructor for decoding errors.
    pub fn decoding(reason: DecodeFailure) -> Self {
        StreamError::Decoding { reason }
    }

    /// Helper constructor for rejected arguments.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        StreamError::InvalidArgument { reason: reason.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        StreamError::Config { reason: reason.into(), source: None }
    }

    /// True when decoding stopped only because more bytes are needed.
    pub fn is_truncated(&self) -> bool {
        matches!(self, StreamError::Decoding { reason: DecodeFailure::Truncated { .. } })
    }

    /// True for failures that leave the session unusable.
    pub(crate) fn closes_session(&self) -> bool {
        matches!(self, StreamError::Io { .. } | StreamError::Timeout { .. })
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Io { operation: "transport", source: err }
    }
}

impl From<DecodeFailure> for StreamError {
    fn from(reason: DecodeFailure) -> Self {
        StreamError::Decoding { reason }
    }
}

impl From<serde_yaml_ng::Error> for StreamError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        StreamError::Config { reason: err.to_string(), source: Some(Box::new(err)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn error_messages_carry_their_context(
            address in "[a-z0-9.]{1,20}:[0-9]{1,5}",
            reason in ".*",
            byte in any::<u8>(),
            expected in 1u16..10u16,
            found in 1u16..10u16,
          ) {
            let connection = StreamError::connection_failed(address.clone(), reason.clone());
            let msg = connection.to_string();
            prop_assert!(msg.contains(&address));
            prop_assert!(msg.contains(&reason));

            let tag = StreamError::decoding(DecodeFailure::UnknownTag(byte));
            let tag_hex = format!("{:#04x}", byte);
            prop_assert!(tag.to_string().contains(&tag_hex));

            let version = StreamError::ProtocolVersion { expected, found };
            let version_msg = version.to_string();
            prop_assert!(version_msg.contains(&expected.to_string()));
            prop_assert!(version_msg.contains(&found.to_string()));
          }

          #[test]
          fn io_conversion_preserves_source(message in ".*") {
            let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, message.clone());
            let converted: StreamError = io_err.into();
            match converted {
              StreamError::Io { source, .. } => {
                prop_assert_eq!(source.kind(), std::io::ErrorKind::BrokenPipe);
                prop_assert_eq!(source.to_string(), message);
              }
              _ => prop_assert!(false, "Expected Io error from io::Error conversion"),
            }
          }
        }
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<StreamError>();

        let error = StreamError::invalid_argument("dt must be positive");
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn retry_classification() {
        assert!(StreamError::connection_failed("127.0.0.1:1", "refused").is_retryable());
        assert!(StreamError::timeout("connect", Duration::from_secs(5)).is_retryable());
        assert!(!StreamError::invalid_state(SessionStatus::Closed, "write").is_retryable());
        assert!(!StreamError::ProtocolVersion { expected: 1, found: 2 }.is_retryable());

        for error in [
            StreamError::connection_failed("a:1", "x"),
            StreamError::encoding("too long"),
            StreamError::decoding(DecodeFailure::EmptyName),
            StreamError::config("bad"),
        ] {
            let suggestions = error.recovery_suggestions();
            assert!(!suggestions.is_empty());
            assert!(suggestions.iter().all(|s| s.len() > 5));
        }
    }

    #[test]
    fn state_error_names_operation_and_state() {
        let err = StreamError::invalid_state(SessionStatus::Closed, "send_sample");
        assert_eq!(err.to_string(), "Cannot send_sample: session is closed");
    }

    #[test]
    fn truncation_is_distinguishable() {
        let truncated = StreamError::decoding(DecodeFailure::Truncated { needed: 8, available: 3 });
        assert!(truncated.is_truncated());
        assert!(!StreamError::decoding(DecodeFailure::UnknownTag(0x7f)).is_truncated());
    }

    #[test]
    fn only_transport_failures_close_the_session() {
        let io = StreamError::io("write", std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(io.closes_session());
        assert!(StreamError::timeout("write", Duration::from_millis(1)).closes_session());
        assert!(!StreamError::encoding("x").closes_session());
    }
}
