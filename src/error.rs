//! Error types for wsarena.

use std::io;

use thiserror::Error;

/// Main error type for all arena and frame codec operations.
#[derive(Debug, Error)]
pub enum WsError {
    /// I/O error from the underlying stream or sink.
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// The stream ended before a complete frame was read.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A buffer of the requested size could not be allocated.
    #[error("Allocation of {requested} bytes failed")]
    AllocationFailure {
        /// Requested buffer size in bytes.
        requested: usize,
    },

    /// Frame header and payload disagree, or a length field is out of range.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Frame sequence violates RFC 6455 (fragment ordering, control frame rules).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A text frame did not carry valid UTF-8.
    #[error("Invalid UTF-8 in text frame: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// An extension failed to transform a payload.
    #[error("Compression error: {0}")]
    Compression(String),

    /// Configuration values are inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration document could not be parsed.
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

impl From<io::Error> for WsError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            WsError::ConnectionClosed
        } else {
            WsError::Io(e)
        }
    }
}

impl From<flate2::CompressError> for WsError {
    fn from(e: flate2::CompressError) -> Self {
        WsError::Compression(e.to_string())
    }
}

impl From<flate2::DecompressError> for WsError {
    fn from(e: flate2::DecompressError) -> Self {
        WsError::Compression(e.to_string())
    }
}

/// Result type alias using WsError.
pub type Result<T> = std::result::Result<T, WsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_eof_maps_to_connection_closed() {
        let err: WsError = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert!(matches!(err, WsError::ConnectionClosed));
    }

    #[test]
    fn test_other_io_errors_are_preserved() {
        let err: WsError = io::Error::new(io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(matches!(err, WsError::Io(_)));
        assert!(err.to_string().contains("pipe"));
    }

    #[test]
    fn test_allocation_failure_message() {
        let err = WsError::AllocationFailure { requested: 42 };
        assert_eq!(err.to_string(), "Allocation of 42 bytes failed");
    }
}
