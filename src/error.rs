//! Error types for the WebSocket frame engine.
//!
//! Every fallible operation returns [`Error`]. The variants fall into five
//! classes: protocol violations, cancellation, I/O failure, malformed
//! compressed input and local codec failure. Everything except cancellation
//! and API misuse is fatal to the connection that produced it.

use thiserror::Error;

use crate::message::CloseCode;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during WebSocket operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Invalid frame structure or header.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Protocol violation detected.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The peer sent something the connection is configured to refuse.
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    /// Frame size exceeds configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: u64,
        /// Maximum allowed size.
        max: usize,
    },

    /// Message size exceeds configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Too many fragments in a single message.
    #[error("Too many fragments: {count} (max: {max})")]
    TooManyFragments {
        /// Actual fragment count.
        count: usize,
        /// Maximum allowed fragments.
        max: usize,
    },

    /// Connection has been closed, optionally with the close status code.
    #[error("Connection closed: {0:?}")]
    ConnectionClosed(Option<u16>),

    /// The caller's cancellation token fired or its deadline passed.
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// A received message body could not be decompressed.
    #[error("Compression error: {0}")]
    Compression(String),

    /// Our own compressor failed. Not the peer's fault.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Invalid close code.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// Invalid configuration value.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Control frame fragmented (RFC violation).
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload too large (>125 bytes).
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(u64),

    /// Unmasked client frame (security violation).
    #[error("Client frame must be masked")]
    UnmaskedClientFrame,

    /// Masked server frame (security violation).
    #[error("Server frame must not be masked")]
    MaskedServerFrame,

    /// Reserved bits set without extension.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// Incomplete frame data.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },
}

impl Error {
    /// Returns `true` if this error poisons the connection it came from.
    ///
    /// Cancellation is local to the call that observed it, and API misuse is
    /// rejected before anything touches the wire.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::Cancelled | Error::InvalidCloseCode(_) | Error::InvalidConfig(_)
        )
    }

    /// Returns `true` for errors caused by the peer breaking RFC 6455 / RFC 7692.
    #[must_use]
    pub const fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidFrame(_)
                | Error::ProtocolViolation(_)
                | Error::ReservedOpcode(_)
                | Error::FragmentedControlFrame
                | Error::ControlFrameTooLarge(_)
                | Error::UnmaskedClientFrame
                | Error::MaskedServerFrame
                | Error::ReservedBitsSet
                | Error::Compression(_)
        )
    }

    /// Status code to put in the close frame sent when this error tears the
    /// connection down.
    ///
    /// `None` means no close frame can be sent, either because the stream is
    /// broken or because the error is not fatal.
    #[must_use]
    pub const fn close_code(&self) -> Option<CloseCode> {
        match self {
            Error::FrameTooLarge { .. }
            | Error::MessageTooLarge { .. }
            | Error::TooManyFragments { .. } => Some(CloseCode::MessageTooBig),
            Error::PolicyViolation(_) => Some(CloseCode::PolicyViolation),
            Error::Internal(_) => Some(CloseCode::InternalError),
            e if e.is_protocol_error() => Some(CloseCode::ProtocolError),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<flate2::CompressError> for Error {
    fn from(err: flate2::CompressError) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<flate2::DecompressError> for Error {
    fn from(err: flate2::DecompressError) -> Self {
        Error::Compression(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::FrameTooLarge {
            size: 20_000_000,
            max: 16_000_000,
        };
        assert_eq!(
            err.to_string(),
            "Frame too large: 20000000 bytes (max: 16000000)"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let ws_err: Error = io_err.into();
        assert!(matches!(ws_err, Error::Io(_)));
        assert!(ws_err.is_fatal());
        assert_eq!(ws_err.close_code(), None);
    }

    #[test]
    fn test_error_clone() {
        let err = Error::ReservedBitsSet;
        let cloned = err.clone();
        assert_eq!(err, cloned);
    }

    #[test]
    fn test_cancelled_is_not_fatal() {
        assert!(!Error::Cancelled.is_fatal());
        assert_eq!(Error::Cancelled.close_code(), None);
    }

    #[test]
    fn test_close_codes() {
        assert_eq!(
            Error::UnmaskedClientFrame.close_code(),
            Some(CloseCode::ProtocolError)
        );
        assert_eq!(
            Error::Compression("bad block".into()).close_code(),
            Some(CloseCode::ProtocolError)
        );
        assert_eq!(
            Error::MessageTooLarge { size: 10, max: 5 }.close_code(),
            Some(CloseCode::MessageTooBig)
        );
        assert_eq!(
            Error::PolicyViolation("data".into()).close_code(),
            Some(CloseCode::PolicyViolation)
        );
        assert_eq!(
            Error::Internal("deflate stream error".into()).close_code(),
            Some(CloseCode::InternalError)
        );
        assert_eq!(Error::ConnectionClosed(Some(1000)).close_code(), None);
    }
}
