//! Protocol error types.

use std::io;

/// Errors raised while reading or writing protocol messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The peer closed before sending the 0x00 identity terminator.
    #[error("connection closed before identity terminator ({received} bytes received)")]
    MissingTerminator { received: usize },

    /// The identity exceeded the configured maximum length.
    #[error("identity exceeds {limit} bytes")]
    IdentityTooLong { limit: usize },

    /// The identity is not valid UTF-8.
    #[error("identity is not valid UTF-8")]
    InvalidIdentity,

    /// The peer closed before a length field or blob was complete.
    #[error("short read on {field}: expected {expected} bytes, received {received}")]
    Truncated {
        field: &'static str,
        expected: usize,
        received: usize,
    },

    /// A declared length exceeds the frame limit.
    #[error("{field} too large: {len} bytes")]
    FrameTooLarge { field: &'static str, len: usize },

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
