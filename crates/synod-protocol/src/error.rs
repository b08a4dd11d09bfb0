//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while encoding or decoding records.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The record is not valid JSON for the expected type.
    #[error("malformed record: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The framed record exceeds size limits.
    #[error("record too large: {size} bytes (max {max})")]
    TooLarge {
        /// The actual size.
        size: usize,
        /// The maximum allowed size.
        max: usize,
    },

    /// Framing failed on the underlying stream.
    #[error("framing error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
