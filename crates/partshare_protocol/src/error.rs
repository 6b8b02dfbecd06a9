//! Error types for protocol encoding and addressing.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding, decoding or parsing protocol values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// CBOR encoding failed.
    #[error("encode error: {0}")]
    Encode(String),

    /// CBOR decoding failed.
    #[error("decode error: {0}")]
    Decode(String),

    /// A stored object had a different kind than expected.
    #[error("kind mismatch: expected {expected}, found {found}")]
    KindMismatch {
        /// Kind the caller asked for.
        expected: String,
        /// Kind found on the object.
        found: String,
    },

    /// A partition URL could not be parsed.
    #[error("invalid partition url: {0}")]
    InvalidUrl(String),
}
