//! Error types for the protocol layer.
//!
//! Each crate in SBOX defines its own error enum. A `ProtocolError` always
//! means a message could not be turned into (or out of) one of the wire
//! records, never that a socket failed.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into JSON text).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed.
    ///
    /// Common causes: malformed JSON, missing required fields, or a
    /// payload string that is itself not valid JSON.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message parsed but does not have the expected shape, e.g. an
    /// envelope without a `type` or a `join-room` without a payload.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
