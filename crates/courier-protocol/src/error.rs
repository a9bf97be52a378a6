//! Error types for the protocol layer.

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization of an outgoing frame failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// The incoming bytes are not a valid frame: malformed JSON, a missing
    /// field, or an unknown request type.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame parsed but is not acceptable here, e.g. a client sending a
    /// `Response` payload.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
