//! Error types for the protocol layer.

/// Errors that can occur while encoding or decoding live-channel messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, missing fields, or an
    /// unknown message type.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message decoded fine but breaks a protocol rule, e.g. a live
    /// session that doesn't start with `Handshake`.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
