//! Error types for the protocol layer.

/// Errors that can occur while encoding or decoding push frames.
///
/// A decode failure on an inbound frame is a protocol anomaly, not a
/// transport fault: the adapter logs it and keeps the connection open.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization of an outbound frame failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// An inbound frame was not valid JSON or did not match any frame type.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame decoded but violates a protocol rule (e.g. an empty
    /// `key` frame).
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
