//! Error types for the wire protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding frames.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The frame is not valid JSON or does not match the message schema.
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    /// Outbound content was empty after trimming.
    #[error("message content is empty")]
    EmptyContent,

    /// A message identifier could not be parsed.
    #[error("invalid message id {0:?}")]
    InvalidId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            ProtocolError::EmptyContent.to_string(),
            "message content is empty"
        );
        assert!(ProtocolError::InvalidId(" ".into())
            .to_string()
            .contains("invalid message id"));
    }
}
