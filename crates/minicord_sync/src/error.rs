//! Error types for the sync core.

use minicord_protocol::{ChannelId, ProtocolError};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while synchronizing a channel.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or timeout failure on fetch or connect.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Malformed inbound frame or response body.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Frame codec error.
    #[error(transparent)]
    Codec(#[from] ProtocolError),

    /// The history endpoint answered with a non-success status.
    #[error("server returned {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// A send was attempted before the connection reached `Open`.
    #[error("not connected to server")]
    NotConnected,

    /// The connection was closed explicitly.
    #[error("connection closed")]
    Closed,

    /// An asynchronous result arrived for a channel that is no longer active.
    #[error("stale result for channel {channel_id}")]
    StaleResult {
        /// Channel the request was issued for.
        channel_id: ChannelId,
    },

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Http { status, .. } => *status >= 500 || *status == 429,
            SyncError::Timeout | SyncError::NotConnected => true,
            _ => false,
        }
    }

    /// Returns true if this error only reports a discarded stale result.
    pub fn is_stale(&self) -> bool {
        matches!(self, SyncError::StaleResult { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection reset").is_retryable());
        assert!(!SyncError::transport_fatal("bad endpoint").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::NotConnected.is_retryable());
        assert!(SyncError::Http {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(!SyncError::Http {
            status: 403,
            message: "forbidden".into()
        }
        .is_retryable());
        assert!(!SyncError::Closed.is_retryable());
    }

    #[test]
    fn error_display() {
        assert_eq!(SyncError::NotConnected.to_string(), "not connected to server");

        let err = SyncError::StaleResult {
            channel_id: ChannelId(7),
        };
        assert!(err.is_stale());
        assert!(err.to_string().contains('7'));

        let err: SyncError = ProtocolError::EmptyContent.into();
        assert_eq!(err.to_string(), "message content is empty");
    }
}
