//! Relay error taxonomy
//!
//! Every failure the relay core can observe falls into one of these kinds.
//! The kind decides retry behaviour and whether the checkpoint may advance
//! (see [`crate::retry`]).

use thiserror::Error;

/// Errors produced by the relay core
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    /// Network/RPC failure on the read side. Always retryable.
    #[error("transport error: {0}")]
    Transport(String),

    /// Log record does not match the expected event schema.
    /// Indicates a wrong contract address or ABI version, never transient.
    #[error("decode error: {0}")]
    Decode(String),

    /// Destination call was not accepted (or its confirmation could not be
    /// observed). Retryable with backoff.
    #[error("submission error: {0}")]
    Submission(String),

    /// Destination call reverted, either when mined or during pre-flight.
    #[error("execution reverted: {reason}")]
    Execution { reason: String },

    /// Checkpoint store failure or compare-and-set conflict
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Configuration-level failure. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),
}

impl RelayError {
    /// Short label used in log fields and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Transport(_) => "transport",
            RelayError::Decode(_) => "decode",
            RelayError::Submission(_) => "submission",
            RelayError::Execution { .. } => "execution",
            RelayError::Checkpoint(_) => "checkpoint",
            RelayError::Config(_) => "config",
        }
    }

    /// Whether retrying the same operation later can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayError::Transport(_) | RelayError::Submission(_) | RelayError::Checkpoint(_)
        )
    }

    pub fn execution(reason: impl Into<String>) -> Self {
        RelayError::Execution {
            reason: reason.into(),
        }
    }
}

pub type RelayResult<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels() {
        assert_eq!(RelayError::Transport("x".into()).kind(), "transport");
        assert_eq!(RelayError::Decode("x".into()).kind(), "decode");
        assert_eq!(RelayError::Submission("x".into()).kind(), "submission");
        assert_eq!(RelayError::execution("x").kind(), "execution");
        assert_eq!(RelayError::Checkpoint("x".into()).kind(), "checkpoint");
        assert_eq!(RelayError::Config("x".into()).kind(), "config");
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(RelayError::Transport("timeout".into()).is_retryable());
        assert!(RelayError::Submission("connection reset".into()).is_retryable());
        assert!(!RelayError::Decode("bad topic".into()).is_retryable());
        assert!(!RelayError::execution("nonce already processed").is_retryable());
        assert!(!RelayError::Config("missing".into()).is_retryable());
    }

    #[test]
    fn test_display_includes_reason() {
        let err = RelayError::execution("insufficient liquidity");
        assert_eq!(err.to_string(), "execution reverted: insufficient liquidity");
    }
}
