use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::PredictionStatus;

/// Error code recorded when a processor fails without a classified error.
pub const PROCESSING_ERROR: &str = "PROCESSING_ERROR";
/// Error code recorded when a processor panics.
pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";
/// Error code recorded when a prediction exceeds the configured timeout.
pub const PREDICTION_TIMEOUT: &str = "PREDICTION_TIMEOUT";

/// Errors returned synchronously by store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Prediction not found: {0}")]
    NotFound(String),

    #[error("Queue is full ({max_queue_size} predictions waiting), try again later")]
    CapacityExceeded { max_queue_size: usize },

    #[error("Prediction {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: PredictionStatus,
        to: PredictionStatus,
    },

    #[error("Prediction {0} is already processing")]
    ProcessorBusy(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl StoreError {
    /// Stable machine-readable code for tool responses.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "PREDICTION_NOT_FOUND",
            StoreError::CapacityExceeded { .. } => "QUEUE_FULL",
            StoreError::InvalidTransition { .. } => "INVALID_TRANSITION",
            StoreError::ProcessorBusy(_) => "PROCESSOR_BUSY",
            StoreError::InvalidRequest(_) => "INVALID_REQUEST",
        }
    }

    /// Whether the caller may reasonably try the same call again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::CapacityExceeded { .. })
    }
}

/// Classified failure recorded on a prediction.
///
/// Processors can return this (wrapped in `anyhow::Error`) to control the
/// code and retryability that callers see. Anything else is recorded as a
/// non-retryable [`PROCESSING_ERROR`].
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct PredictionError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl PredictionError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable,
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::new(PROCESSING_ERROR, message, false)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(UNKNOWN_ERROR, message, false)
    }

    pub fn timeout(after_ms: u128) -> Self {
        Self::new(
            PREDICTION_TIMEOUT,
            format!("Prediction did not finish within {}ms", after_ms),
            true,
        )
    }

    /// Classify a processor error.
    ///
    /// A [`PredictionError`] anywhere in the chain passes through unchanged.
    pub fn classify(err: &anyhow::Error) -> Self {
        match err.chain().find_map(|e| e.downcast_ref::<PredictionError>()) {
            Some(classified) => classified.clone(),
            None => Self::processing(format!("{:#}", err)),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_passes_through_domain_error() {
        let err = anyhow::Error::new(PredictionError::new("RATE_LIMITED", "slow down", true));
        let classified = PredictionError::classify(&err);
        assert_eq!(classified.code, "RATE_LIMITED");
        assert_eq!(classified.message, "slow down");
        assert!(classified.retryable);
    }

    #[test]
    fn test_classify_finds_domain_error_under_context() {
        let err = anyhow::Error::new(PredictionError::new("UPSTREAM_5XX", "bad gateway", true))
            .context("calling upstream");
        let classified = PredictionError::classify(&err);
        assert_eq!(classified.code, "UPSTREAM_5XX");
    }

    #[test]
    fn test_classify_generic_error() {
        let err = anyhow::anyhow!("connection reset");
        let classified = PredictionError::classify(&err);
        assert_eq!(classified.code, PROCESSING_ERROR);
        assert_eq!(classified.message, "connection reset");
        assert!(!classified.retryable);
    }

    #[test]
    fn test_store_error_retryability() {
        assert!(StoreError::CapacityExceeded { max_queue_size: 3 }.is_retryable());
        assert!(!StoreError::NotFound("x".into()).is_retryable());
        assert_eq!(StoreError::NotFound("x".into()).code(), "PREDICTION_NOT_FOUND");
    }
}
