//! Error types for the undo/redo history.

use thiserror::Error;

/// Errors raised by history operations.
///
/// All of them are usage errors: the caller asked for something the current
/// state does not allow.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Undo or redo was requested while a batch was open
    #[error("{action} is not allowed during a batch")]
    NotAllowedInBatch { action: &'static str },

    /// `resume` was called without a matching `pause`
    #[error("History is not paused")]
    NotPaused,
}

impl HistoryError {
    /// Check if this error is a usage error (invalid API call by the caller).
    pub fn is_usage_error(&self) -> bool {
        true
    }

    /// Check if this error comes from an operation attempted inside a batch
    pub fn is_batch_error(&self) -> bool {
        matches!(self, HistoryError::NotAllowedInBatch { .. })
    }
}

// Conversion from HistoryError to the main Error type
impl From<HistoryError> for crate::Error {
    fn from(err: HistoryError) -> Self {
        crate::Error::History(err)
    }
}
