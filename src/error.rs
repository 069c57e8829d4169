//! Error types for the trending survey session

use thiserror::Error;

/// Errors that can occur while driving a survey session
#[derive(Debug, Error)]
pub enum SurveyError {
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Snapshot unavailable: {0}")]
    SnapshotUnavailable(String),

    #[error("Out of order commit: {0}")]
    OutOfOrderCommit(String),

    #[error("Submission timed out after {0} seconds")]
    SubmissionTimeout(u64),

    #[error("Submission failed: {0}")]
    SubmissionFailed(String),

    #[error("Session bootstrap rejected: {0}")]
    BootstrapInvalid(String),

    #[error("Selection limit reached: {0}")]
    SelectionLimit(String),

    #[error("Selection closed: {0}")]
    SelectionClosed(String),

    #[error("Unknown post: {0}")]
    UnknownPost(String),

    #[error("Invalid rating: {0}")]
    InvalidRating(String),

    #[error("Session not finalized: {0}")]
    NotFinalized(String),

    #[error("Failed to parse payload: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

impl SurveyError {
    /// Whether the session can continue after this error.
    ///
    /// An out of order commit means the caller wired the session incorrectly;
    /// everything else leaves the session in a usable state.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SurveyError::OutOfOrderCommit(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_order_commit_is_fatal() {
        assert!(!SurveyError::OutOfOrderCommit("snap-B".into()).is_recoverable());
        assert!(SurveyError::InvalidTransition("selection".into()).is_recoverable());
        assert!(SurveyError::SubmissionTimeout(60).is_recoverable());
        assert!(SurveyError::SnapshotUnavailable("snap-A".into()).is_recoverable());
    }

    #[test]
    fn test_timeout_message() {
        let err = SurveyError::SubmissionTimeout(60);
        assert_eq!(err.to_string(), "Submission timed out after 60 seconds");
    }
}
