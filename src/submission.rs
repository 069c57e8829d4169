//! Submission of finished sessions
//!
//! A finished session is finalized into a [`SurveyDocument`] and handed to a
//! [`Submitter`]. The call is bounded by the configured submission timeout;
//! a timeout or failure leaves the session in the `error` status so the host
//! can offer a retry. Nothing is retried automatically.

use crate::error::SurveyError;
use crate::session::SurveySession;
use crate::types::{Phase, SubmissionStatus, SurveyDocument};
use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What the study backend returns for an accepted submission
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    #[serde(default)]
    pub completion_code: Option<String>,
    #[serde(default, rename = "completionURL")]
    pub completion_url: Option<String>,
}

/// Destination for finalized documents
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(&self, document: &SurveyDocument) -> Result<SubmissionReceipt, SurveyError>;
}

/// Writes the document as pretty-printed JSON to a file
#[derive(Debug, Clone)]
pub struct FileSubmitter {
    path: PathBuf,
}

impl FileSubmitter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Submitter for FileSubmitter {
    async fn submit(&self, document: &SurveyDocument) -> Result<SubmissionReceipt, SurveyError> {
        let body = serde_json::to_vec_pretty(document)?;
        tokio::fs::write(&self.path, body).await.map_err(|e| {
            SurveyError::SubmissionFailed(format!("{}: {}", self.path.display(), e))
        })?;
        Ok(SubmissionReceipt::default())
    }
}

/// Finalize a finished session and submit it.
///
/// The receipt falls back to the completion code and URL delivered at
/// bootstrap when the submitter does not return its own. The exclusive borrow
/// rules out a concurrent attempt, so a `Pending` status found here belongs to
/// an attempt whose future was dropped and is retried.
pub async fn submit_session(
    session: &mut SurveySession,
    submitter: &dyn Submitter,
) -> Result<SubmissionReceipt, SurveyError> {
    if session.phase() != Phase::Done {
        return Err(SurveyError::NotFinalized(format!(
            "cannot submit during {}",
            session.phase()
        )));
    }
    match session.submission_status() {
        SubmissionStatus::Unsubmitted | SubmissionStatus::Error => {}
        SubmissionStatus::Pending => {
            warn!(
                "resuming abandoned submission session={}",
                session.session_id()
            );
        }
        status => {
            return Err(SurveyError::SubmissionFailed(status.message().to_string()));
        }
    }

    session.set_submission_status(SubmissionStatus::Pending);
    let document = match session.finalize() {
        Ok(document) => document,
        Err(e) => {
            session.set_submission_status(SubmissionStatus::Error);
            return Err(e);
        }
    };

    let limit = session.config().submission_timeout();
    match tokio::time::timeout(limit, submitter.submit(&document)).await {
        Ok(Ok(mut receipt)) => {
            if receipt.completion_code.is_none() {
                receipt.completion_code = session.completion_code().map(String::from);
            }
            if receipt.completion_url.is_none() {
                receipt.completion_url = session.completion_url().map(String::from);
            }
            session.set_submission_status(SubmissionStatus::Submitted);
            info!(
                "session submitted session={} code={}",
                session.session_id(),
                receipt.completion_code.as_deref().unwrap_or("-")
            );
            Ok(receipt)
        }
        Ok(Err(e)) => {
            warn!("submission failed session={} error={}", session.session_id(), e);
            session.set_submission_status(SubmissionStatus::Error);
            Err(match e {
                SurveyError::SubmissionFailed(_) => e,
                other => SurveyError::SubmissionFailed(other.to_string()),
            })
        }
        Err(_) => {
            warn!(
                "submission timed out session={} after_secs={}",
                session.session_id(),
                limit.as_secs()
            );
            session.set_submission_status(SubmissionStatus::Error);
            Err(SurveyError::SubmissionTimeout(limit.as_secs()))
        }
    }
}
