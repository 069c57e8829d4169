//! Session bootstrap payloads
//!
//! Before any feed can be shown, the study backend validates the participant
//! and answers with the ordered feeds, their asset URLs, layout data and the
//! randomized answer-option orderings. The network call itself belongs to the
//! host; this module defines the payloads and turns the call's result into a
//! [`BootstrapOutcome`].

use crate::error::SurveyError;
use crate::snapshot::{FeedCatalog, FeedSnapshot};
use crate::types::{Post, PostId, RatingDimension, SnapshotId};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::time::Duration;

/// Identifiers sent to the validation endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapRequest {
    #[serde(rename = "PROLIFIC_PID")]
    pub prolific_pid: String,
    #[serde(rename = "STUDY_ID")]
    pub study_id: String,
    #[serde(rename = "SESSION_ID")]
    pub session_id: String,
}

impl BootstrapRequest {
    pub fn new(
        prolific_pid: impl Into<String>,
        study_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Result<Self, SurveyError> {
        let request = Self {
            prolific_pid: prolific_pid.into().trim().to_string(),
            study_id: study_id.into().trim().to_string(),
            session_id: session_id.into().trim().to_string(),
        };
        if request.prolific_pid.is_empty() {
            return Err(SurveyError::BootstrapInvalid(
                "participant id is empty".to_string(),
            ));
        }
        Ok(request)
    }
}

/// Randomized orderings of answer options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionOrder {
    pub likert: Vec<String>,
    pub selection_multiple_choice: Vec<String>,
    pub selected_multiple_choice: Vec<String>,
    pub non_selected_multiple_choice: Vec<String>,
}

impl OptionOrder {
    /// Rating dimensions in the assigned order.
    ///
    /// Unknown names are skipped and dimensions the backend left out are
    /// appended in their default order, so all three are always present.
    pub fn likert_dimensions(&self) -> Vec<RatingDimension> {
        let mut order: Vec<RatingDimension> = Vec::with_capacity(3);
        for name in &self.likert {
            if let Some(dimension) = RatingDimension::from_server_name(name) {
                if !order.contains(&dimension) {
                    order.push(dimension);
                }
            }
        }
        for dimension in RatingDimension::ALL {
            if !order.contains(&dimension) {
                order.push(dimension);
            }
        }
        order
    }
}

/// Response of the validation endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapResponse {
    pub valid: bool,
    #[serde(default)]
    pub feeds: Vec<SnapshotId>,
    #[serde(default, rename = "feedURLs")]
    pub feed_urls: Vec<String>,
    #[serde(default)]
    pub feed_data: BTreeMap<SnapshotId, Vec<Post>>,
    #[serde(default, rename = "postURLs")]
    pub post_urls: BTreeMap<SnapshotId, BTreeMap<PostId, String>>,
    #[serde(default)]
    pub option_order: OptionOrder,
    #[serde(default)]
    pub completion_code: Option<String>,
    #[serde(default, rename = "completionURL")]
    pub completion_url: Option<String>,
}

impl BootstrapResponse {
    pub fn from_json(json: &str) -> Result<Self, SurveyError> {
        serde_json::from_str(json).map_err(|e| {
            SurveyError::ParseError(format!("Failed to parse bootstrap response: {}", e))
        })
    }

    /// Check the response is marked valid and lists at least one unique feed
    pub fn check(&self) -> Result<(), SurveyError> {
        if !self.valid {
            return Err(SurveyError::BootstrapInvalid(
                "backend marked participant invalid".to_string(),
            ));
        }
        if self.feeds.is_empty() {
            return Err(SurveyError::BootstrapInvalid(
                "response lists no feeds".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.feeds.iter().find(|f| !seen.insert(f.as_str())) {
            return Err(SurveyError::BootstrapInvalid(format!(
                "feed {} listed twice",
                dup
            )));
        }
        Ok(())
    }

    /// Build the snapshot catalog.
    ///
    /// A feed without usable layout data is recorded as unavailable rather
    /// than failing the whole bootstrap; entering it later reports the reason.
    pub fn catalog(&self) -> FeedCatalog {
        let mut catalog = FeedCatalog::new();
        for (index, feed) in self.feeds.iter().enumerate() {
            let Some(posts) = self.feed_data.get(feed) else {
                warn!("bootstrap missing layout feed={}", feed);
                catalog.mark_failed(feed.clone(), "no layout data in bootstrap response");
                continue;
            };

            match FeedSnapshot::new(feed.clone(), posts.clone()) {
                Ok(snapshot) => {
                    let post_urls = self.post_urls.get(feed).cloned().unwrap_or_default();
                    catalog.insert(
                        snapshot.with_assets(self.feed_urls.get(index).cloned(), post_urls),
                    );
                }
                Err(e) => {
                    warn!("bootstrap layout rejected feed={} error={}", feed, e);
                    catalog.mark_failed(feed.clone(), e.to_string());
                }
            }
        }
        catalog
    }
}

/// Result of the bootstrap call as seen by the session
#[derive(Debug, Clone, PartialEq)]
pub enum BootstrapOutcome {
    Valid(BootstrapResponse),
    Invalid(String),
    TimedOut,
}

impl BootstrapOutcome {
    /// Classify a parsed response
    pub fn from_response(response: BootstrapResponse) -> Self {
        match response.check() {
            Ok(()) => BootstrapOutcome::Valid(response),
            Err(e) => BootstrapOutcome::Invalid(e.to_string()),
        }
    }
}

/// Await a bootstrap call, giving up after `limit`
pub async fn await_bootstrap<F>(call: F, limit: Duration) -> BootstrapOutcome
where
    F: Future<Output = Result<BootstrapResponse, SurveyError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(response)) => BootstrapOutcome::from_response(response),
        Ok(Err(e)) => BootstrapOutcome::Invalid(e.to_string()),
        Err(_) => BootstrapOutcome::TimedOut,
    }
}
