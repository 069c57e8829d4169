//! Session configuration
//!
//! Every knob has a default matching the deployed study; a JSON file may
//! override any subset of them.

use crate::error::SurveyError;
use crate::logger::DEFAULT_SELECTION_BUDGET_SECS;
use crate::types::POST_LIKELIHOOD_FIELD;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default timeout for the final submission call, in seconds
pub const DEFAULT_SUBMISSION_TIMEOUT_SECS: u64 = 60;

/// Exit questionnaire keys that must hold a non-blank answer
pub const DEFAULT_REQUIRED_EXIT_FIELDS: [&str; 6] = [
    "selection_explained",
    "selected_post_explained",
    "non_selected_post_explained",
    "age",
    "gender",
    "education",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds available to browse and select in each feed
    pub selection_budget_secs: u32,
    pub min_selected_posts: usize,
    pub max_selected_posts: usize,
    /// Number of non-selected posts drawn for comparison ratings
    pub non_selected_sample_size: usize,
    /// Zero-based feed index that carries an attention-check post
    pub attention_check_feed: Option<usize>,
    /// Value the attention check instructs participants to pick
    pub attention_check_value: u8,
    pub submission_timeout_secs: u64,
    pub bootstrap_timeout_secs: u64,
    /// Seed for sampling; `None` draws from entropy
    pub rng_seed: Option<u64>,
    pub required_exit_fields: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            selection_budget_secs: DEFAULT_SELECTION_BUDGET_SECS,
            min_selected_posts: 1,
            max_selected_posts: 3,
            non_selected_sample_size: 3,
            attention_check_feed: Some(1),
            attention_check_value: 2,
            submission_timeout_secs: DEFAULT_SUBMISSION_TIMEOUT_SECS,
            bootstrap_timeout_secs: DEFAULT_SUBMISSION_TIMEOUT_SECS,
            rng_seed: None,
            required_exit_fields: DEFAULT_REQUIRED_EXIT_FIELDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl SessionConfig {
    pub fn from_json(json: &str) -> Result<Self, SurveyError> {
        let config: SessionConfig = serde_json::from_str(json)
            .map_err(|e| SurveyError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, SurveyError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            SurveyError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Reject settings that would make a phase impossible to complete
    pub fn validate(&self) -> Result<(), SurveyError> {
        if self.selection_budget_secs == 0 {
            return Err(SurveyError::ConfigError(
                "selection_budget_secs must be greater than zero".to_string(),
            ));
        }
        if self.min_selected_posts == 0 {
            return Err(SurveyError::ConfigError(
                "min_selected_posts must be at least one".to_string(),
            ));
        }
        if self.max_selected_posts < self.min_selected_posts {
            return Err(SurveyError::ConfigError(format!(
                "max_selected_posts ({}) must be at least min_selected_posts ({})",
                self.max_selected_posts, self.min_selected_posts
            )));
        }
        if self.submission_timeout_secs == 0 || self.bootstrap_timeout_secs == 0 {
            return Err(SurveyError::ConfigError(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        if !(crate::types::LIKERT_MIN..=crate::types::LIKERT_MAX)
            .contains(&self.attention_check_value)
        {
            return Err(SurveyError::ConfigError(format!(
                "attention_check_value {} is off the Likert scale",
                self.attention_check_value
            )));
        }
        if self
            .required_exit_fields
            .iter()
            .any(|f| f == POST_LIKELIHOOD_FIELD)
        {
            return Err(SurveyError::ConfigError(format!(
                "{} is checked separately and cannot be a required text field",
                POST_LIKELIHOOD_FIELD
            )));
        }
        Ok(())
    }

    pub fn submission_timeout(&self) -> Duration {
        Duration::from_secs(self.submission_timeout_secs)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.bootstrap_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_study() {
        let config = SessionConfig::default();
        assert_eq!(config.selection_budget_secs, 120);
        assert_eq!(config.max_selected_posts, 3);
        assert_eq!(config.non_selected_sample_size, 3);
        assert_eq!(config.submission_timeout(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_override() {
        let config =
            SessionConfig::from_json(r#"{"selection_budget_secs": 30, "rng_seed": 7}"#).unwrap();
        assert_eq!(config.selection_budget_secs, 30);
        assert_eq!(config.rng_seed, Some(7));
        assert_eq!(config.max_selected_posts, 3);
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let result = SessionConfig::from_json(r#"{"min_selected_posts": 4}"#);
        assert!(matches!(result, Err(SurveyError::ConfigError(_))));
    }

    #[test]
    fn test_rejects_zero_minimum_selection() {
        let result = SessionConfig::from_json(r#"{"min_selected_posts": 0}"#);
        assert!(
            matches!(result, Err(SurveyError::ConfigError(msg)) if msg.contains("min_selected_posts"))
        );
    }

    #[test]
    fn test_rejects_zero_budget() {
        let result = SessionConfig::from_json(r#"{"selection_budget_secs": 0}"#);
        assert!(matches!(result, Err(SurveyError::ConfigError(_))));
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(SessionConfig::from_json("{not json").is_err());
    }
}
