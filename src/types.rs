//! Survey data types
//!
//! This module defines the phases, layout geometry, ratings, interaction log
//! entries and per-snapshot records that flow through a survey session, plus
//! the finalized document handed to submission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identifier of a captured feed snapshot
pub type SnapshotId = String;

/// Identifier of a post within a snapshot
pub type PostId = String;

/// Lowest value on the Likert scale
pub const LIKERT_MIN: u8 = 1;

/// Highest value on the Likert scale
pub const LIKERT_MAX: u8 = 7;

/// Stage of the session workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Consent,
    Screening,
    Selection,
    Rating,
    ExitQuestionnaire,
    Done,
}

impl Phase {
    /// Whether the phase is scoped to a single feed snapshot
    pub fn is_snapshot_phase(&self) -> bool {
        matches!(self, Phase::Selection | Phase::Rating)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Consent => "consent",
            Phase::Screening => "screening",
            Phase::Selection => "selection",
            Phase::Rating => "rating",
            Phase::ExitQuestionnaire => "exit_questionnaire",
            Phase::Done => "done",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pixel bounding box of a post inside a feed screenshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    /// Bottom edge of the box
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Vertical center, where overlay controls are anchored
    pub fn center_y(&self) -> f64 {
        self.y + self.height / 2.0
    }
}

/// A post entry of a feed layout document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    /// Post identifier (`uuid` in bootstrap payloads)
    #[serde(alias = "uuid")]
    pub id: PostId,
    /// Position of the post within the screenshot
    #[serde(flatten)]
    pub bounds: BoundingBox,
}

/// One of the three Likert dimensions a post is rated on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingDimension {
    Relevance,
    Trust,
    Quality,
}

impl RatingDimension {
    pub const ALL: [RatingDimension; 3] = [
        RatingDimension::Relevance,
        RatingDimension::Trust,
        RatingDimension::Quality,
    ];

    /// Map a dimension name as sent by the study backend.
    ///
    /// The backend names trust `trustworthiness` and quality `content_quality`.
    pub fn from_server_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "relevance" => Some(RatingDimension::Relevance),
            "trust" | "trustworthiness" | "manipulation" => Some(RatingDimension::Trust),
            "quality" | "content_quality" => Some(RatingDimension::Quality),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RatingDimension::Relevance => "relevance",
            RatingDimension::Trust => "trust",
            RatingDimension::Quality => "quality",
        }
    }
}

impl fmt::Display for RatingDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Three-dimensional rating of a post. Zero means "not answered yet".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub relevance: u8,
    pub trust: u8,
    pub quality: u8,
}

impl Rating {
    pub fn new(relevance: u8, trust: u8, quality: u8) -> Self {
        Self {
            relevance,
            trust,
            quality,
        }
    }

    pub fn get(&self, dimension: RatingDimension) -> u8 {
        match dimension {
            RatingDimension::Relevance => self.relevance,
            RatingDimension::Trust => self.trust,
            RatingDimension::Quality => self.quality,
        }
    }

    pub fn set(&mut self, dimension: RatingDimension, value: u8) {
        match dimension {
            RatingDimension::Relevance => self.relevance = value,
            RatingDimension::Trust => self.trust = value,
            RatingDimension::Quality => self.quality = value,
        }
    }

    /// Every dimension holds a value on the Likert scale
    pub fn is_complete(&self) -> bool {
        RatingDimension::ALL
            .iter()
            .all(|d| (LIKERT_MIN..=LIKERT_MAX).contains(&self.get(*d)))
    }

    /// Every dimension equals `value`
    pub fn all_equal(&self, value: u8) -> bool {
        RatingDimension::ALL.iter().all(|d| self.get(*d) == value)
    }
}

/// Discrete actions recorded during a selection phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionAction {
    Start,
    Select,
    Unselect,
    TimeExpired,
    End,
}

/// Discrete actions recorded during a rating phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RatingAction {
    Open,
    Edit,
    Rate,
    Submit,
    Close,
    End,
}

/// Extra payload of a `rate` log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingChange {
    pub dimension: RatingDimension,
    pub value: u8,
}

/// A timestamped log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry<A> {
    pub timestamp: DateTime<Utc>,
    pub action: A,
    /// Post the action applied to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post: Option<PostId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<RatingChange>,
}

/// Outcome of one selection phase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionRecord {
    pub selected_posts: Vec<PostId>,
    /// Non-selected posts sampled for comparison ratings
    pub non_selected_posts: Vec<PostId>,
    pub selection_start: Option<DateTime<Utc>>,
    pub selection_end: Option<DateTime<Utc>>,
    /// Seconds between start and end
    pub selection_duration: Option<f64>,
    pub time_expired: bool,
    pub selection_logs: Vec<LogEntry<SelectionAction>>,
}

/// Outcome of one rating phase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingRecord {
    pub ratings: BTreeMap<PostId, Rating>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attention_check_post: Option<PostId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attention_check_answer: Option<Rating>,
    pub rating_start: Option<DateTime<Utc>>,
    pub rating_end: Option<DateTime<Utc>>,
    pub rating_duration: Option<f64>,
    pub rating_logs: Vec<LogEntry<RatingAction>>,
}

/// A completed phase record to merge into the aggregate
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseRecord {
    Selection(SelectionRecord),
    Rating(RatingRecord),
}

/// Combined answers for one snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    #[serde(flatten)]
    pub selection: Option<SelectionRecord>,
    #[serde(flatten)]
    pub rating: Option<RatingRecord>,
}

/// Answers given in the screening phase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenerAnswers {
    /// Subreddits in the order they were entered
    pub subreddits: Vec<String>,
    pub interests: BTreeSet<String>,
    #[serde(default)]
    pub attention_check: Option<u8>,
}

impl ScreenerAnswers {
    /// Add a subreddit, stripping an `r/` prefix.
    ///
    /// Returns false for empty input or a case-insensitive duplicate.
    pub fn add_subreddit(&mut self, raw: &str) -> bool {
        let trimmed = raw.trim();
        let name = trimmed.strip_prefix("r/").unwrap_or(trimmed).trim();
        if name.is_empty() {
            return false;
        }
        if self
            .subreddits
            .iter()
            .any(|s| s.eq_ignore_ascii_case(name))
        {
            return false;
        }
        self.subreddits.push(name.to_string());
        true
    }

    pub fn remove_subreddit(&mut self, index: usize) -> Option<String> {
        if index < self.subreddits.len() {
            Some(self.subreddits.remove(index))
        } else {
            None
        }
    }

    pub fn toggle_interest(&mut self, interest: &str, checked: bool) {
        if checked {
            self.interests.insert(interest.to_string());
        } else {
            self.interests.remove(interest);
        }
    }
}

/// Screening answers together with their timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenerRecord {
    pub answers: ScreenerAnswers,
    pub screener_start: DateTime<Utc>,
    pub screener_end: DateTime<Utc>,
    pub screener_duration: f64,
}

/// A post cited by the exit questionnaire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostReference {
    pub feed_uuid: SnapshotId,
    pub post_uuid: PostId,
}

/// Exit questionnaire key holding the numeric posting likelihood
pub const POST_LIKELIHOOD_FIELD: &str = "post_likelihood";

/// Responses to the exit questionnaire
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExitAnswers {
    /// Free-text and single-choice responses keyed by question
    pub responses: BTreeMap<String, String>,
    pub selected_post_example: Option<PostReference>,
    pub non_selected_post_example: Option<PostReference>,
}

impl ExitAnswers {
    /// The posting likelihood, when answered with a value on the Likert scale
    pub fn post_likelihood(&self) -> Option<u8> {
        self.responses
            .get(POST_LIKELIHOOD_FIELD)
            .and_then(|v| v.trim().parse::<u8>().ok())
            .filter(|v| (LIKERT_MIN..=LIKERT_MAX).contains(v))
    }
}

/// Exit answers together with their timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitRecord {
    pub answers: ExitAnswers,
    pub exit_start: DateTime<Utc>,
    pub exit_end: DateTime<Utc>,
    pub exit_duration: f64,
}

/// Submission outcome surfaced to the participant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    #[default]
    Unsubmitted,
    Pending,
    Submitted,
    Error,
}

impl SubmissionStatus {
    pub fn message(&self) -> &'static str {
        match self {
            SubmissionStatus::Unsubmitted => "Your data has not been submitted yet.",
            SubmissionStatus::Pending => "Your data is being submitted.",
            SubmissionStatus::Submitted => "Your data has been successfully submitted.",
            SubmissionStatus::Error => {
                "There was an error submitting your data. Please reload the page to try again."
            }
        }
    }
}

/// Top-level metadata of a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub participant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub study_id: Option<String>,
    pub consent_timestamp: Option<DateTime<Utc>>,
    pub exit_timestamp: Option<DateTime<Utc>>,
    /// Seconds from consent to the end of the exit questionnaire
    pub total_duration: Option<f64>,
    pub submission_status: SubmissionStatus,
}

/// Immutable export of a finished session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyDocument {
    #[serde(flatten)]
    pub metadata: SessionMetadata,
    /// Snapshot identifiers in presentation order
    pub feeds: Vec<SnapshotId>,
    pub screener: Option<ScreenerRecord>,
    pub answers: BTreeMap<SnapshotId, SnapshotEntry>,
    pub exit: Option<ExitRecord>,
    pub finalized_at: DateTime<Utc>,
}

/// Seconds elapsed between two timestamps
pub fn duration_secs(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}
