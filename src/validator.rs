//! Phase completion predicates
//!
//! Pure functions deciding whether the in-progress answers of a phase allow
//! the participant to continue. They are cheap enough to call on every input
//! event for UI enablement; the session calls them again before accepting an
//! advance.
//!
//! [`check_document`] audits a finalized document against the same rules.

use crate::config::SessionConfig;
use crate::types::{
    LogEntry, PostId, Rating, RatingAction, ScreenerAnswers, SelectionAction, SurveyDocument,
    LIKERT_MAX, LIKERT_MIN, POST_LIKELIHOOD_FIELD,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Minimum number of selected posts to leave a selection phase
pub const MIN_SELECTED_POSTS: usize = 1;

/// Maximum number of posts a participant may select per feed
pub const MAX_SELECTED_POSTS: usize = 3;

/// True iff between one and three posts are selected
pub fn can_close_selection(selected: &BTreeSet<PostId>) -> bool {
    can_close_selection_within(selected.len(), MIN_SELECTED_POSTS, MAX_SELECTED_POSTS)
}

pub fn can_close_selection_within(selected: usize, min: usize, max: usize) -> bool {
    (min..=max).contains(&selected)
}

/// True iff every required post is rated and every rating is complete
pub fn can_close_rating(ratings: &BTreeMap<PostId, Rating>, required: &BTreeSet<PostId>) -> bool {
    required.iter().all(|id| ratings.contains_key(id))
        && ratings.values().all(|r| r.is_complete())
}

/// True iff every required field is answered and the likelihood is set
pub fn can_submit_exit(fields: &BTreeMap<String, String>) -> bool {
    let required: Vec<String> = SessionConfig::default().required_exit_fields;
    can_submit_exit_with(fields, &required)
}

pub fn can_submit_exit_with(fields: &BTreeMap<String, String>, required: &[String]) -> bool {
    let answered = required.iter().all(|key| {
        fields
            .get(key)
            .map(|value| !value.trim().is_empty())
            .unwrap_or(false)
    });

    let likelihood_set = fields
        .get(POST_LIKELIHOOD_FIELD)
        .and_then(|v| v.trim().parse::<u8>().ok())
        .map(|v| (LIKERT_MIN..=LIKERT_MAX).contains(&v))
        .unwrap_or(false);

    answered && likelihood_set
}

/// True iff at least one interest is chosen and the attention check is answered
pub fn can_close_screener(answers: &ScreenerAnswers) -> bool {
    !answers.interests.is_empty() && answers.attention_check.is_some()
}

/// A rule violated by a finalized document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentIssue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed: Option<String>,
    pub message: String,
}

impl DocumentIssue {
    fn session(message: impl Into<String>) -> Self {
        Self {
            feed: None,
            message: message.into(),
        }
    }

    fn feed(feed: &str, message: impl Into<String>) -> Self {
        Self {
            feed: Some(feed.to_string()),
            message: message.into(),
        }
    }
}

/// Audit a document for the invariants a completed session guarantees
pub fn check_document(doc: &SurveyDocument, config: &SessionConfig) -> Vec<DocumentIssue> {
    let mut issues = Vec::new();

    if doc
        .metadata
        .participant_id
        .as_deref()
        .map(|p| p.trim().is_empty())
        .unwrap_or(true)
    {
        issues.push(DocumentIssue::session("missing participant id"));
    }
    if doc.metadata.consent_timestamp.is_none() {
        issues.push(DocumentIssue::session("missing consent timestamp"));
    }
    match &doc.screener {
        Some(screener) if !can_close_screener(&screener.answers) => {
            issues.push(DocumentIssue::session("screener answers incomplete"));
        }
        None => issues.push(DocumentIssue::session("missing screener answers")),
        _ => {}
    }
    match &doc.exit {
        Some(exit) => {
            if !can_submit_exit_with(&exit.answers.responses, &config.required_exit_fields) {
                issues.push(DocumentIssue::session("exit questionnaire incomplete"));
            }
        }
        None => issues.push(DocumentIssue::session("missing exit questionnaire")),
    }

    for feed in &doc.feeds {
        let Some(entry) = doc.answers.get(feed) else {
            issues.push(DocumentIssue::feed(feed, "no answers recorded"));
            continue;
        };

        let Some(selection) = &entry.selection else {
            issues.push(DocumentIssue::feed(feed, "missing selection record"));
            continue;
        };

        if !can_close_selection_within(
            selection.selected_posts.len(),
            config.min_selected_posts,
            config.max_selected_posts,
        ) {
            issues.push(DocumentIssue::feed(
                feed,
                format!(
                    "{} posts selected, expected {}..={}",
                    selection.selected_posts.len(),
                    config.min_selected_posts,
                    config.max_selected_posts
                ),
            ));
        }
        check_log(feed, "selection", &selection.selection_logs, SelectionAction::End, &mut issues);

        let Some(rating) = &entry.rating else {
            issues.push(DocumentIssue::feed(feed, "missing rating record"));
            continue;
        };

        let mut required: BTreeSet<PostId> = selection
            .selected_posts
            .iter()
            .chain(selection.non_selected_posts.iter())
            .cloned()
            .collect();
        let mut ratings = rating.ratings.clone();
        if let Some(post) = &rating.attention_check_post {
            required.insert(post.clone());
            if let Some(answer) = rating.attention_check_answer {
                ratings.insert(post.clone(), answer);
            }
        }
        if !can_close_rating(&ratings, &required) {
            issues.push(DocumentIssue::feed(feed, "ratings incomplete"));
        }
        check_log(feed, "rating", &rating.rating_logs, RatingAction::End, &mut issues);
    }

    for key in doc.answers.keys() {
        if !doc.feeds.contains(key) {
            issues.push(DocumentIssue::feed(key, "answers for a feed not in the session"));
        }
    }

    issues
}

fn check_log<A: PartialEq + Copy>(
    feed: &str,
    label: &str,
    log: &[LogEntry<A>],
    end: A,
    issues: &mut Vec<DocumentIssue>,
) {
    if log.windows(2).any(|w| w[1].timestamp < w[0].timestamp) {
        issues.push(DocumentIssue::feed(
            feed,
            format!("{} log timestamps out of order", label),
        ));
    }

    let ends = log.iter().filter(|e| e.action == end).count();
    if ends != 1 || log.last().map(|e| e.action) != Some(end) {
        issues.push(DocumentIssue::feed(
            feed,
            format!("{} log must finish with exactly one end entry", label),
        ));
    }
}
