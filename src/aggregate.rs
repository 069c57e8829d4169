//! Survey aggregate
//!
//! Accumulates the per-snapshot answer bundles of a session. Records are merged
//! additively: a rating record committed after a selection record for the same
//! snapshot lands next to it in a single entry. Commits are only accepted for
//! the snapshot the state machine currently has active, and the aggregate can
//! only be finalized once the session reached its terminal phase.

use crate::error::SurveyError;
use crate::types::{
    ExitRecord, PhaseRecord, ScreenerRecord, SessionMetadata, SnapshotEntry, SnapshotId,
    SurveyDocument,
};
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::collections::BTreeMap;

impl SnapshotEntry {
    /// Merge a completed phase record, replacing a previous record of the same kind
    pub fn merge(&mut self, record: PhaseRecord) {
        match record {
            PhaseRecord::Selection(selection) => self.selection = Some(selection),
            PhaseRecord::Rating(rating) => self.rating = Some(rating),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.selection.is_some() && self.rating.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SurveyAggregate {
    metadata: SessionMetadata,
    feeds: Vec<SnapshotId>,
    entries: BTreeMap<SnapshotId, SnapshotEntry>,
    screener: Option<ScreenerRecord>,
    exit: Option<ExitRecord>,
    active: Option<SnapshotId>,
    terminal: bool,
}

impl SurveyAggregate {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            metadata: SessionMetadata {
                session_id: session_id.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut SessionMetadata {
        &mut self.metadata
    }

    pub fn set_feeds(&mut self, feeds: Vec<SnapshotId>) {
        self.feeds = feeds;
    }

    pub fn feeds(&self) -> &[SnapshotId] {
        &self.feeds
    }

    /// Mark the snapshot the state machine is working on
    pub fn activate(&mut self, snapshot: &str) {
        debug!("aggregate active snapshot={}", snapshot);
        self.active = Some(snapshot.to_string());
    }

    pub fn deactivate(&mut self) {
        self.active = None;
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Merge a record into the entry of the active snapshot
    pub fn commit(&mut self, snapshot: &str, record: PhaseRecord) -> Result<(), SurveyError> {
        if self.terminal {
            return Err(SurveyError::OutOfOrderCommit(format!(
                "commit for {} after the session finished",
                snapshot
            )));
        }
        match self.active.as_deref() {
            Some(active) if active == snapshot => {}
            Some(active) => {
                return Err(SurveyError::OutOfOrderCommit(format!(
                    "commit for {} while {} is active",
                    snapshot, active
                )))
            }
            None => {
                return Err(SurveyError::OutOfOrderCommit(format!(
                    "commit for {} with no active snapshot",
                    snapshot
                )))
            }
        }

        let kind = match &record {
            PhaseRecord::Selection(_) => "selection",
            PhaseRecord::Rating(_) => "rating",
        };
        self.entries
            .entry(snapshot.to_string())
            .or_default()
            .merge(record);
        info!(
            "committed record session={} snapshot={} kind={}",
            self.metadata.session_id, snapshot, kind
        );
        Ok(())
    }

    pub fn entry(&self, snapshot: &str) -> Option<&SnapshotEntry> {
        self.entries.get(snapshot)
    }

    pub fn entries(&self) -> &BTreeMap<SnapshotId, SnapshotEntry> {
        &self.entries
    }

    pub fn record_screener(&mut self, record: ScreenerRecord) {
        self.screener = Some(record);
    }

    pub fn record_exit(&mut self, record: ExitRecord) {
        self.metadata.exit_timestamp = Some(record.exit_end);
        self.exit = Some(record);
    }

    /// Seal the aggregate once the session reached its terminal phase
    pub fn mark_terminal(&mut self) {
        self.active = None;
        self.terminal = true;
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Produce the immutable document for submission
    pub fn finalize(&self, at: DateTime<Utc>) -> Result<SurveyDocument, SurveyError> {
        if !self.terminal {
            return Err(SurveyError::NotFinalized(
                "session has not reached its terminal phase".to_string(),
            ));
        }

        Ok(SurveyDocument {
            metadata: self.metadata.clone(),
            feeds: self.feeds.clone(),
            screener: self.screener.clone(),
            answers: self.entries.clone(),
            exit: self.exit.clone(),
            finalized_at: at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Rating, RatingRecord, SelectionRecord};
    use pretty_assertions::assert_eq;

    fn selection(posts: &[&str]) -> PhaseRecord {
        PhaseRecord::Selection(SelectionRecord {
            selected_posts: posts.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        })
    }

    fn rating(post: &str) -> PhaseRecord {
        let mut record = RatingRecord::default();
        record.ratings.insert(post.to_string(), Rating::new(5, 4, 6));
        PhaseRecord::Rating(record)
    }

    #[test]
    fn test_selection_then_rating_share_one_entry() {
        let mut aggregate = SurveyAggregate::new("sess-1");
        aggregate.activate("snap-A");

        aggregate.commit("snap-A", selection(&["p1"])).unwrap();
        aggregate.commit("snap-A", rating("p1")).unwrap();

        assert_eq!(aggregate.entries().len(), 1);
        let entry = aggregate.entry("snap-A").unwrap();
        assert_eq!(
            entry.selection.as_ref().unwrap().selected_posts,
            vec!["p1".to_string()]
        );
        assert_eq!(
            entry.rating.as_ref().unwrap().ratings["p1"],
            Rating::new(5, 4, 6)
        );
        assert!(entry.is_complete());

        let json = serde_json::to_value(entry).unwrap();
        assert!(json["selected_posts"].is_array());
        assert!(json["ratings"]["p1"].is_object());
    }

    #[test]
    fn test_matching_record_is_overwritten() {
        let mut aggregate = SurveyAggregate::new("sess-1");
        aggregate.activate("snap-A");
        aggregate.commit("snap-A", selection(&["p1"])).unwrap();
        aggregate.commit("snap-A", selection(&["p2", "p3"])).unwrap();

        let entry = aggregate.entry("snap-A").unwrap();
        assert_eq!(entry.selection.as_ref().unwrap().selected_posts.len(), 2);
    }

    #[test]
    fn test_commit_for_inactive_snapshot_fails() {
        let mut aggregate = SurveyAggregate::new("sess-1");
        assert!(matches!(
            aggregate.commit("snap-A", selection(&["p1"])),
            Err(SurveyError::OutOfOrderCommit(_))
        ));

        aggregate.activate("snap-A");
        assert!(matches!(
            aggregate.commit("snap-B", selection(&["p1"])),
            Err(SurveyError::OutOfOrderCommit(_))
        ));
        assert!(aggregate.entries().is_empty());
    }

    #[test]
    fn test_finalize_requires_terminal() {
        let mut aggregate = SurveyAggregate::new("sess-1");
        assert!(matches!(
            aggregate.finalize(Utc::now()),
            Err(SurveyError::NotFinalized(_))
        ));

        aggregate.mark_terminal();
        let doc = aggregate.finalize(Utc::now()).unwrap();
        assert_eq!(doc.metadata.session_id, "sess-1");

        assert!(matches!(
            aggregate.commit("snap-A", selection(&["p1"])),
            Err(SurveyError::OutOfOrderCommit(_))
        ));
    }

    #[test]
    fn test_entry_roundtrips_through_json() {
        let mut entry = SnapshotEntry::default();
        entry.merge(selection(&["p1"]));
        entry.merge(rating("p1"));

        let json = serde_json::to_string(&entry).unwrap();
        let parsed: SnapshotEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn test_selection_only_entry_parses_without_rating() {
        let mut entry = SnapshotEntry::default();
        entry.merge(selection(&["p1"]));

        let json = serde_json::to_string(&entry).unwrap();
        let parsed: SnapshotEntry = serde_json::from_str(&json).unwrap();
        assert!(parsed.selection.is_some());
        assert!(parsed.rating.is_none());
    }
}
