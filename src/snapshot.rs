//! Feed snapshot model
//!
//! Read-only access to the captured feeds of a session: the ordered posts of
//! each snapshot and their pixel bounds. Snapshots are loaded once from the
//! bootstrap payload (or a standalone layout document) and never mutated.

use crate::error::SurveyError;
use crate::types::{BoundingBox, Post, PostId, SnapshotId};
use std::collections::{BTreeMap, HashSet};

/// Parse a layout document: a JSON array of `{id, x, y, width, height}`
pub fn parse_layout(json: &str) -> Result<Vec<Post>, SurveyError> {
    serde_json::from_str(json)
        .map_err(|e| SurveyError::ParseError(format!("Failed to parse layout document: {}", e)))
}

/// One captured feed
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSnapshot {
    id: SnapshotId,
    posts: Vec<Post>,
    feed_url: Option<String>,
    post_urls: BTreeMap<PostId, String>,
}

impl FeedSnapshot {
    /// Build a snapshot, rejecting empty layouts and duplicate post ids
    pub fn new(id: impl Into<SnapshotId>, posts: Vec<Post>) -> Result<Self, SurveyError> {
        let id = id.into();
        if posts.is_empty() {
            return Err(SurveyError::SnapshotUnavailable(format!(
                "snapshot {} has no posts",
                id
            )));
        }

        let mut seen = HashSet::new();
        for post in &posts {
            if !seen.insert(post.id.as_str()) {
                return Err(SurveyError::ParseError(format!(
                    "duplicate post {} in snapshot {}",
                    post.id, id
                )));
            }
        }

        Ok(Self {
            id,
            posts,
            feed_url: None,
            post_urls: BTreeMap::new(),
        })
    }

    pub fn with_assets(
        mut self,
        feed_url: Option<String>,
        post_urls: BTreeMap<PostId, String>,
    ) -> Self {
        self.feed_url = feed_url;
        self.post_urls = post_urls;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn post_ids(&self) -> impl Iterator<Item = &str> {
        self.posts.iter().map(|p| p.id.as_str())
    }

    pub fn contains(&self, post_id: &str) -> bool {
        self.posts.iter().any(|p| p.id == post_id)
    }

    pub fn bounds_of(&self, post_id: &str) -> Option<BoundingBox> {
        self.posts
            .iter()
            .find(|p| p.id == post_id)
            .map(|p| p.bounds)
    }

    /// Height of the screenshot area covering every post
    pub fn feed_height(&self) -> f64 {
        self.posts
            .iter()
            .map(|p| p.bounds.bottom())
            .fold(0.0, f64::max)
    }

    pub fn feed_url(&self) -> Option<&str> {
        self.feed_url.as_deref()
    }

    pub fn post_url(&self, post_id: &str) -> Option<&str> {
        self.post_urls.get(post_id).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
enum SnapshotSlot {
    Ready(FeedSnapshot),
    Failed(String),
}

/// All snapshots known to a session
#[derive(Debug, Clone, Default)]
pub struct FeedCatalog {
    slots: BTreeMap<SnapshotId, SnapshotSlot>,
}

impl FeedCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, snapshot: FeedSnapshot) {
        self.slots
            .insert(snapshot.id.clone(), SnapshotSlot::Ready(snapshot));
    }

    /// Record that a snapshot could not be fetched
    pub fn mark_failed(&mut self, id: impl Into<SnapshotId>, reason: impl Into<String>) {
        self.slots
            .insert(id.into(), SnapshotSlot::Failed(reason.into()));
    }

    pub fn snapshot(&self, id: &str) -> Result<&FeedSnapshot, SurveyError> {
        match self.slots.get(id) {
            Some(SnapshotSlot::Ready(snapshot)) => Ok(snapshot),
            Some(SnapshotSlot::Failed(reason)) => Err(SurveyError::SnapshotUnavailable(format!(
                "{}: {}",
                id, reason
            ))),
            None => Err(SurveyError::SnapshotUnavailable(format!(
                "{}: not loaded",
                id
            ))),
        }
    }

    pub fn is_available(&self, id: &str) -> bool {
        matches!(self.slots.get(id), Some(SnapshotSlot::Ready(_)))
    }

    pub fn posts_of(&self, id: &str) -> Result<&[Post], SurveyError> {
        self.snapshot(id).map(FeedSnapshot::posts)
    }

    pub fn bounds_of(&self, id: &str, post_id: &str) -> Result<BoundingBox, SurveyError> {
        self.snapshot(id)?
            .bounds_of(post_id)
            .ok_or_else(|| SurveyError::UnknownPost(format!("{} in snapshot {}", post_id, id)))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
