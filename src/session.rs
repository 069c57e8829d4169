//! Phase state machine
//!
//! A [`SurveySession`] owns everything a participant session mutates: the
//! current phase, the in-progress selection or rating draft, the countdown of
//! the active selection phase and the [`SurveyAggregate`] collecting committed
//! records. The flow is
//!
//! ```text
//! consent → screening → {selection(i) → rating(i)}* → exit_questionnaire → done
//! ```
//!
//! and only moves forward through [`SurveySession::advance`], which checks the
//! phase's completion predicate first. Front ends read the selection and rating
//! phases through the narrow [`SelectionView`] and [`RatingView`].

use crate::aggregate::SurveyAggregate;
use crate::bootstrap::{BootstrapOutcome, BootstrapRequest, OptionOrder};
use crate::config::SessionConfig;
use crate::error::SurveyError;
use crate::logger::{format_remaining, Clock, Countdown, InteractionLog, SystemClock, TickOutcome};
use crate::snapshot::{FeedCatalog, FeedSnapshot};
use crate::types::{
    duration_secs, BoundingBox, ExitAnswers, ExitRecord, LogEntry, Phase, PhaseRecord, Post,
    PostId, PostReference, Rating, RatingAction, RatingChange, RatingDimension, RatingRecord,
    ScreenerAnswers, ScreenerRecord, SelectionAction, SelectionRecord, SnapshotId,
    SubmissionStatus, SurveyDocument, LIKERT_MAX, LIKERT_MIN,
};
use crate::validator;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

/// Where the session stands with the validation endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapStatus {
    Awaiting,
    Ready,
    Invalid(String),
    TimedOut,
}

#[derive(Debug)]
struct SelectionDraft {
    snapshot: SnapshotId,
    selected: Vec<PostId>,
    log: InteractionLog<SelectionAction>,
    started_at: Option<DateTime<Utc>>,
    time_expired: bool,
}

#[derive(Debug, Clone)]
struct OpenRating {
    post: PostId,
    rating: Rating,
}

#[derive(Debug)]
struct RatingDraft {
    snapshot: SnapshotId,
    selected: Vec<PostId>,
    sampled: Vec<PostId>,
    attention_check: Option<PostId>,
    ratings: BTreeMap<PostId, Rating>,
    attention_answer: Option<Rating>,
    open: Option<OpenRating>,
    log: InteractionLog<RatingAction>,
    started_at: DateTime<Utc>,
}

impl RatingDraft {
    fn required(&self) -> BTreeSet<PostId> {
        self.selected
            .iter()
            .chain(self.sampled.iter())
            .chain(self.attention_check.iter())
            .cloned()
            .collect()
    }

    fn is_attention_check(&self, post: &str) -> bool {
        self.attention_check.as_deref() == Some(post)
    }

    fn previous(&self, post: &str) -> Option<Rating> {
        if self.is_attention_check(post) {
            self.attention_answer
        } else {
            self.ratings.get(post).copied()
        }
    }

    /// Ratings including the attention-check answer, keyed by post
    fn answered(&self) -> BTreeMap<PostId, Rating> {
        let mut answered = self.ratings.clone();
        if let (Some(post), Some(answer)) = (&self.attention_check, self.attention_answer) {
            answered.insert(post.clone(), answer);
        }
        answered
    }
}

/// State of one participant session
pub struct SurveySession {
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    rng: StdRng,
    phase: Phase,
    participant_id: Option<String>,
    bootstrap: BootstrapStatus,
    catalog: FeedCatalog,
    feeds: Vec<SnapshotId>,
    option_order: OptionOrder,
    completion_code: Option<String>,
    completion_url: Option<String>,
    completed: usize,
    screener: ScreenerAnswers,
    screener_start: Option<DateTime<Utc>>,
    selection: Option<SelectionDraft>,
    rating: Option<RatingDraft>,
    exit: ExitAnswers,
    exit_start: Option<DateTime<Utc>>,
    countdown: Countdown,
    countdown_epoch: u64,
    aggregate: SurveyAggregate,
}

impl SurveySession {
    /// Create a session in the consent phase
    pub fn new(config: SessionConfig, clock: Arc<dyn Clock>) -> Result<Self, SurveyError> {
        config.validate()?;

        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let session_id = Uuid::new_v4().to_string();
        let countdown = Countdown::new(config.selection_budget_secs);

        info!("session created session={}", session_id);

        Ok(Self {
            config,
            clock,
            rng,
            phase: Phase::Consent,
            participant_id: None,
            bootstrap: BootstrapStatus::Awaiting,
            catalog: FeedCatalog::new(),
            feeds: Vec::new(),
            option_order: OptionOrder::default(),
            completion_code: None,
            completion_url: None,
            completed: 0,
            screener: ScreenerAnswers::default(),
            screener_start: None,
            selection: None,
            rating: None,
            exit: ExitAnswers::default(),
            exit_start: None,
            countdown,
            countdown_epoch: 0,
            aggregate: SurveyAggregate::new(session_id),
        })
    }

    /// Create a session stamped by the wall clock
    pub fn with_system_clock(config: SessionConfig) -> Result<Self, SurveyError> {
        Self::new(config, Arc::new(SystemClock))
    }

    /// Adopt the identifiers sent to the validation endpoint
    pub fn apply_request(&mut self, request: &BootstrapRequest) {
        let metadata = self.aggregate.metadata_mut();
        if !request.session_id.is_empty() {
            metadata.session_id = request.session_id.clone();
        }
        if !request.study_id.is_empty() {
            metadata.study_id = Some(request.study_id.clone());
        }
        if self.participant_id.is_none() {
            self.participant_id = Some(request.prolific_pid.clone());
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn session_id(&self) -> &str {
        &self.aggregate.metadata().session_id
    }

    pub fn participant_id(&self) -> Option<&str> {
        self.participant_id.as_deref()
    }

    pub fn bootstrap_status(&self) -> &BootstrapStatus {
        &self.bootstrap
    }

    pub fn feeds(&self) -> &[SnapshotId] {
        &self.feeds
    }

    pub fn completed_feeds(&self) -> usize {
        self.completed
    }

    pub fn catalog(&self) -> &FeedCatalog {
        &self.catalog
    }

    pub fn aggregate(&self) -> &SurveyAggregate {
        &self.aggregate
    }

    pub fn screener(&self) -> &ScreenerAnswers {
        &self.screener
    }

    pub fn exit_answers(&self) -> &ExitAnswers {
        &self.exit
    }

    pub fn completion_code(&self) -> Option<&str> {
        self.completion_code.as_deref()
    }

    pub fn completion_url(&self) -> Option<&str> {
        self.completion_url.as_deref()
    }

    pub fn submission_status(&self) -> SubmissionStatus {
        self.aggregate.metadata().submission_status
    }

    pub(crate) fn set_submission_status(&mut self, status: SubmissionStatus) {
        info!(
            "submission status session={} status={:?}",
            self.session_id(),
            status
        );
        self.aggregate.metadata_mut().submission_status = status;
    }

    /// Rating dimensions in the order assigned by the backend
    pub fn likert_order(&self) -> Vec<RatingDimension> {
        self.option_order.likert_dimensions()
    }

    pub fn option_order(&self) -> &OptionOrder {
        &self.option_order
    }

    /// Snapshot of the active selection or rating phase
    pub fn current_snapshot(&self) -> Option<&str> {
        if self.phase.is_snapshot_phase() {
            self.feeds.get(self.completed).map(String::as_str)
        } else {
            None
        }
    }

    /// Epoch of the active selection countdown.
    ///
    /// Every entry into or exit from a selection phase bumps the epoch, so a
    /// tick scheduled for an earlier phase is ignored.
    pub fn countdown_epoch(&self) -> u64 {
        self.countdown_epoch
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ------------------------------------------------------------------
    // Bootstrap
    // ------------------------------------------------------------------

    /// Record the result of the validation call.
    ///
    /// Only a valid response unlocks the snapshot phases; anything else halts
    /// progression at the screening phase.
    pub fn accept_bootstrap(&mut self, outcome: BootstrapOutcome) -> Result<(), SurveyError> {
        if !matches!(self.phase, Phase::Consent | Phase::Screening) {
            return Err(SurveyError::InvalidTransition(format!(
                "bootstrap received during {}",
                self.phase
            )));
        }

        match outcome {
            BootstrapOutcome::Valid(response) => {
                response.check()?;
                self.catalog = response.catalog();
                self.feeds = response.feeds.clone();
                self.option_order = response.option_order.clone();
                self.completion_code = response.completion_code.clone();
                self.completion_url = response.completion_url.clone();
                self.aggregate.set_feeds(self.feeds.clone());
                self.bootstrap = BootstrapStatus::Ready;
                info!(
                    "bootstrap ready session={} feeds={}",
                    self.session_id(),
                    self.feeds.len()
                );
            }
            BootstrapOutcome::Invalid(reason) => {
                warn!(
                    "bootstrap invalid session={} reason={}",
                    self.session_id(),
                    reason
                );
                self.bootstrap = BootstrapStatus::Invalid(reason);
            }
            BootstrapOutcome::TimedOut => {
                warn!("bootstrap timed out session={}", self.session_id());
                self.bootstrap = BootstrapStatus::TimedOut;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Consent and screening
    // ------------------------------------------------------------------

    /// Record the participant id and leave the consent phase
    pub fn give_consent(&mut self, participant_id: &str) -> Result<Phase, SurveyError> {
        self.expect_phase(Phase::Consent)?;
        let trimmed = participant_id.trim();
        if trimmed.is_empty() {
            return Err(SurveyError::InvalidTransition(
                "participant id is required to consent".to_string(),
            ));
        }
        self.participant_id = Some(trimmed.to_string());
        self.advance()
    }

    pub fn add_subreddit(&mut self, raw: &str) -> Result<bool, SurveyError> {
        self.expect_phase(Phase::Screening)?;
        Ok(self.screener.add_subreddit(raw))
    }

    pub fn remove_subreddit(&mut self, index: usize) -> Result<Option<String>, SurveyError> {
        self.expect_phase(Phase::Screening)?;
        Ok(self.screener.remove_subreddit(index))
    }

    pub fn toggle_interest(&mut self, interest: &str, checked: bool) -> Result<(), SurveyError> {
        self.expect_phase(Phase::Screening)?;
        self.screener.toggle_interest(interest, checked);
        Ok(())
    }

    pub fn answer_screener_attention_check(&mut self, value: u8) -> Result<(), SurveyError> {
        self.expect_phase(Phase::Screening)?;
        if !(LIKERT_MIN..=LIKERT_MAX).contains(&value) {
            return Err(SurveyError::InvalidRating(format!(
                "attention check answer {} is off the scale",
                value
            )));
        }
        self.screener.attention_check = Some(value);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Move to the next phase if the current one is complete
    pub fn advance(&mut self) -> Result<Phase, SurveyError> {
        let from = self.phase;
        match self.phase {
            Phase::Consent => self.close_consent()?,
            Phase::Screening => self.close_screening()?,
            Phase::Selection => self.close_selection()?,
            Phase::Rating => self.close_rating_phase()?,
            Phase::ExitQuestionnaire => self.close_exit()?,
            Phase::Done => {
                return Err(SurveyError::InvalidTransition(
                    "session already complete".to_string(),
                ))
            }
        }

        info!(
            "phase transition session={} from={} to={} snapshot={}",
            self.session_id(),
            from,
            self.phase,
            self.current_snapshot().unwrap_or("-")
        );
        Ok(self.phase)
    }

    fn expect_phase(&self, phase: Phase) -> Result<(), SurveyError> {
        if self.phase == phase {
            Ok(())
        } else {
            Err(SurveyError::InvalidTransition(format!(
                "expected {} phase, session is in {}",
                phase, self.phase
            )))
        }
    }

    fn close_consent(&mut self) -> Result<(), SurveyError> {
        let participant = self
            .participant_id
            .clone()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| {
                SurveyError::InvalidTransition("participant id is required to consent".to_string())
            })?;

        let now = self.clock.now();
        let metadata = self.aggregate.metadata_mut();
        metadata.participant_id = Some(participant);
        metadata.consent_timestamp = Some(now);

        self.screener_start = Some(now);
        self.phase = Phase::Screening;
        Ok(())
    }

    fn close_screening(&mut self) -> Result<(), SurveyError> {
        if !validator::can_close_screener(&self.screener) {
            return Err(SurveyError::InvalidTransition(
                "screener needs at least one interest and the attention check".to_string(),
            ));
        }

        match &self.bootstrap {
            BootstrapStatus::Ready => {}
            BootstrapStatus::Awaiting => {
                return Err(SurveyError::InvalidTransition(
                    "waiting for session bootstrap".to_string(),
                ))
            }
            BootstrapStatus::Invalid(reason) => {
                return Err(SurveyError::BootstrapInvalid(reason.clone()))
            }
            BootstrapStatus::TimedOut => {
                return Err(SurveyError::BootstrapInvalid(
                    "bootstrap timed out".to_string(),
                ))
            }
        }

        let first = self.feeds.first().cloned().ok_or_else(|| {
            SurveyError::BootstrapInvalid("bootstrap listed no feeds".to_string())
        })?;
        self.catalog.snapshot(&first)?;

        let end = self.clock.now();
        let start = self.screener_start.unwrap_or(end);
        self.aggregate.record_screener(ScreenerRecord {
            answers: self.screener.clone(),
            screener_start: start,
            screener_end: end,
            screener_duration: duration_secs(start, end),
        });

        self.enter_selection();
        Ok(())
    }

    fn enter_selection(&mut self) {
        let snapshot = self.feeds[self.completed].clone();
        self.aggregate.activate(&snapshot);
        self.selection = Some(SelectionDraft {
            snapshot,
            selected: Vec::new(),
            log: InteractionLog::new(self.clock.clone()),
            started_at: None,
            time_expired: false,
        });
        self.countdown = Countdown::new(self.config.selection_budget_secs);
        self.countdown_epoch += 1;
        self.phase = Phase::Selection;
    }

    // ------------------------------------------------------------------
    // Selection phase
    // ------------------------------------------------------------------

    fn selection_draft(&self) -> Result<&SelectionDraft, SurveyError> {
        self.expect_phase(Phase::Selection)?;
        self.selection.as_ref().ok_or_else(|| {
            SurveyError::InvalidTransition("no selection in progress".to_string())
        })
    }

    fn selection_draft_mut(&mut self) -> Result<&mut SelectionDraft, SurveyError> {
        self.expect_phase(Phase::Selection)?;
        self.selection.as_mut().ok_or_else(|| {
            SurveyError::InvalidTransition("no selection in progress".to_string())
        })
    }

    /// Show the feed: stamps the selection start and arms the countdown
    pub fn reveal_feed(&mut self) -> Result<(), SurveyError> {
        let draft = self.selection_draft_mut()?;
        if draft.started_at.is_some() {
            return Err(SurveyError::InvalidTransition(
                "feed already revealed".to_string(),
            ));
        }

        let start = draft.log.append(SelectionAction::Start, None, None).timestamp;
        draft.started_at = Some(start);
        let snapshot = draft.snapshot.clone();
        self.countdown.start();

        info!(
            "feed revealed session={} snapshot={} budget_secs={}",
            self.session_id(),
            snapshot,
            self.countdown.budget_secs()
        );
        Ok(())
    }

    /// Mark a post as selected.
    ///
    /// Rejected without touching the draft or its log once the limit is
    /// reached. After the countdown expired only selections that bring the
    /// draft up to the minimum are accepted.
    pub fn select(&mut self, post: &str) -> Result<(), SurveyError> {
        let max = self.config.max_selected_posts;
        let min = self.config.min_selected_posts;
        let draft = self.selection_draft()?;

        if draft.started_at.is_none() {
            return Err(SurveyError::SelectionClosed(
                "feed has not been revealed".to_string(),
            ));
        }
        if draft.time_expired && draft.selected.len() >= min {
            return Err(SurveyError::SelectionClosed("time expired".to_string()));
        }
        if !self.catalog.snapshot(&draft.snapshot)?.contains(post) {
            return Err(SurveyError::UnknownPost(format!(
                "{} in snapshot {}",
                post, draft.snapshot
            )));
        }
        if draft.selected.iter().any(|p| p == post) {
            debug!("post already selected snapshot={} post={}", draft.snapshot, post);
            return Ok(());
        }
        if draft.selected.len() >= max {
            warn!(
                "selection rejected snapshot={} post={} selected={}",
                draft.snapshot,
                post,
                draft.selected.len()
            );
            return Err(SurveyError::SelectionLimit(format!(
                "at most {} posts may be selected",
                max
            )));
        }

        let draft = self.selection_draft_mut()?;
        draft.selected.push(post.to_string());
        draft.log.append(SelectionAction::Select, Some(post), None);
        debug!("post selected snapshot={} post={}", draft.snapshot, post);
        Ok(())
    }

    /// Remove a post from the selection; allowed after the countdown expired
    pub fn unselect(&mut self, post: &str) -> Result<(), SurveyError> {
        let draft = self.selection_draft_mut()?;
        let Some(index) = draft.selected.iter().position(|p| p == post) else {
            return Err(SurveyError::UnknownPost(format!("{} is not selected", post)));
        };

        draft.selected.remove(index);
        draft.log.append(SelectionAction::Unselect, Some(post), None);
        debug!("post unselected snapshot={} post={}", draft.snapshot, post);
        Ok(())
    }

    /// Apply a countdown tick scheduled for `epoch`.
    ///
    /// Ticks for another epoch, or outside a selection phase, change nothing.
    pub fn tick_countdown(&mut self, epoch: u64) -> TickOutcome {
        if epoch != self.countdown_epoch || self.phase != Phase::Selection {
            return TickOutcome::Idle;
        }
        let Some(draft) = self.selection.as_mut() else {
            return TickOutcome::Idle;
        };

        let outcome = self.countdown.tick();
        if outcome == TickOutcome::Expired {
            draft.time_expired = true;
            draft.log.append(SelectionAction::TimeExpired, None, None);
            info!(
                "selection time expired snapshot={} selected={}",
                draft.snapshot,
                draft.selected.len()
            );
        }
        outcome
    }

    /// Tick the countdown of the active selection phase
    pub fn tick(&mut self) -> TickOutcome {
        self.tick_countdown(self.countdown_epoch)
    }

    pub fn selection_view(&self) -> Option<SelectionView<'_>> {
        if self.phase != Phase::Selection {
            return None;
        }
        let draft = self.selection.as_ref()?;
        let snapshot = self.catalog.snapshot(&draft.snapshot).ok()?;
        Some(SelectionView {
            session: self,
            draft,
            snapshot,
        })
    }

    fn close_selection(&mut self) -> Result<(), SurveyError> {
        let draft = self.selection_draft()?;
        let count = draft.selected.len();
        if !validator::can_close_selection_within(
            count,
            self.config.min_selected_posts,
            self.config.max_selected_posts,
        ) {
            return Err(SurveyError::InvalidTransition(format!(
                "{} posts selected, select between {} and {} to continue",
                count, self.config.min_selected_posts, self.config.max_selected_posts
            )));
        }

        let candidates: Vec<PostId> = self
            .catalog
            .snapshot(&draft.snapshot)?
            .post_ids()
            .filter(|id| !draft.selected.iter().any(|s| s == id))
            .map(String::from)
            .collect();
        let (sampled, attention_check) = self.draw_sample(&candidates);

        let Some(mut draft) = self.selection.take() else {
            return Err(SurveyError::InvalidTransition(
                "no selection in progress".to_string(),
            ));
        };
        self.countdown.cancel();
        self.countdown_epoch += 1;

        let end = draft.log.append(SelectionAction::End, None, None).timestamp;
        let record = SelectionRecord {
            selected_posts: draft.selected.clone(),
            non_selected_posts: sampled.clone(),
            selection_start: draft.started_at,
            selection_end: Some(end),
            selection_duration: draft.started_at.map(|start| duration_secs(start, end)),
            time_expired: draft.time_expired,
            selection_logs: draft.log.into_entries(),
        };
        self.aggregate
            .commit(&draft.snapshot, PhaseRecord::Selection(record))?;

        self.enter_rating(draft.snapshot, draft.selected, sampled, attention_check);
        Ok(())
    }

    /// Draw the non-selected comparison sample, plus the attention-check post
    /// on the configured feed when an extra post is left over
    fn draw_sample(&mut self, candidates: &[PostId]) -> (Vec<PostId>, Option<PostId>) {
        let size = self.config.non_selected_sample_size;
        let with_attention = self.config.attention_check_feed == Some(self.completed);
        let wanted = if with_attention { size + 1 } else { size };

        let mut drawn: Vec<PostId> = candidates
            .choose_multiple(&mut self.rng, wanted)
            .cloned()
            .collect();
        let attention_check = if with_attention && drawn.len() > size {
            drawn.pop()
        } else {
            None
        };

        debug!(
            "sampled non-selected posts count={} attention_check={}",
            drawn.len(),
            attention_check.as_deref().unwrap_or("-")
        );
        (drawn, attention_check)
    }

    fn enter_rating(
        &mut self,
        snapshot: SnapshotId,
        selected: Vec<PostId>,
        sampled: Vec<PostId>,
        attention_check: Option<PostId>,
    ) {
        let log = InteractionLog::new(self.clock.clone());
        let started_at = log.now();
        self.rating = Some(RatingDraft {
            snapshot,
            selected,
            sampled,
            attention_check,
            ratings: BTreeMap::new(),
            attention_answer: None,
            open: None,
            log,
            started_at,
        });
        self.phase = Phase::Rating;
    }

    // ------------------------------------------------------------------
    // Rating phase
    // ------------------------------------------------------------------

    fn rating_draft(&self) -> Result<&RatingDraft, SurveyError> {
        self.expect_phase(Phase::Rating)?;
        self.rating
            .as_ref()
            .ok_or_else(|| SurveyError::InvalidTransition("no rating in progress".to_string()))
    }

    fn rating_draft_mut(&mut self) -> Result<&mut RatingDraft, SurveyError> {
        self.expect_phase(Phase::Rating)?;
        self.rating
            .as_mut()
            .ok_or_else(|| SurveyError::InvalidTransition("no rating in progress".to_string()))
    }

    /// Open the rating dialog for a post, seeded with any earlier answer
    pub fn open_rating(&mut self, post: &str) -> Result<(), SurveyError> {
        let draft = self.rating_draft_mut()?;
        if let Some(open) = &draft.open {
            return Err(SurveyError::InvalidTransition(format!(
                "rating for {} is still open",
                open.post
            )));
        }
        if !draft.required().contains(post) {
            return Err(SurveyError::UnknownPost(format!(
                "{} is not rated in snapshot {}",
                post, draft.snapshot
            )));
        }

        let previous = draft.previous(post);
        let action = if previous.is_some() {
            RatingAction::Edit
        } else {
            RatingAction::Open
        };
        draft.log.append(action, Some(post), None);
        draft.open = Some(OpenRating {
            post: post.to_string(),
            rating: previous.unwrap_or_default(),
        });
        Ok(())
    }

    /// Answer one dimension of the open rating
    pub fn set_rating_dimension(
        &mut self,
        dimension: RatingDimension,
        value: u8,
    ) -> Result<(), SurveyError> {
        let draft = self.rating_draft_mut()?;
        let Some(open) = draft.open.as_mut() else {
            return Err(SurveyError::InvalidTransition(
                "no rating is open".to_string(),
            ));
        };
        if !(LIKERT_MIN..=LIKERT_MAX).contains(&value) {
            return Err(SurveyError::InvalidRating(format!(
                "{} must be between {} and {}, got {}",
                dimension, LIKERT_MIN, LIKERT_MAX, value
            )));
        }

        open.rating.set(dimension, value);
        let post = open.post.clone();
        draft.log.append(
            RatingAction::Rate,
            Some(&post),
            Some(RatingChange { dimension, value }),
        );
        Ok(())
    }

    /// Store the open rating once all three dimensions are answered
    pub fn submit_rating(&mut self) -> Result<(), SurveyError> {
        let draft = self.rating_draft_mut()?;
        let Some(open) = draft.open.as_ref() else {
            return Err(SurveyError::InvalidTransition(
                "no rating is open".to_string(),
            ));
        };
        if !open.rating.is_complete() {
            return Err(SurveyError::InvalidRating(format!(
                "every dimension of {} must be answered",
                open.post
            )));
        }

        let OpenRating { post, rating } = open.clone();
        draft.open = None;
        if draft.is_attention_check(&post) {
            draft.attention_answer = Some(rating);
        } else {
            draft.ratings.insert(post.clone(), rating);
        }
        draft.log.append(RatingAction::Submit, Some(&post), None);
        debug!("rating submitted snapshot={} post={}", draft.snapshot, post);
        Ok(())
    }

    /// Dismiss the open rating without storing it
    pub fn close_rating(&mut self) -> Result<(), SurveyError> {
        let draft = self.rating_draft_mut()?;
        let Some(open) = draft.open.take() else {
            return Err(SurveyError::InvalidTransition(
                "no rating is open".to_string(),
            ));
        };
        draft.log.append(RatingAction::Close, Some(&open.post), None);
        Ok(())
    }

    /// Open, answer and submit a rating in one call
    pub fn rate_post(&mut self, post: &str, rating: Rating) -> Result<(), SurveyError> {
        self.open_rating(post)?;
        for dimension in self.likert_order() {
            if let Err(e) = self.set_rating_dimension(dimension, rating.get(dimension)) {
                self.close_rating()?;
                return Err(e);
            }
        }
        self.submit_rating()
    }

    pub fn rating_view(&self) -> Option<RatingView<'_>> {
        if self.phase != Phase::Rating {
            return None;
        }
        let draft = self.rating.as_ref()?;
        let snapshot = self.catalog.snapshot(&draft.snapshot).ok()?;
        Some(RatingView {
            draft,
            snapshot,
            likert_order: self.likert_order(),
            attention_check_value: self.config.attention_check_value,
        })
    }

    fn close_rating_phase(&mut self) -> Result<(), SurveyError> {
        let draft = self.rating_draft()?;
        if draft.open.is_some() {
            return Err(SurveyError::InvalidTransition(
                "close the open rating before continuing".to_string(),
            ));
        }
        if !validator::can_close_rating(&draft.answered(), &draft.required()) {
            return Err(SurveyError::InvalidTransition(format!(
                "{} of {} posts rated",
                draft.answered().len(),
                draft.required().len()
            )));
        }

        let next = self.completed + 1;
        if let Some(next_feed) = self.feeds.get(next) {
            self.catalog.snapshot(next_feed)?;
        }

        let Some(mut draft) = self.rating.take() else {
            return Err(SurveyError::InvalidTransition(
                "no rating in progress".to_string(),
            ));
        };
        let end = draft.log.append(RatingAction::End, None, None).timestamp;
        let record = RatingRecord {
            ratings: draft.ratings,
            attention_check_post: draft.attention_check,
            attention_check_answer: draft.attention_answer,
            rating_start: Some(draft.started_at),
            rating_end: Some(end),
            rating_duration: Some(duration_secs(draft.started_at, end)),
            rating_logs: draft.log.into_entries(),
        };
        self.aggregate
            .commit(&draft.snapshot, PhaseRecord::Rating(record))?;
        self.aggregate.deactivate();
        self.completed = next;

        if self.completed < self.feeds.len() {
            self.enter_selection();
        } else {
            self.enter_exit();
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Exit questionnaire
    // ------------------------------------------------------------------

    fn enter_exit(&mut self) {
        self.exit_start = Some(self.clock.now());
        let (selected, non_selected) = self.draw_examples();
        self.exit.selected_post_example = selected;
        self.exit.non_selected_post_example = non_selected;
        self.phase = Phase::ExitQuestionnaire;
    }

    /// Pick the posts the exit questionnaire asks about.
    ///
    /// The non-selected example comes from the sampled (never selected) posts
    /// of the same feed when possible, then from any feed; it is `None` when no
    /// feed had a non-selected sample.
    fn draw_examples(&mut self) -> (Option<PostReference>, Option<PostReference>) {
        let mut pools: Vec<(&SnapshotId, &[PostId], &[PostId])> = Vec::new();
        for feed in &self.feeds {
            if let Some(selection) = self
                .aggregate
                .entry(feed)
                .and_then(|entry| entry.selection.as_ref())
            {
                pools.push((
                    feed,
                    selection.selected_posts.as_slice(),
                    selection.non_selected_posts.as_slice(),
                ));
            }
        }

        let with_selected: Vec<_> = pools.iter().filter(|p| !p.1.is_empty()).collect();
        let Some(&&(feed, selected, non_selected)) = with_selected.choose(&mut self.rng) else {
            return (None, None);
        };

        let reference = |feed: &SnapshotId, post: &PostId| PostReference {
            feed_uuid: feed.clone(),
            post_uuid: post.clone(),
        };

        let selected_example = selected
            .choose(&mut self.rng)
            .map(|post| reference(feed, post));

        let non_selected_example = match non_selected.choose(&mut self.rng) {
            Some(post) => Some(reference(feed, post)),
            None => {
                let with_sample: Vec<_> = pools.iter().filter(|p| !p.2.is_empty()).collect();
                with_sample
                    .choose(&mut self.rng)
                    .and_then(|&&(feed, _, sample)| {
                        sample
                            .choose(&mut self.rng)
                            .map(|post| reference(feed, post))
                    })
            }
        };

        (selected_example, non_selected_example)
    }

    /// Store an exit questionnaire response
    pub fn set_exit_field(&mut self, key: &str, value: &str) -> Result<(), SurveyError> {
        self.expect_phase(Phase::ExitQuestionnaire)?;
        self.exit
            .responses
            .insert(key.trim().to_string(), value.to_string());
        Ok(())
    }

    pub fn can_submit_exit(&self) -> bool {
        self.phase == Phase::ExitQuestionnaire
            && validator::can_submit_exit_with(
                &self.exit.responses,
                &self.config.required_exit_fields,
            )
    }

    fn close_exit(&mut self) -> Result<(), SurveyError> {
        if !self.can_submit_exit() {
            return Err(SurveyError::InvalidTransition(
                "exit questionnaire is incomplete".to_string(),
            ));
        }

        let end = self.clock.now();
        let start = self.exit_start.unwrap_or(end);
        self.aggregate.record_exit(ExitRecord {
            answers: self.exit.clone(),
            exit_start: start,
            exit_end: end,
            exit_duration: duration_secs(start, end),
        });

        let metadata = self.aggregate.metadata_mut();
        metadata.total_duration = metadata
            .consent_timestamp
            .map(|consent| duration_secs(consent, end));

        self.aggregate.mark_terminal();
        self.phase = Phase::Done;
        Ok(())
    }

    /// Immutable export of the finished session
    pub fn finalize(&self) -> Result<SurveyDocument, SurveyError> {
        self.aggregate.finalize(self.clock.now())
    }
}

/// What a selection screen needs from the session
pub struct SelectionView<'a> {
    session: &'a SurveySession,
    draft: &'a SelectionDraft,
    snapshot: &'a FeedSnapshot,
}

impl<'a> SelectionView<'a> {
    pub fn snapshot_id(&self) -> &str {
        &self.draft.snapshot
    }

    pub fn posts(&self) -> &[Post] {
        self.snapshot.posts()
    }

    pub fn feed_url(&self) -> Option<&str> {
        self.snapshot.feed_url()
    }

    pub fn feed_height(&self) -> f64 {
        self.snapshot.feed_height()
    }

    pub fn selected(&self) -> &[PostId] {
        &self.draft.selected
    }

    pub fn is_selected(&self, post: &str) -> bool {
        self.draft.selected.iter().any(|p| p == post)
    }

    pub fn is_revealed(&self) -> bool {
        self.draft.started_at.is_some()
    }

    pub fn time_expired(&self) -> bool {
        self.draft.time_expired
    }

    pub fn remaining_secs(&self) -> u32 {
        self.session.countdown.remaining_secs()
    }

    /// Countdown formatted as `MM:SS`
    pub fn remaining_display(&self) -> String {
        format_remaining(self.remaining_secs())
    }

    /// Whether a further "Select" would be accepted
    pub fn can_select(&self) -> bool {
        let selected = self.draft.selected.len();
        let config = &self.session.config;
        self.is_revealed()
            && selected < config.max_selected_posts
            && (!self.draft.time_expired || selected < config.min_selected_posts)
    }

    pub fn can_continue(&self) -> bool {
        validator::can_close_selection_within(
            self.draft.selected.len(),
            self.session.config.min_selected_posts,
            self.session.config.max_selected_posts,
        )
    }

    /// One-based feed number and total feeds
    pub fn progress(&self) -> (usize, usize) {
        (self.session.completed + 1, self.session.feeds.len())
    }

    pub fn log(&self) -> &[LogEntry<SelectionAction>] {
        self.draft.log.entries()
    }
}

/// A post the participant must rate
#[derive(Debug, Clone, PartialEq)]
pub struct RatingTarget {
    pub post: PostId,
    pub bounds: Option<BoundingBox>,
    pub selected: bool,
    pub attention_check: bool,
    pub rated: bool,
}

/// What a rating screen needs from the session
pub struct RatingView<'a> {
    draft: &'a RatingDraft,
    snapshot: &'a FeedSnapshot,
    likert_order: Vec<RatingDimension>,
    attention_check_value: u8,
}

impl<'a> RatingView<'a> {
    pub fn snapshot_id(&self) -> &str {
        &self.draft.snapshot
    }

    pub fn feed_url(&self) -> Option<&str> {
        self.snapshot.feed_url()
    }

    pub fn post_url(&self, post: &str) -> Option<&str> {
        self.snapshot.post_url(post)
    }

    /// Selected posts first, then the sample, then the attention check
    pub fn targets(&self) -> Vec<RatingTarget> {
        let answered = self.draft.answered();
        self.draft
            .selected
            .iter()
            .map(|p| (p, true, false))
            .chain(self.draft.sampled.iter().map(|p| (p, false, false)))
            .chain(self.draft.attention_check.iter().map(|p| (p, false, true)))
            .map(|(post, selected, attention_check)| RatingTarget {
                post: post.clone(),
                bounds: self.snapshot.bounds_of(post),
                selected,
                attention_check,
                rated: answered.contains_key(post),
            })
            .collect()
    }

    pub fn sampled(&self) -> &[PostId] {
        &self.draft.sampled
    }

    pub fn attention_check_post(&self) -> Option<&str> {
        self.draft.attention_check.as_deref()
    }

    /// Value the attention check instructs the participant to pick
    pub fn attention_check_value(&self) -> u8 {
        self.attention_check_value
    }

    pub fn rated_count(&self) -> usize {
        self.draft.answered().len()
    }

    pub fn required_count(&self) -> usize {
        self.draft.required().len()
    }

    pub fn rating_of(&self, post: &str) -> Option<Rating> {
        self.draft.previous(post)
    }

    pub fn open_post(&self) -> Option<&str> {
        self.draft.open.as_ref().map(|o| o.post.as_str())
    }

    pub fn open_rating(&self) -> Option<Rating> {
        self.draft.open.as_ref().map(|o| o.rating)
    }

    pub fn likert_order(&self) -> &[RatingDimension] {
        &self.likert_order
    }

    pub fn can_continue(&self) -> bool {
        self.draft.open.is_none()
            && validator::can_close_rating(&self.draft.answered(), &self.draft.required())
    }

    pub fn log(&self) -> &[LogEntry<RatingAction>] {
        self.draft.log.entries()
    }
}

impl RatingRecord {
    /// Whether the attention-check answer matches the instructed value
    pub fn attention_check_passed(&self, expected: u8) -> Option<bool> {
        self.attention_check_post.as_ref()?;
        Some(
            self.attention_check_answer
                .map(|answer| answer.all_equal(expected))
                .unwrap_or(false),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::BootstrapResponse;
    use crate::logger::ManualClock;
    use crate::types::POST_LIKELIHOOD_FIELD;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn feed_json(prefix: &str) -> String {
        let posts: Vec<String> = (0..10)
            .map(|i| {
                format!(
                    r#"{{"uuid": "{}{}", "x": 0, "y": {}, "width": 500, "height": 300}}"#,
                    prefix,
                    i,
                    i * 310
                )
            })
            .collect();
        format!("[{}]", posts.join(","))
    }

    fn response(feeds: &[&str]) -> BootstrapResponse {
        let data: Vec<String> = feeds
            .iter()
            .map(|f| format!(r#""{}": {}"#, f, feed_json(&format!("{}-p", f))))
            .collect();
        let feed_list: Vec<String> = feeds.iter().map(|f| format!("\"{}\"", f)).collect();
        BootstrapResponse::from_json(&format!(
            r#"{{"valid": true, "feeds": [{}], "feedData": {{{}}}}}"#,
            feed_list.join(","),
            data.join(",")
        ))
        .unwrap()
    }

    fn config() -> SessionConfig {
        SessionConfig {
            rng_seed: Some(11),
            attention_check_feed: None,
            ..Default::default()
        }
    }

    fn session_at(config: SessionConfig, feeds: &[&str]) -> (SurveySession, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap());
        let mut session = SurveySession::new(config, Arc::new(clock.clone())).unwrap();
        session
            .accept_bootstrap(BootstrapOutcome::Valid(response(feeds)))
            .unwrap();
        (session, clock)
    }

    fn into_selection(session: &mut SurveySession) {
        session.give_consent("participant-1").unwrap();
        session.toggle_interest("Science", true).unwrap();
        session.answer_screener_attention_check(3).unwrap();
        assert_eq!(session.advance().unwrap(), Phase::Selection);
    }

    fn rate_everything(session: &mut SurveySession) {
        let posts: Vec<PostId> = session
            .rating_view()
            .unwrap()
            .targets()
            .into_iter()
            .map(|t| t.post)
            .collect();
        for post in posts {
            session.rate_post(&post, Rating::new(4, 5, 6)).unwrap();
        }
    }

    #[test]
    fn test_initial_phase_is_consent() {
        let (session, _) = session_at(config(), &["snap-A"]);
        assert_eq!(session.phase(), Phase::Consent);
        assert!(session.selection_view().is_none());
    }

    #[test]
    fn test_consent_requires_participant() {
        let (mut session, _) = session_at(config(), &["snap-A"]);
        assert!(matches!(
            session.give_consent("   "),
            Err(SurveyError::InvalidTransition(_))
        ));
        assert_eq!(session.phase(), Phase::Consent);
        assert_eq!(session.give_consent("pid").unwrap(), Phase::Screening);
        assert!(session.aggregate().metadata().consent_timestamp.is_some());
    }

    #[test]
    fn test_screening_blocked_until_complete() {
        let (mut session, _) = session_at(config(), &["snap-A"]);
        session.give_consent("pid").unwrap();
        assert!(session.advance().is_err());
        session.toggle_interest("Games", true).unwrap();
        assert!(session.advance().is_err());
        session.answer_screener_attention_check(2).unwrap();
        assert_eq!(session.advance().unwrap(), Phase::Selection);
        assert_eq!(session.current_snapshot(), Some("snap-A"));
    }

    #[test]
    fn test_invalid_bootstrap_halts_progression() {
        let clock = ManualClock::new(Utc::now());
        let mut session = SurveySession::new(config(), Arc::new(clock)).unwrap();
        session
            .accept_bootstrap(BootstrapOutcome::Invalid("unknown participant".into()))
            .unwrap();
        session.give_consent("pid").unwrap();
        session.toggle_interest("Games", true).unwrap();
        session.answer_screener_attention_check(2).unwrap();

        assert!(matches!(
            session.advance(),
            Err(SurveyError::BootstrapInvalid(_))
        ));
        assert_eq!(session.phase(), Phase::Screening);
    }

    #[test]
    fn test_awaiting_bootstrap_blocks_selection() {
        let clock = ManualClock::new(Utc::now());
        let mut session = SurveySession::new(config(), Arc::new(clock)).unwrap();
        session.give_consent("pid").unwrap();
        session.toggle_interest("Games", true).unwrap();
        session.answer_screener_attention_check(2).unwrap();

        assert!(matches!(
            session.advance(),
            Err(SurveyError::InvalidTransition(_))
        ));

        session
            .accept_bootstrap(BootstrapOutcome::TimedOut)
            .unwrap();
        assert_eq!(session.bootstrap_status(), &BootstrapStatus::TimedOut);
        assert!(matches!(
            session.advance(),
            Err(SurveyError::BootstrapInvalid(_))
        ));
    }

    #[test]
    fn test_unavailable_snapshot_blocks_entry() {
        let clock = ManualClock::new(Utc::now());
        let mut session = SurveySession::new(config(), Arc::new(clock)).unwrap();
        let response = BootstrapResponse::from_json(
            r#"{"valid": true, "feeds": ["snap-A"], "feedData": {}}"#,
        )
        .unwrap();
        session
            .accept_bootstrap(BootstrapOutcome::Valid(response))
            .unwrap();
        session.give_consent("pid").unwrap();
        session.toggle_interest("Games", true).unwrap();
        session.answer_screener_attention_check(2).unwrap();

        assert!(matches!(
            session.advance(),
            Err(SurveyError::SnapshotUnavailable(_))
        ));
        assert_eq!(session.phase(), Phase::Screening);
    }

    #[test]
    fn test_select_before_reveal_is_rejected() {
        let (mut session, _) = session_at(config(), &["snap-A"]);
        into_selection(&mut session);
        assert!(matches!(
            session.select("snap-A-p0"),
            Err(SurveyError::SelectionClosed(_))
        ));
    }

    #[test]
    fn test_fourth_selection_rejected_without_state_change() {
        let (mut session, _) = session_at(config(), &["snap-A"]);
        into_selection(&mut session);
        session.reveal_feed().unwrap();
        for post in ["snap-A-p0", "snap-A-p1", "snap-A-p2"] {
            session.select(post).unwrap();
        }

        let log_len = session.selection_view().unwrap().log().len();
        assert!(matches!(
            session.select("snap-A-p3"),
            Err(SurveyError::SelectionLimit(_))
        ));

        let view = session.selection_view().unwrap();
        assert_eq!(view.selected().len(), 3);
        assert!(!view.is_selected("snap-A-p3"));
        assert_eq!(view.log().len(), log_len);
        assert!(!view.can_select());
        assert!(view.can_continue());
    }

    #[test]
    fn test_unknown_post_rejected() {
        let (mut session, _) = session_at(config(), &["snap-A"]);
        into_selection(&mut session);
        session.reveal_feed().unwrap();
        assert!(matches!(
            session.select("nope"),
            Err(SurveyError::UnknownPost(_))
        ));
        assert!(matches!(
            session.unselect("snap-A-p0"),
            Err(SurveyError::UnknownPost(_))
        ));
    }

    #[test]
    fn test_empty_selection_cannot_continue() {
        let (mut session, _) = session_at(config(), &["snap-A"]);
        into_selection(&mut session);
        session.reveal_feed().unwrap();
        assert!(matches!(
            session.advance(),
            Err(SurveyError::InvalidTransition(_))
        ));
        assert_eq!(session.phase(), Phase::Selection);
    }

    #[test]
    fn test_expiry_blocks_selection_but_not_unselection() {
        let (mut session, _) = session_at(config(), &["snap-A"]);
        into_selection(&mut session);
        session.reveal_feed().unwrap();
        session.select("snap-A-p0").unwrap();

        let mut expirations = 0;
        for _ in 0..120 {
            if session.tick() == TickOutcome::Expired {
                expirations += 1;
            }
        }
        assert_eq!(expirations, 1);
        assert_eq!(session.tick(), TickOutcome::Idle);

        let view = session.selection_view().unwrap();
        assert_eq!(view.remaining_secs(), 0);
        assert!(view.time_expired());
        let expired_entries = view
            .log()
            .iter()
            .filter(|e| e.action == SelectionAction::TimeExpired)
            .count();
        assert_eq!(expired_entries, 1);

        assert!(matches!(
            session.select("snap-A-p1"),
            Err(SurveyError::SelectionClosed(_))
        ));
        session.unselect("snap-A-p0").unwrap();
        assert!(session.advance().is_err());
        assert_eq!(session.phase(), Phase::Selection);
    }

    #[test]
    fn test_expiry_still_admits_the_minimum_selection() {
        let (mut session, _) = session_at(config(), &["snap-A"]);
        into_selection(&mut session);
        session.reveal_feed().unwrap();
        for _ in 0..120 {
            session.tick();
        }
        assert!(session.selection_view().unwrap().can_select());

        session.select("snap-A-p3").unwrap();
        assert!(!session.selection_view().unwrap().can_select());
        assert!(matches!(
            session.select("snap-A-p4"),
            Err(SurveyError::SelectionClosed(_))
        ));

        assert_eq!(session.advance().unwrap(), Phase::Rating);
        let selection = session
            .aggregate()
            .entry("snap-A")
            .and_then(|e| e.selection.clone())
            .unwrap();
        assert!(selection.time_expired);
        assert_eq!(selection.selected_posts, vec!["snap-A-p3"]);
    }

    #[test]
    fn test_stale_epoch_tick_is_ignored() {
        let (mut session, _) = session_at(config(), &["snap-A", "snap-B"]);
        into_selection(&mut session);
        session.reveal_feed().unwrap();
        let epoch = session.countdown_epoch();
        session.select("snap-A-p0").unwrap();
        session.advance().unwrap();

        assert_eq!(session.tick_countdown(epoch), TickOutcome::Idle);
        let view = session.rating_view().unwrap();
        assert!(view.log().is_empty());
    }

    #[test]
    fn test_end_to_end_selection_duration() {
        let (mut session, clock) = session_at(config(), &["snap-A", "snap-B"]);
        into_selection(&mut session);

        clock.advance_secs(10);
        session.reveal_feed().unwrap();
        session.select("snap-A-p1").unwrap();
        session.select("snap-A-p2").unwrap();

        clock.advance_secs(35);
        assert_eq!(session.advance().unwrap(), Phase::Rating);

        let entry = session.aggregate().entry("snap-A").unwrap();
        let selection = entry.selection.as_ref().unwrap();
        assert_eq!(selection.selection_duration, Some(35.0));
        assert_eq!(selection.selected_posts, vec!["snap-A-p1", "snap-A-p2"]);
        assert_eq!(selection.non_selected_posts.len(), 3);
        assert!(!selection.time_expired);
        assert!(selection
            .selection_logs
            .iter()
            .all(|e| e.action != SelectionAction::TimeExpired));
        assert_eq!(
            selection
                .selection_logs
                .iter()
                .filter(|e| e.action == SelectionAction::End)
                .count(),
            1
        );

        let view = session.rating_view().unwrap();
        assert_eq!(view.required_count(), 5);
        assert_eq!(view.sampled(), selection.non_selected_posts.as_slice());
        for sampled in view.sampled() {
            assert!(!selection.selected_posts.contains(sampled));
        }

        rate_everything(&mut session);
        assert_eq!(session.advance().unwrap(), Phase::Selection);
        assert_eq!(session.current_snapshot(), Some("snap-B"));

        let entry = session.aggregate().entry("snap-A").unwrap();
        let rating = entry.rating.as_ref().unwrap();
        assert_eq!(rating.ratings.len(), 5);
        assert_eq!(
            rating
                .rating_logs
                .iter()
                .filter(|e| e.action == RatingAction::End)
                .count(),
            1
        );
    }

    #[test]
    fn test_rating_requires_all_required_posts() {
        let (mut session, _) = session_at(config(), &["snap-A"]);
        into_selection(&mut session);
        session.reveal_feed().unwrap();
        session.select("snap-A-p0").unwrap();
        session.advance().unwrap();

        session.rate_post("snap-A-p0", Rating::new(1, 2, 3)).unwrap();
        assert!(matches!(
            session.advance(),
            Err(SurveyError::InvalidTransition(_))
        ));
        assert!(!session.rating_view().unwrap().can_continue());

        rate_everything(&mut session);
        assert!(session.rating_view().unwrap().can_continue());
        assert_eq!(session.advance().unwrap(), Phase::ExitQuestionnaire);
    }

    #[test]
    fn test_rating_popup_flow_logs_each_action() {
        let (mut session, _) = session_at(config(), &["snap-A"]);
        into_selection(&mut session);
        session.reveal_feed().unwrap();
        session.select("snap-A-p0").unwrap();
        session.advance().unwrap();

        assert!(matches!(
            session.open_rating("snap-A-missing"),
            Err(SurveyError::UnknownPost(_))
        ));

        session.open_rating("snap-A-p0").unwrap();
        session
            .set_rating_dimension(RatingDimension::Relevance, 6)
            .unwrap();
        assert!(matches!(
            session.set_rating_dimension(RatingDimension::Trust, 0),
            Err(SurveyError::InvalidRating(_))
        ));
        assert!(matches!(
            session.submit_rating(),
            Err(SurveyError::InvalidRating(_))
        ));
        session.close_rating().unwrap();

        session.open_rating("snap-A-p0").unwrap();
        session
            .set_rating_dimension(RatingDimension::Relevance, 6)
            .unwrap();
        session.set_rating_dimension(RatingDimension::Trust, 2).unwrap();
        session
            .set_rating_dimension(RatingDimension::Quality, 7)
            .unwrap();
        session.submit_rating().unwrap();

        session.open_rating("snap-A-p0").unwrap();
        let view = session.rating_view().unwrap();
        assert_eq!(view.open_rating(), Some(Rating::new(6, 2, 7)));
        let actions: Vec<RatingAction> = view.log().iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                RatingAction::Open,
                RatingAction::Rate,
                RatingAction::Close,
                RatingAction::Open,
                RatingAction::Rate,
                RatingAction::Rate,
                RatingAction::Rate,
                RatingAction::Submit,
                RatingAction::Edit,
            ]
        );

        assert!(matches!(
            session.advance(),
            Err(SurveyError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_attention_check_on_configured_feed() {
        let config = SessionConfig {
            rng_seed: Some(5),
            attention_check_feed: Some(0),
            ..Default::default()
        };
        let (mut session, _) = session_at(config, &["snap-A"]);
        into_selection(&mut session);
        session.reveal_feed().unwrap();
        session.select("snap-A-p0").unwrap();
        session.advance().unwrap();

        let view = session.rating_view().unwrap();
        let attention = view.attention_check_post().unwrap().to_string();
        assert_eq!(view.required_count(), 5);
        assert!(!view.sampled().contains(&attention));
        assert_ne!(attention, "snap-A-p0");

        let targets = view.targets();
        assert!(targets.last().unwrap().attention_check);

        rate_everything(&mut session);
        session.advance().unwrap();

        let rating = session
            .aggregate()
            .entry("snap-A")
            .and_then(|e| e.rating.clone())
            .unwrap();
        assert_eq!(rating.attention_check_post.as_deref(), Some(attention.as_str()));
        assert!(!rating.ratings.contains_key(&attention));
        assert_eq!(rating.attention_check_passed(2), Some(false));
        assert_eq!(rating.attention_check_passed(4), Some(false));
    }

    #[test]
    fn test_attention_check_skipped_without_spare_post() {
        let config = SessionConfig {
            rng_seed: Some(5),
            attention_check_feed: Some(0),
            non_selected_sample_size: 9,
            ..Default::default()
        };
        let (mut session, _) = session_at(config, &["snap-A"]);
        into_selection(&mut session);
        session.reveal_feed().unwrap();
        session.select("snap-A-p0").unwrap();
        session.advance().unwrap();

        let view = session.rating_view().unwrap();
        assert_eq!(view.sampled().len(), 9);
        assert!(view.attention_check_post().is_none());
    }

    #[test]
    fn test_sample_is_fixed_after_entry() {
        let (mut session, _) = session_at(config(), &["snap-A"]);
        into_selection(&mut session);
        session.reveal_feed().unwrap();
        session.select("snap-A-p0").unwrap();
        session.advance().unwrap();

        let first: Vec<PostId> = session.rating_view().unwrap().sampled().to_vec();
        let second: Vec<PostId> = session.rating_view().unwrap().sampled().to_vec();
        assert_eq!(first, second);
    }

    #[test]
    fn test_exit_and_finalize() {
        let (mut session, clock) = session_at(config(), &["snap-A"]);
        into_selection(&mut session);
        session.reveal_feed().unwrap();
        session.select("snap-A-p0").unwrap();
        session.advance().unwrap();
        rate_everything(&mut session);
        session.advance().unwrap();

        assert!(session.finalize().is_err());

        let exit = session.exit_answers();
        let selected_example = exit.selected_post_example.clone().unwrap();
        assert_eq!(selected_example.feed_uuid, "snap-A");
        assert_eq!(selected_example.post_uuid, "snap-A-p0");
        let non_selected_example = exit.non_selected_post_example.clone().unwrap();
        assert_ne!(non_selected_example.post_uuid, "snap-A-p0");

        assert!(session.advance().is_err());
        for field in session.config().required_exit_fields.clone() {
            session.set_exit_field(&field, "because").unwrap();
        }
        assert!(!session.can_submit_exit());
        session.set_exit_field(POST_LIKELIHOOD_FIELD, "6").unwrap();
        assert!(session.can_submit_exit());

        clock.advance_secs(30);
        assert_eq!(session.advance().unwrap(), Phase::Done);
        assert!(matches!(
            session.advance(),
            Err(SurveyError::InvalidTransition(_))
        ));

        let doc = session.finalize().unwrap();
        assert_eq!(doc.metadata.participant_id.as_deref(), Some("participant-1"));
        assert_eq!(doc.feeds, vec!["snap-A"]);
        assert!(doc.answers["snap-A"].is_complete());
        assert_eq!(doc.exit.as_ref().unwrap().exit_duration, 30.0);
        assert_eq!(doc.metadata.total_duration, Some(30.0));
        assert_eq!(doc.metadata.submission_status, SubmissionStatus::Unsubmitted);
        assert!(validator::check_document(&doc, session.config()).is_empty());
    }

    #[test]
    fn test_seeded_sessions_sample_identically() {
        let run = || {
            let (mut session, _) = session_at(config(), &["snap-A"]);
            into_selection(&mut session);
            session.reveal_feed().unwrap();
            session.select("snap-A-p4").unwrap();
            session.advance().unwrap();
            session.rating_view().unwrap().sampled().to_vec()
        };
        assert_eq!(run(), run());
    }
}
