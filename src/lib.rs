//! Trending Survey - Participant session engine for trending-feed studies
//!
//! A participant consents, answers a screener and then, for each captured
//! feed, selects the posts they consider trending before rating those posts
//! and a random sample of posts they passed over. The session ends with an
//! exit questionnaire and a single submitted document.
//!
//! ## Modules
//!
//! - **Session**: the phase state machine and its countdown driver
//! - **Logging**: timestamped interaction logs for every snapshot phase
//! - **Snapshots**: read-only feed layouts delivered at bootstrap
//! - **Aggregate**: per-snapshot answer bundles and the final document

pub mod aggregate;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod logger;
pub mod script;
pub mod session;
pub mod snapshot;
pub mod submission;
pub mod timer;
pub mod types;
pub mod validator;

pub use aggregate::SurveyAggregate;
pub use bootstrap::{await_bootstrap, BootstrapOutcome, BootstrapRequest, BootstrapResponse};
pub use config::SessionConfig;
pub use error::SurveyError;
pub use logger::{Clock, Countdown, InteractionLog, ManualClock, SystemClock, TickOutcome};
pub use session::{BootstrapStatus, RatingTarget, RatingView, SelectionView, SurveySession};
pub use snapshot::{FeedCatalog, FeedSnapshot};
pub use submission::{submit_session, FileSubmitter, SubmissionReceipt, Submitter};
pub use timer::{CountdownDriver, SharedSession};
pub use types::{Phase, Rating, RatingDimension, SubmissionStatus, SurveyDocument};

/// Engine version embedded in exported documents
pub const SURVEY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for exported documents
pub const PRODUCER_NAME: &str = "trending-survey";
