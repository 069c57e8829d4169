//! Timed interaction logging
//!
//! Every mutating participant action inside a snapshot phase is appended to an
//! [`InteractionLog`] with a timestamp taken from the session [`Clock`]. Logs
//! are append-only: entries are never removed, reordered or deduplicated.
//!
//! The selection phase also owns a [`Countdown`] that is ticked once per
//! second from a fixed budget down to zero.

use crate::types::{LogEntry, PostId, RatingChange};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
///
/// Used to replay recorded action scripts and to pin timestamps in tests.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    pub fn advance_secs(&self, secs: i64) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += chrono::Duration::seconds(secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Append-only log of timestamped actions for one snapshot phase
#[derive(Clone)]
pub struct InteractionLog<A> {
    clock: Arc<dyn Clock>,
    entries: Vec<LogEntry<A>>,
}

impl<A: Clone> InteractionLog<A> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Vec::new(),
        }
    }

    /// Stamp the current time and append an entry.
    ///
    /// Timestamps never go backwards within a log, even if the clock does.
    pub fn append(
        &mut self,
        action: A,
        post: Option<&str>,
        change: Option<RatingChange>,
    ) -> &LogEntry<A> {
        let mut timestamp = self.clock.now();
        if let Some(last) = self.entries.last() {
            timestamp = timestamp.max(last.timestamp);
        }

        self.entries.push(LogEntry {
            timestamp,
            action,
            post: post.map(PostId::from),
            change,
        });

        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[LogEntry<A>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn into_entries(self) -> Vec<LogEntry<A>> {
        self.entries
    }
}

impl<A: std::fmt::Debug> std::fmt::Debug for InteractionLog<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractionLog")
            .field("entries", &self.entries)
            .finish()
    }
}

/// Default selection budget in seconds
pub const DEFAULT_SELECTION_BUDGET_SECS: u32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownStatus {
    Idle,
    Running,
    Expired,
    Cancelled,
}

/// Result of a single countdown tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The countdown is not running; nothing changed
    Idle,
    Running { remaining_secs: u32 },
    /// This tick reached zero
    Expired,
}

/// One-second countdown owned by a selection phase
#[derive(Debug, Clone)]
pub struct Countdown {
    budget_secs: u32,
    remaining_secs: u32,
    status: CountdownStatus,
}

impl Countdown {
    pub fn new(budget_secs: u32) -> Self {
        Self {
            budget_secs,
            remaining_secs: budget_secs,
            status: CountdownStatus::Idle,
        }
    }

    pub fn start(&mut self) {
        self.remaining_secs = self.budget_secs;
        self.status = CountdownStatus::Running;
    }

    /// Decrement by one second; reaching zero expires the countdown exactly once
    pub fn tick(&mut self) -> TickOutcome {
        if self.status != CountdownStatus::Running {
            return TickOutcome::Idle;
        }

        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs == 0 {
            self.status = CountdownStatus::Expired;
            TickOutcome::Expired
        } else {
            TickOutcome::Running {
                remaining_secs: self.remaining_secs,
            }
        }
    }

    pub fn cancel(&mut self) {
        if self.status == CountdownStatus::Running {
            self.status = CountdownStatus::Cancelled;
        }
    }

    pub fn status(&self) -> CountdownStatus {
        self.status
    }

    pub fn remaining_secs(&self) -> u32 {
        match self.status {
            CountdownStatus::Expired => 0,
            _ => self.remaining_secs,
        }
    }

    pub fn budget_secs(&self) -> u32 {
        self.budget_secs
    }
}

/// Format seconds as `MM:SS` for a countdown display
pub fn format_remaining(secs: u32) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RatingAction, RatingDimension, SelectionAction};
    use chrono::TimeZone;

    fn clock_at(secs: i64) -> ManualClock {
        ManualClock::new(Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap())
    }

    #[test]
    fn test_identical_appends_are_not_deduplicated() {
        let clock = clock_at(0);
        let mut log = InteractionLog::new(Arc::new(clock.clone()));

        log.append(SelectionAction::Select, Some("p1"), None);
        log.append(SelectionAction::Select, Some("p1"), None);

        assert_eq!(log.len(), 2);
        assert!(log.entries()[0].timestamp <= log.entries()[1].timestamp);
    }

    #[test]
    fn test_timestamps_never_go_backwards() {
        let clock = clock_at(50);
        let mut log = InteractionLog::new(Arc::new(clock.clone()));

        log.append(SelectionAction::Start, None, None);
        clock.advance_secs(-30);
        log.append(SelectionAction::Select, Some("p1"), None);

        let entries = log.entries();
        assert_eq!(entries[1].timestamp, entries[0].timestamp);
    }

    #[test]
    fn test_rate_entry_carries_change() {
        let mut log = InteractionLog::new(Arc::new(clock_at(0)));
        let change = RatingChange {
            dimension: RatingDimension::Quality,
            value: 6,
        };
        let entry = log.append(RatingAction::Rate, Some("p3"), Some(change)).clone();

        assert_eq!(entry.post.as_deref(), Some("p3"));
        assert_eq!(entry.change, Some(change));

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["action"], "rate");
        assert_eq!(json["change"]["dimension"], "quality");
    }

    #[test]
    fn test_countdown_expires_after_budget() {
        let mut countdown = Countdown::new(DEFAULT_SELECTION_BUDGET_SECS);
        countdown.start();

        let mut expirations = 0;
        for _ in 0..119 {
            assert!(matches!(countdown.tick(), TickOutcome::Running { .. }));
        }
        if countdown.tick() == TickOutcome::Expired {
            expirations += 1;
        }

        assert_eq!(expirations, 1);
        assert_eq!(countdown.remaining_secs(), 0);
        assert_eq!(countdown.tick(), TickOutcome::Idle);
        assert_eq!(countdown.remaining_secs(), 0);
    }

    #[test]
    fn test_cancelled_countdown_ignores_ticks() {
        let mut countdown = Countdown::new(10);
        countdown.start();
        countdown.tick();
        countdown.cancel();

        assert_eq!(countdown.tick(), TickOutcome::Idle);
        assert_eq!(countdown.remaining_secs(), 9);
        assert_eq!(countdown.status(), CountdownStatus::Cancelled);
    }

    #[test]
    fn test_idle_countdown_does_not_tick() {
        let mut countdown = Countdown::new(10);
        assert_eq!(countdown.tick(), TickOutcome::Idle);
        assert_eq!(countdown.remaining_secs(), 10);
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(120), "02:00");
        assert_eq!(format_remaining(65), "01:05");
        assert_eq!(format_remaining(0), "00:00");
    }
}
