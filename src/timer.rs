//! Selection countdown driver
//!
//! Runs the one-second ticker of a selection phase on the tokio runtime. The
//! ticker only ever calls [`SurveySession::tick_countdown`] with the epoch it
//! was started for, so a ticker that outlives its phase cannot touch the next
//! one. Cancellation goes through a [`CancellationToken`] and the task handle
//! is aborted as well.

use crate::error::SurveyError;
use crate::logger::TickOutcome;
use crate::session::SurveySession;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Session shared between the host and the countdown task
pub type SharedSession = Arc<Mutex<SurveySession>>;

struct Ticker {
    epoch: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct CountdownDriver {
    session: SharedSession,
    tick_interval: Duration,
    ticker: Mutex<Option<Ticker>>,
}

impl CountdownDriver {
    pub fn new(session: SharedSession) -> Self {
        Self::with_interval(session, Duration::from_secs(1))
    }

    pub fn with_interval(session: SharedSession, tick_interval: Duration) -> Self {
        Self {
            session,
            tick_interval,
            ticker: Mutex::new(None),
        }
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    /// Reveal the current feed and start ticking its countdown
    pub async fn reveal(&self) -> Result<u64, SurveyError> {
        let epoch = {
            let mut session = self.session.lock().await;
            session.reveal_feed()?;
            session.countdown_epoch()
        };
        self.spawn_ticker(epoch).await;
        Ok(epoch)
    }

    /// Stop the running ticker, if any
    pub async fn cancel(&self) {
        if let Some(ticker) = self.ticker.lock().await.take() {
            debug!("countdown ticker cancelled epoch={}", ticker.epoch);
            ticker.token.cancel();
            ticker.handle.abort();
        }
    }

    /// Whether a ticker task is still running
    pub async fn is_running(&self) -> bool {
        self.ticker
            .lock()
            .await
            .as_ref()
            .map(|t| !t.handle.is_finished())
            .unwrap_or(false)
    }

    async fn spawn_ticker(&self, epoch: u64) {
        self.cancel().await;

        let session = self.session.clone();
        let tick_interval = self.tick_interval;
        let token = CancellationToken::new();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + tick_interval, tick_interval);
            loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let outcome = session.lock().await.tick_countdown(epoch);
                match outcome {
                    TickOutcome::Running { .. } => {}
                    TickOutcome::Expired => {
                        info!("countdown expired epoch={}", epoch);
                        break;
                    }
                    TickOutcome::Idle => {
                        debug!("countdown ticker stale epoch={}", epoch);
                        break;
                    }
                }
            }
        });

        *self.ticker.lock().await = Some(Ticker {
            epoch,
            token,
            handle,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::{BootstrapOutcome, BootstrapResponse};
    use crate::config::SessionConfig;
    use crate::logger::ManualClock;
    use crate::types::{Phase, SelectionAction};
    use chrono::Utc;

    fn shared_session() -> SharedSession {
        let config = SessionConfig {
            rng_seed: Some(3),
            attention_check_feed: None,
            ..Default::default()
        };
        let clock = ManualClock::new(Utc::now());
        let mut session = SurveySession::new(config, Arc::new(clock)).unwrap();
        let response = BootstrapResponse::from_json(
            r#"{"valid": true, "feeds": ["snap-A"], "feedData": {"snap-A": [
                {"uuid": "p1", "x": 0, "y": 0, "width": 400, "height": 200},
                {"uuid": "p2", "x": 0, "y": 210, "width": 400, "height": 200},
                {"uuid": "p3", "x": 0, "y": 420, "width": 400, "height": 200},
                {"uuid": "p4", "x": 0, "y": 630, "width": 400, "height": 200}
            ]}}"#,
        )
        .unwrap();
        session
            .accept_bootstrap(BootstrapOutcome::Valid(response))
            .unwrap();
        session.give_consent("pid").unwrap();
        session.toggle_interest("News", true).unwrap();
        session.answer_screener_attention_check(1).unwrap();
        session.advance().unwrap();
        Arc::new(Mutex::new(session))
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_expires_after_budget() {
        let session = shared_session();
        let driver = CountdownDriver::new(session.clone());
        driver.reveal().await.unwrap();
        session.lock().await.select("p1").unwrap();

        time::sleep(Duration::from_millis(60_500)).await;
        {
            let guard = session.lock().await;
            let view = guard.selection_view().unwrap();
            assert_eq!(view.remaining_secs(), 60);
            assert!(!view.time_expired());
        }

        time::sleep(Duration::from_secs(61)).await;
        let mut guard = session.lock().await;
        let view = guard.selection_view().unwrap();
        assert!(view.time_expired());
        assert_eq!(view.remaining_display(), "00:00");
        let expired = view
            .log()
            .iter()
            .filter(|e| e.action == SelectionAction::TimeExpired)
            .count();
        assert_eq!(expired, 1);

        assert!(guard.select("p2").is_err());
        assert_eq!(guard.advance().unwrap(), Phase::Rating);
        drop(guard);
        assert!(!driver.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_ticker_leaves_session_alone() {
        let session = shared_session();
        let driver = CountdownDriver::new(session.clone());
        driver.reveal().await.unwrap();

        time::sleep(Duration::from_millis(10_500)).await;
        driver.cancel().await;
        time::sleep(Duration::from_secs(300)).await;

        let guard = session.lock().await;
        let view = guard.selection_view().unwrap();
        assert_eq!(view.remaining_secs(), 110);
        assert!(!view.time_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_stops_when_phase_ends() {
        let session = shared_session();
        let driver = CountdownDriver::new(session.clone());
        driver.reveal().await.unwrap();

        {
            let mut guard = session.lock().await;
            guard.select("p3").unwrap();
            guard.advance().unwrap();
        }

        time::sleep(Duration::from_millis(2_500)).await;
        assert!(!driver.is_running().await);

        let guard = session.lock().await;
        assert_eq!(guard.phase(), Phase::Rating);
        let entry = guard.aggregate().entry("snap-A").unwrap();
        let logs = &entry.selection.as_ref().unwrap().selection_logs;
        assert!(logs.iter().all(|e| e.action != SelectionAction::TimeExpired));
    }
}
