//! Scripted session replay
//!
//! A replay script is newline-delimited JSON: one participant action per line,
//! optionally stamped with `at`, the seconds since the script started. Lines
//! starting with `#` are comments.
//!
//! ```text
//! {"action": "consent", "participant": "pid-1"}
//! {"action": "interest", "name": "Science"}
//! {"at": 12.0, "action": "reveal"}
//! {"at": 20.5, "action": "select", "post": "p3"}
//! ```
//!
//! Rejected actions are recorded in the [`ReplayReport`]; in strict mode the
//! first rejection aborts the replay.

use crate::bootstrap::{BootstrapOutcome, BootstrapResponse};
use crate::error::SurveyError;
use crate::logger::{Clock, ManualClock, TickOutcome};
use crate::session::SurveySession;
use crate::types::{Phase, Rating, RatingDimension};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_ticks() -> u32 {
    1
}

/// One participant action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScriptAction {
    Bootstrap {
        response: BootstrapResponse,
    },
    Consent {
        participant: String,
    },
    AddSubreddit {
        name: String,
    },
    RemoveSubreddit {
        index: usize,
    },
    Interest {
        name: String,
        #[serde(default = "default_true")]
        checked: bool,
    },
    ScreenerAttention {
        value: u8,
    },
    Reveal,
    Select {
        post: String,
    },
    Unselect {
        post: String,
    },
    /// Elapse countdown seconds
    Tick {
        #[serde(default = "default_ticks")]
        count: u32,
    },
    Open {
        post: String,
    },
    Rate {
        dimension: RatingDimension,
        value: u8,
    },
    SubmitRating,
    CloseRating,
    /// Open, answer and submit in one step
    RatePost {
        post: String,
        relevance: u8,
        trust: u8,
        quality: u8,
    },
    ExitField {
        key: String,
        value: String,
    },
    Advance,
}

impl ScriptAction {
    pub fn name(&self) -> &'static str {
        match self {
            ScriptAction::Bootstrap { .. } => "bootstrap",
            ScriptAction::Consent { .. } => "consent",
            ScriptAction::AddSubreddit { .. } => "add_subreddit",
            ScriptAction::RemoveSubreddit { .. } => "remove_subreddit",
            ScriptAction::Interest { .. } => "interest",
            ScriptAction::ScreenerAttention { .. } => "screener_attention",
            ScriptAction::Reveal => "reveal",
            ScriptAction::Select { .. } => "select",
            ScriptAction::Unselect { .. } => "unselect",
            ScriptAction::Tick { .. } => "tick",
            ScriptAction::Open { .. } => "open",
            ScriptAction::Rate { .. } => "rate",
            ScriptAction::SubmitRating => "submit_rating",
            ScriptAction::CloseRating => "close_rating",
            ScriptAction::RatePost { .. } => "rate_post",
            ScriptAction::ExitField { .. } => "exit_field",
            ScriptAction::Advance => "advance",
        }
    }
}

/// A line of a replay script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<f64>,
    #[serde(flatten)]
    pub action: ScriptAction,
}

/// Parse an NDJSON replay script
pub fn parse_script(text: &str) -> Result<Vec<ScriptStep>, SurveyError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|e| {
                SurveyError::ParseError(format!("Script line {}: {}", index + 1, e))
            })
        })
        .collect()
}

/// An action the session refused
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub step: usize,
    pub action: &'static str,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayReport {
    pub applied: usize,
    pub rejected: Vec<Rejection>,
    pub expirations: usize,
    pub phase: Phase,
}

/// Drive `session` through `steps`, moving `clock` to each step's offset
pub fn replay(
    session: &mut SurveySession,
    clock: &ManualClock,
    steps: &[ScriptStep],
    strict: bool,
) -> Result<ReplayReport, SurveyError> {
    let origin = clock.now();
    let mut report = ReplayReport {
        applied: 0,
        rejected: Vec::new(),
        expirations: 0,
        phase: session.phase(),
    };

    for (index, step) in steps.iter().enumerate() {
        if let Some(at) = step.at {
            let Some(target) = offset_from(origin, at) else {
                let e = SurveyError::ParseError(format!(
                    "Script step {}: offset {} is not a usable number of seconds",
                    index + 1,
                    at
                ));
                if strict {
                    return Err(e);
                }
                warn!("replay rejected step={} error={}", index + 1, e);
                report.rejected.push(Rejection {
                    step: index + 1,
                    action: step.action.name(),
                    error: e.to_string(),
                });
                continue;
            };
            if target > clock.now() {
                clock.set(target);
            }
        }

        debug!("replay step={} action={}", index + 1, step.action.name());
        match apply(session, &step.action) {
            Ok(expired) => {
                report.applied += 1;
                report.expirations += expired;
            }
            Err(e) if strict || !e.is_recoverable() => return Err(e),
            Err(e) => {
                warn!(
                    "replay rejected step={} action={} error={}",
                    index + 1,
                    step.action.name(),
                    e
                );
                report.rejected.push(Rejection {
                    step: index + 1,
                    action: step.action.name(),
                    error: e.to_string(),
                });
            }
        }
    }

    report.phase = session.phase();
    Ok(report)
}

/// `origin` moved forward by `at` seconds, if that instant is representable
fn offset_from(origin: DateTime<Utc>, at: f64) -> Option<DateTime<Utc>> {
    let millis = (at * 1000.0).round();
    if !millis.is_finite() || millis < 0.0 || millis > i64::MAX as f64 {
        return None;
    }
    origin.checked_add_signed(chrono::Duration::try_milliseconds(millis as i64)?)
}

fn apply(session: &mut SurveySession, action: &ScriptAction) -> Result<usize, SurveyError> {
    match action {
        ScriptAction::Bootstrap { response } => {
            session.accept_bootstrap(BootstrapOutcome::from_response(response.clone()))?
        }
        ScriptAction::Consent { participant } => {
            session.give_consent(participant)?;
        }
        ScriptAction::AddSubreddit { name } => {
            if !session.add_subreddit(name)? {
                return Err(SurveyError::InvalidTransition(format!(
                    "subreddit {} is empty or already listed",
                    name
                )));
            }
        }
        ScriptAction::RemoveSubreddit { index } => {
            session.remove_subreddit(*index)?;
        }
        ScriptAction::Interest { name, checked } => session.toggle_interest(name, *checked)?,
        ScriptAction::ScreenerAttention { value } => {
            session.answer_screener_attention_check(*value)?
        }
        ScriptAction::Reveal => session.reveal_feed()?,
        ScriptAction::Select { post } => session.select(post)?,
        ScriptAction::Unselect { post } => session.unselect(post)?,
        ScriptAction::Tick { count } => {
            let mut expired = 0;
            for _ in 0..*count {
                if session.tick() == TickOutcome::Expired {
                    expired += 1;
                }
            }
            return Ok(expired);
        }
        ScriptAction::Open { post } => session.open_rating(post)?,
        ScriptAction::Rate { dimension, value } => {
            session.set_rating_dimension(*dimension, *value)?
        }
        ScriptAction::SubmitRating => session.submit_rating()?,
        ScriptAction::CloseRating => session.close_rating()?,
        ScriptAction::RatePost {
            post,
            relevance,
            trust,
            quality,
        } => session.rate_post(post, Rating::new(*relevance, *trust, *quality))?,
        ScriptAction::ExitField { key, value } => session.set_exit_field(key, value)?,
        ScriptAction::Advance => {
            session.advance()?;
        }
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::types::POST_LIKELIHOOD_FIELD;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    const BOOTSTRAP: &str = r#"{"action": "bootstrap", "response": {"valid": true, "feeds": ["snap-A"], "feedData": {"snap-A": [{"uuid": "p1", "x": 0, "y": 0, "width": 400, "height": 200}, {"uuid": "p2", "x": 0, "y": 210, "width": 400, "height": 200}, {"uuid": "p3", "x": 0, "y": 420, "width": 400, "height": 200}, {"uuid": "p4", "x": 0, "y": 630, "width": 400, "height": 200}, {"uuid": "p5", "x": 0, "y": 840, "width": 400, "height": 200}]}}}"#;

    fn session() -> (SurveySession, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 5, 2, 9, 0, 0).unwrap());
        let config = SessionConfig {
            rng_seed: Some(9),
            attention_check_feed: None,
            ..Default::default()
        };
        let session = SurveySession::new(config, Arc::new(clock.clone())).unwrap();
        (session, clock)
    }

    fn opening() -> String {
        [
            BOOTSTRAP,
            r#"{"action": "consent", "participant": "pid-7"}"#,
            r#"# screener"#,
            r#"{"action": "add_subreddit", "name": "r/rust"}"#,
            r#"{"action": "interest", "name": "Technology"}"#,
            r#"{"action": "screener_attention", "value": 2}"#,
            r#"{"action": "advance"}"#,
            r#"{"at": 5, "action": "reveal"}"#,
        ]
        .join("\n")
    }

    #[test]
    fn test_parse_script_skips_comments() {
        let steps = parse_script(&opening()).unwrap();
        assert_eq!(steps.len(), 7);
        assert_eq!(steps[6].at, Some(5.0));
        assert_eq!(steps[6].action, ScriptAction::Reveal);
        assert_eq!(
            steps[1].action,
            ScriptAction::Consent {
                participant: "pid-7".to_string()
            }
        );
    }

    #[test]
    fn test_parse_script_reports_line() {
        let err = parse_script("{\"action\": \"advance\"}\n{\"action\": \"fly\"}").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_replay_collects_rejections() {
        let (mut session, clock) = session();
        let mut script = opening();
        script.push_str(
            r#"
{"at": 8, "action": "select", "post": "p1"}
{"at": 9, "action": "select", "post": "p2"}
{"at": 10, "action": "select", "post": "p3"}
{"at": 11, "action": "select", "post": "p4"}
{"at": 40, "action": "advance"}"#,
        );
        let steps = parse_script(&script).unwrap();
        let report = replay(&mut session, &clock, &steps, false).unwrap();

        assert_eq!(report.phase, Phase::Rating);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].action, "select");
        assert_eq!(report.rejected[0].step, 11);

        let selection = session
            .aggregate()
            .entry("snap-A")
            .and_then(|e| e.selection.clone())
            .unwrap();
        assert_eq!(selection.selection_duration, Some(35.0));
        assert_eq!(selection.selected_posts, vec!["p1", "p2", "p3"]);
    }

    #[test]
    fn test_replay_strict_stops_on_rejection() {
        let (mut session, clock) = session();
        let mut script = opening();
        script.push_str("\n{\"action\": \"advance\"}");
        let steps = parse_script(&script).unwrap();

        assert!(matches!(
            replay(&mut session, &clock, &steps, true),
            Err(SurveyError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_replay_rejects_unusable_offsets() {
        let (mut session, clock) = session();
        let start = clock.now();
        let steps = parse_script(
            "{\"at\": 1e18, \"action\": \"advance\"}\n{\"at\": -3, \"action\": \"advance\"}",
        )
        .unwrap();
        let report = replay(&mut session, &clock, &steps, false).unwrap();

        assert_eq!(report.applied, 0);
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(report.rejected[0].step, 1);
        assert_eq!(report.rejected[1].step, 2);
        assert!(report.rejected[0].error.contains("offset"));
        assert_eq!(clock.now(), start);
        assert_eq!(report.phase, Phase::Consent);

        let (mut strict_session, strict_clock) = self::session();
        assert!(matches!(
            replay(&mut strict_session, &strict_clock, &steps[..1], true),
            Err(SurveyError::ParseError(_))
        ));
    }

    #[test]
    fn test_replay_tick_expires_once() {
        let (mut session, clock) = session();
        let mut script = opening();
        script.push_str(
            "\n{\"action\": \"select\", \"post\": \"p2\"}\n{\"action\": \"tick\", \"count\": 200}\n{\"action\": \"select\", \"post\": \"p3\"}",
        );
        let steps = parse_script(&script).unwrap();
        let report = replay(&mut session, &clock, &steps, false).unwrap();

        assert_eq!(report.expirations, 1);
        assert_eq!(report.rejected.len(), 1);
        assert!(report.rejected[0].error.contains("time expired"));
    }

    #[test]
    fn test_replay_to_done() {
        let (mut session, clock) = session();
        let mut script = opening();
        script.push_str("\n{\"action\": \"select\", \"post\": \"p1\"}\n{\"action\": \"advance\"}");
        let steps = parse_script(&script).unwrap();
        replay(&mut session, &clock, &steps, true).unwrap();

        let mut rest = Vec::new();
        for target in session.rating_view().unwrap().targets() {
            rest.push(ScriptStep {
                at: None,
                action: ScriptAction::RatePost {
                    post: target.post,
                    relevance: 5,
                    trust: 5,
                    quality: 5,
                },
            });
        }
        rest.push(ScriptStep {
            at: None,
            action: ScriptAction::Advance,
        });
        for field in session.config().required_exit_fields.clone() {
            rest.push(ScriptStep {
                at: None,
                action: ScriptAction::ExitField {
                    key: field,
                    value: "text".to_string(),
                },
            });
        }
        rest.push(ScriptStep {
            at: None,
            action: ScriptAction::ExitField {
                key: POST_LIKELIHOOD_FIELD.to_string(),
                value: "3".to_string(),
            },
        });
        rest.push(ScriptStep {
            at: None,
            action: ScriptAction::Advance,
        });

        let report = replay(&mut session, &clock, &rest, true).unwrap();
        assert_eq!(report.phase, Phase::Done);
        assert!(report.rejected.is_empty());
        assert_eq!(session.screener().subreddits, vec!["rust"]);
    }
}
