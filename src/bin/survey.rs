//! Survey CLI - Command-line tools for trending-feed survey sessions
//!
//! Commands:
//! - replay: Drive a session from an NDJSON action script and emit its document
//! - layout: Inspect a feed layout document
//! - validate: Audit a submitted survey document
//! - schema: Print input and output formats

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use trending_survey::script::{self, ReplayReport};
use trending_survey::snapshot::{parse_layout, FeedSnapshot};
use trending_survey::validator::{self, DocumentIssue};
use trending_survey::types::BoundingBox;
use trending_survey::{
    submit_session, BootstrapOutcome, BootstrapResponse, FileSubmitter, ManualClock, Phase,
    SessionConfig, SurveyDocument, SurveyError, SurveySession, PRODUCER_NAME, SURVEY_VERSION,
};

/// Survey - Session engine for trending-feed user studies
#[derive(Parser)]
#[command(name = "survey")]
#[command(version = SURVEY_VERSION)]
#[command(about = "Replay, inspect and audit trending-feed survey sessions", long_about = None)]
struct Cli {
    /// Log session activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay an action script and write the finished document
    Replay {
        /// Script file path (use - for stdin)
        #[arg(short, long)]
        script: PathBuf,

        /// Bootstrap response (JSON) accepted before the first action
        #[arg(short, long)]
        bootstrap: Option<PathBuf>,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Session configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Clock origin of the script (RFC 3339), defaults to now
        #[arg(long)]
        start: Option<DateTime<Utc>>,

        /// Abort on the first rejected action
        #[arg(long)]
        strict: bool,

        /// Print the replay report to stderr
        #[arg(long)]
        report: bool,
    },

    /// Inspect a feed layout document
    Layout {
        /// Layout file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Audit a survey document
    Validate {
        /// Document file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Session configuration the document was produced with
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print format information
    Schema {
        #[arg(value_enum)]
        schema_type: SchemaType,
    },
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Replay script actions
    Script,
    /// Session configuration with defaults
    Config,
    /// Submitted survey document
    Document,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), SurveyCliError> {
    match cli.command {
        Commands::Replay {
            script,
            bootstrap,
            output,
            config,
            start,
            strict,
            report,
        } => cmd_replay(
            &script,
            bootstrap.as_deref(),
            &output,
            config.as_deref(),
            start,
            strict,
            report,
        ),

        Commands::Layout { input, json } => cmd_layout(&input, json),

        Commands::Validate {
            input,
            config,
            json,
        } => cmd_validate(&input, config.as_deref(), json),

        Commands::Schema { schema_type } => cmd_schema(schema_type),
    }
}

fn read_input(input: &Path) -> Result<String, SurveyCliError> {
    if input.to_string_lossy() == "-" {
        if atty::is(atty::Stream::Stdin) {
            return Err(SurveyCliError::InteractiveStdin);
        }
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn load_config(path: Option<&Path>) -> Result<SessionConfig, SurveyCliError> {
    match path {
        Some(path) => Ok(SessionConfig::from_path(path)?),
        None => Ok(SessionConfig::default()),
    }
}

fn cmd_replay(
    script_path: &Path,
    bootstrap: Option<&Path>,
    output: &Path,
    config: Option<&Path>,
    start: Option<DateTime<Utc>>,
    strict: bool,
    print_report: bool,
) -> Result<(), SurveyCliError> {
    let steps = script::parse_script(&read_input(script_path)?)?;
    let config = load_config(config)?;

    let clock = ManualClock::new(start.unwrap_or_else(Utc::now));
    let mut session = SurveySession::new(config, Arc::new(clock.clone()))?;
    if let Some(path) = bootstrap {
        let response = BootstrapResponse::from_json(&fs::read_to_string(path)?)?;
        session.accept_bootstrap(BootstrapOutcome::from_response(response))?;
    }
    let report = script::replay(&mut session, &clock, &steps, strict)?;

    if print_report {
        eprintln!("{}", serde_json::to_string_pretty(&report)?);
    }
    if report.phase != Phase::Done {
        return Err(SurveyCliError::Unfinished(report));
    }

    if output.to_string_lossy() == "-" {
        let document = session.finalize()?;
        let mut stdout = io::stdout();
        writeln!(stdout, "{}", serde_json::to_string_pretty(&document)?)?;
        stdout.flush()?;
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let submitter = FileSubmitter::new(output);
    let receipt = runtime.block_on(submit_session(&mut session, &submitter))?;
    eprintln!(
        "{}",
        serde_json::to_string(&serde_json::json!({
            "session_id": session.session_id(),
            "status": session.submission_status(),
            "completion_code": receipt.completion_code,
            "output": output.display().to_string(),
        }))?
    );
    Ok(())
}

fn cmd_layout(input: &Path, json: bool) -> Result<(), SurveyCliError> {
    let posts = parse_layout(&read_input(input)?)?;
    let id = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "stdin".to_string());
    let snapshot = FeedSnapshot::new(id, posts)?;

    let summary = LayoutSummary {
        snapshot: snapshot.id().to_string(),
        posts: snapshot.posts().len(),
        feed_height: snapshot.feed_height(),
        posts_in_order: snapshot
            .posts()
            .iter()
            .map(|p| PostSummary {
                id: p.id.clone(),
                bounds: p.bounds,
                center_y: p.bounds.center_y(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Snapshot: {}", summary.snapshot);
        println!("Posts: {}", summary.posts);
        println!("Feed height: {:.0}px", summary.feed_height);
        for post in &summary.posts_in_order {
            println!(
                "  {} x={:.0} y={:.0} {:.0}x{:.0} (center y {:.0})",
                post.id,
                post.bounds.x,
                post.bounds.y,
                post.bounds.width,
                post.bounds.height,
                post.center_y
            );
        }
    }
    Ok(())
}

fn cmd_validate(input: &Path, config: Option<&Path>, json: bool) -> Result<(), SurveyCliError> {
    let document: SurveyDocument = serde_json::from_str(&read_input(input)?)?;
    let config = load_config(config)?;
    let issues = validator::check_document(&document, &config);

    let report = ValidationReport {
        session_id: document.metadata.session_id.clone(),
        feeds: document.feeds.len(),
        valid: issues.is_empty(),
        issues,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Session: {}", report.session_id);
        println!("Feeds: {}", report.feeds);
        if report.valid {
            println!("Document is valid");
        }
        for issue in &report.issues {
            match &issue.feed {
                Some(feed) => println!("  [{}] {}", feed, issue.message),
                None => println!("  {}", issue.message),
            }
        }
    }

    if report.valid {
        Ok(())
    } else {
        Err(SurveyCliError::ValidationFailed(report.issues.len()))
    }
}

fn cmd_schema(schema_type: SchemaType) -> Result<(), SurveyCliError> {
    match schema_type {
        SchemaType::Script => {
            println!("Replay script (NDJSON, one action per line, optional \"at\" seconds)");
            println!();
            for line in [
                r#"{"action": "bootstrap", "response": {"valid": true, "feeds": ["..."], "feedData": {}}}"#,
                r#"{"action": "consent", "participant": "PID"}"#,
                r#"{"action": "add_subreddit", "name": "r/rust"}"#,
                r#"{"action": "remove_subreddit", "index": 0}"#,
                r#"{"action": "interest", "name": "Science", "checked": true}"#,
                r#"{"action": "screener_attention", "value": 2}"#,
                r#"{"at": 3.0, "action": "reveal"}"#,
                r#"{"at": 9.5, "action": "select", "post": "POST"}"#,
                r#"{"action": "unselect", "post": "POST"}"#,
                r#"{"action": "tick", "count": 120}"#,
                r#"{"action": "open", "post": "POST"}"#,
                r#"{"action": "rate", "dimension": "relevance", "value": 5}"#,
                r#"{"action": "submit_rating"}"#,
                r#"{"action": "close_rating"}"#,
                r#"{"action": "rate_post", "post": "POST", "relevance": 5, "trust": 4, "quality": 6}"#,
                r#"{"action": "exit_field", "key": "age", "value": "25-34"}"#,
                r#"{"action": "advance"}"#,
            ] {
                println!("{}", line);
            }
        }
        SchemaType::Config => {
            println!("{}", serde_json::to_string_pretty(&SessionConfig::default())?);
        }
        SchemaType::Document => {
            println!("Survey document ({} {})", PRODUCER_NAME, SURVEY_VERSION);
            println!();
            println!("Top level:");
            println!("  session_id, participant_id, study_id, consent_timestamp,");
            println!("  exit_timestamp, total_duration, submission_status,");
            println!("  feeds, screener, answers, exit, finalized_at");
            println!();
            println!("answers.<snapshot>:");
            println!("  selected_posts, non_selected_posts, selection_start, selection_end,");
            println!("  selection_duration, time_expired, selection_logs,");
            println!("  ratings, attention_check_post, attention_check_answer,");
            println!("  rating_start, rating_end, rating_duration, rating_logs");
        }
    }
    Ok(())
}

// Report types

#[derive(serde::Serialize)]
struct LayoutSummary {
    snapshot: String,
    posts: usize,
    feed_height: f64,
    posts_in_order: Vec<PostSummary>,
}

#[derive(serde::Serialize)]
struct PostSummary {
    id: String,
    #[serde(flatten)]
    bounds: BoundingBox,
    center_y: f64,
}

#[derive(serde::Serialize)]
struct ValidationReport {
    session_id: String,
    feeds: usize,
    valid: bool,
    issues: Vec<DocumentIssue>,
}

// Error types

#[derive(Debug)]
enum SurveyCliError {
    Io(io::Error),
    Survey(SurveyError),
    Json(serde_json::Error),
    Unfinished(ReplayReport),
    ValidationFailed(usize),
    InteractiveStdin,
}

impl From<io::Error> for SurveyCliError {
    fn from(e: io::Error) -> Self {
        SurveyCliError::Io(e)
    }
}

impl From<SurveyError> for SurveyCliError {
    fn from(e: SurveyError) -> Self {
        SurveyCliError::Survey(e)
    }
}

impl From<serde_json::Error> for SurveyCliError {
    fn from(e: serde_json::Error) -> Self {
        SurveyCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<SurveyCliError> for CliError {
    fn from(e: SurveyCliError) -> Self {
        match e {
            SurveyCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            SurveyCliError::Survey(e) => CliError {
                code: "SESSION_ERROR".to_string(),
                message: e.to_string(),
                hint: e
                    .is_recoverable()
                    .then(|| "Fix the rejected action and replay".to_string()),
            },
            SurveyCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            SurveyCliError::Unfinished(report) => CliError {
                code: "SESSION_UNFINISHED".to_string(),
                message: format!(
                    "Script ended in the {} phase with {} rejected actions",
                    report.phase,
                    report.rejected.len()
                ),
                hint: Some("Run with --report to list rejected actions".to_string()),
            },
            SurveyCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} issues found in document", count),
                hint: Some("Run 'survey validate --json' for details".to_string()),
            },
            SurveyCliError::InteractiveStdin => CliError {
                code: "NO_INPUT".to_string(),
                message: "stdin is a TTY".to_string(),
                hint: Some("Pipe a file into the command or pass a file path".to_string()),
            },
        }
    }
}
