//! DeepStudy CLI - Command-line interface for the DeepStudy engine
//!
//! Commands:
//! - replay: Replay recorded browser events into finalized sessions
//! - burnout: Score burnout over the stored session history
//! - history: List stored sessions
//! - ingest: Validate and store a dashboard sync request
//! - classify: Show how a page would be classified

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use deepstudy::classifier::{extract_domain, ContentHeuristic, DomainClassifier};
use deepstudy::replay::{clock_for, parse_events, Replayer};
use deepstudy::store::JsonSessionStore;
use deepstudy::sync::{HttpSyncAdapter, SyncRequest};
use deepstudy::{burnout_breakdown, Category, EngineError, Session, SessionEngine, Settings};
use deepstudy::{ENGINE_VERSION, PRODUCER_NAME};

/// DeepStudy - Focus and burnout scoring for browser study sessions
#[derive(Parser)]
#[command(name = "deepstudy")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Score browser study sessions for focus and burnout", long_about = None)]
struct Cli {
    /// Settings file (TOML); defaults apply when it does not exist
    #[arg(long, global = true, default_value = "deepstudy.toml")]
    config: PathBuf,

    /// Session store file (overrides DEEPSTUDY_SESSIONS_FILE)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay recorded events (NDJSON) into finalized sessions
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output format; defaults to summary on a terminal, ndjson otherwise
        #[arg(long)]
        output_format: Option<OutputFormat>,

        /// Score burnout against the stored history and save finalized sessions
        #[arg(long)]
        persist: bool,

        /// Post finalized sessions to the configured dashboard
        #[arg(long)]
        sync: bool,
    },

    /// Score burnout over the stored history
    Burnout {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List stored sessions, newest first
    History {
        /// Show at most this many sessions
        #[arg(long)]
        limit: Option<usize>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate and store a sync request body
    Ingest {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Show how a page would be classified
    Classify {
        /// Page URL
        url: String,

        /// Page title
        #[arg(long, default_value = "")]
        title: String,

        /// File holding page text for the content heuristic
        #[arg(long)]
        text: Option<PathBuf>,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one session per line)
    Ndjson,
    /// JSON array of sessions
    Json,
    /// Pretty-printed JSON
    JsonPretty,
    /// Human-readable summary lines
    Summary,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deepstudy=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn run(cli: Cli) -> Result<(), DeepStudyCliError> {
    let settings = Settings::load(&cli.config)?;
    let store = match cli.store {
        Some(path) => JsonSessionStore::new(path),
        None => JsonSessionStore::from_env(),
    };

    match cli.command {
        Commands::Replay {
            input,
            output_format,
            persist,
            sync,
        } => cmd_replay(&settings, &store, &input, output_format, persist, sync),
        Commands::Burnout { json } => cmd_burnout(&store, json),
        Commands::History { limit, json } => cmd_history(&store, limit, json),
        Commands::Ingest { input } => cmd_ingest(&store, &input),
        Commands::Classify { url, title, text } => {
            cmd_classify(&settings, &url, &title, text.as_deref())
        }
    }
}

fn cmd_replay(
    settings: &Settings,
    store: &JsonSessionStore,
    input: &Path,
    output_format: Option<OutputFormat>,
    persist: bool,
    sync: bool,
) -> Result<(), DeepStudyCliError> {
    let events = parse_events(&read_input(input)?)?;
    if events.is_empty() {
        return Err(DeepStudyCliError::NoEvents);
    }

    // Resolve the sync target before replaying so a bad URL fails fast
    let adapter = if sync {
        let runtime = tokio::runtime::Runtime::new()?;
        let adapter = HttpSyncAdapter::from_settings(settings, runtime.handle().clone())?
            .ok_or(DeepStudyCliError::SyncNotConfigured)?;
        Some((runtime, adapter))
    } else {
        None
    };

    let mut engine = SessionEngine::new(clock_for(&events), settings)?;
    if persist {
        engine = engine
            .with_history(store.summaries()?)
            .with_sink(Box::new(store.clone()));
    }
    let outcome = Replayer::new(engine).run(&events)?;

    if outcome.sessions.is_empty() {
        return Err(DeepStudyCliError::NoSessions);
    }
    if outcome.discarded_verdicts > 0 {
        tracing::info!(count = outcome.discarded_verdicts, "recorded verdicts had no pending probe");
    }

    if let Some((runtime, adapter)) = adapter {
        for session in &outcome.sessions {
            let request = SyncRequest::from_session(session, settings.sync_user_id());
            match runtime.block_on(adapter.post(&request)) {
                Ok(resp) => tracing::info!(
                    endpoint = %adapter.endpoint(),
                    session_id = resp.session_id.as_deref().unwrap_or(""),
                    "session synced"
                ),
                Err(e) => tracing::warn!(error = %e, "failed to sync session"),
            }
        }
    }

    let format = output_format.unwrap_or(if atty::is(atty::Stream::Stdout) {
        OutputFormat::Summary
    } else {
        OutputFormat::Ndjson
    });
    print!("{}", format_sessions(&outcome.sessions, &format)?);
    Ok(())
}

fn cmd_burnout(store: &JsonSessionStore, json: bool) -> Result<(), DeepStudyCliError> {
    let history = store.summaries()?;
    let breakdown = burnout_breakdown(&history);

    if json {
        println!("{}", serde_json::to_string_pretty(&breakdown)?);
    } else {
        println!("Burnout Report");
        println!("==============");
        println!("Sessions:             {}", history.len());
        println!("Late-night sessions:  {}", breakdown.late_night_sessions);
        println!(
            "Declining focus:      {}",
            if breakdown.declining_focus_trend { "yes" } else { "no" }
        );
        match breakdown.mean_effective_ratio {
            Some(ratio) => println!("Mean effective ratio: {:.2}", ratio),
            None => println!("Mean effective ratio: n/a"),
        }
        println!("Burnout score:        {:.1}", breakdown.score);
    }
    Ok(())
}

fn cmd_history(
    store: &JsonSessionStore,
    limit: Option<usize>,
    json: bool,
) -> Result<(), DeepStudyCliError> {
    let mut sessions = store.list()?;
    if let Some(limit) = limit {
        sessions.truncate(limit);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    println!("Stored sessions ({})", store.path().display());
    for s in &sessions {
        println!(
            "  {}  {:>6.1} min  focus {:>5.1}  burnout {:>5.1}  {}",
            s.start_time.format("%Y-%m-%d %H:%M"),
            s.effective_time / 60.0,
            s.focus_score,
            s.burnout_score,
            if s.subject_label.is_empty() { "-" } else { &s.subject_label }
        );
    }
    Ok(())
}

fn cmd_ingest(store: &JsonSessionStore, input: &Path) -> Result<(), DeepStudyCliError> {
    let request = SyncRequest::from_json(&read_input(input)?)?;
    let id = store.ingest(&request)?;
    println!(
        "{}",
        serde_json::json!({ "success": true, "session_id": id.to_string() })
    );
    Ok(())
}

fn cmd_classify(
    settings: &Settings,
    url: &str,
    title: &str,
    text: Option<&Path>,
) -> Result<(), DeepStudyCliError> {
    let classifier = DomainClassifier::new(&settings.policy)?;
    let domain = extract_domain(url);
    let category = classifier.classify(&domain, title);

    let academic_text = match text {
        Some(path) => {
            let page_text = read_input(path)?;
            Some(ContentHeuristic::new(&settings.policy).is_academic(&page_text))
        }
        None => None,
    };

    let report = ClassifyReport {
        producer: PRODUCER_NAME.to_string(),
        domain: domain.clone(),
        category,
        video_domain: classifier.is_video_domain(&domain),
        academic_text,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

// Helper functions

fn read_input(input: &Path) -> Result<String, DeepStudyCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn format_sessions(sessions: &[Session], format: &OutputFormat) -> Result<String, DeepStudyCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for session in sessions {
                lines.push(serde_json::to_string(session)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(sessions)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(sessions)?),
        OutputFormat::Summary => {
            let mut out = String::new();
            for session in sessions {
                let label = if session.subject_label.is_empty() {
                    "(no subject)"
                } else {
                    session.subject_label.as_str()
                };
                out.push_str(&format!(
                    "{} {}\n{}\nBurnout Score: {:.1}\n\n",
                    session.start_time.format("%Y-%m-%d %H:%M"),
                    label,
                    session.summary_line(),
                    session.burnout_score
                ));
            }
            Ok(out)
        }
    }
}

// Error types

#[derive(Debug)]
enum DeepStudyCliError {
    Io(io::Error),
    Engine(EngineError),
    Json(serde_json::Error),
    NoEvents,
    NoSessions,
    SyncNotConfigured,
}

impl From<io::Error> for DeepStudyCliError {
    fn from(e: io::Error) -> Self {
        DeepStudyCliError::Io(e)
    }
}

impl From<EngineError> for DeepStudyCliError {
    fn from(e: EngineError) -> Self {
        DeepStudyCliError::Engine(e)
    }
}

impl From<serde_json::Error> for DeepStudyCliError {
    fn from(e: serde_json::Error) -> Self {
        DeepStudyCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<DeepStudyCliError> for CliError {
    fn from(e: DeepStudyCliError) -> Self {
        match e {
            DeepStudyCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            DeepStudyCliError::Engine(e) if e.is_client_error() => CliError {
                code: "INVALID_INPUT".to_string(),
                message: e.to_string(),
                hint: Some("Check the input against the expected JSON shape".to_string()),
            },
            DeepStudyCliError::Engine(EngineError::ConfigError(msg)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: msg,
                hint: Some("Check the settings file passed with --config".to_string()),
            },
            DeepStudyCliError::Engine(EngineError::CorruptStore(msg)) => CliError {
                code: "CORRUPT_STORE".to_string(),
                message: msg,
                hint: Some("Repair or move the session store file".to_string()),
            },
            DeepStudyCliError::Engine(e @ EngineError::SessionAlreadyActive(_))
            | DeepStudyCliError::Engine(e @ EngineError::NoActiveSession) => CliError {
                code: "LIFECYCLE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Each start event must be followed by an end event".to_string()),
            },
            DeepStudyCliError::Engine(e) => CliError {
                code: "ENGINE_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            DeepStudyCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            DeepStudyCliError::NoEvents => CliError {
                code: "NO_EVENTS".to_string(),
                message: "No events found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            DeepStudyCliError::NoSessions => CliError {
                code: "NO_SESSIONS".to_string(),
                message: "Recording contains no session".to_string(),
                hint: Some("Recordings must contain a start event".to_string()),
            },
            DeepStudyCliError::SyncNotConfigured => CliError {
                code: "SYNC_NOT_CONFIGURED".to_string(),
                message: "No dashboard base URL configured".to_string(),
                hint: Some("Set dashboard_base_url in the settings file".to_string()),
            },
        }
    }
}

#[derive(serde::Serialize)]
struct ClassifyReport {
    producer: String,
    domain: String,
    category: Category,
    video_domain: bool,
    academic_text: Option<bool>,
}
