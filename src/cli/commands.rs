//! CLI command definitions for knowledge-forge.
//!
//! `run` starts or resumes a session, `status` prints its checkpoint and
//! `reset` clears it from a given stage onward.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::error::PipelineError;
use crate::pipeline::config::{ConfigError, ConfigOverrides, DEFAULT_PROFILES_PATH};
use crate::pipeline::{
    reset_session, Checkpoint, PipelineConfig, PipelineController, PipelineServices, RunOutcome,
    RunRequest, Session, StageId, StageSelection,
};

/// Default directory under which sessions are created and looked up.
const DEFAULT_SESSIONS_ROOT: &str = ".";

/// Process exit code for a completed run.
pub const EXIT_COMPLETE: u8 = 0;
/// Any error not covered by a more specific code.
pub const EXIT_OTHER: u8 = 1;
/// The run paused awaiting human review.
pub const EXIT_PAUSED: u8 = 2;
/// A stage met its fatal-failure condition.
pub const EXIT_STAGE_FAILED: u8 = 3;
/// Invalid configuration or arguments.
pub const EXIT_CONFIG: u8 = 4;
/// The session's checkpoint or a completed stage's artifact is unreadable.
pub const EXIT_CORRUPT: u8 = 5;

/// Research a learning goal and distill it into a conversational dataset.
#[derive(Parser)]
#[command(name = "knowledge-forge")]
#[command(about = "Research a learning goal on the web and distill it into a training dataset")]
#[command(version)]
#[command(
    long_about = "knowledge-forge runs a resumable seven-stage pipeline: plan, acquire, curate, distill, generate, persona, finalize.\n\nEvery artifact lives in a session directory; re-running a session skips completed stages.\n\nExample usage:\n  knowledge-forge run \"Learn Rust async programming\"\n  knowledge-forge run --session knowledge_session_learn_rust_async_programming_1714557600\n  knowledge-forge reset --session <id> --from 3 --purge"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Start a new session or resume an existing one.
    Run(Box<RunArgs>),

    /// Print the checkpoint of a session.
    Status(StatusArgs),

    /// Clear a session's checkpoint from a stage onward.
    Reset(ResetArgs),
}

/// Arguments for `knowledge-forge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Learning goal. Required for a new session.
    pub goal: Option<String>,

    /// Resume this session (an id under the sessions root, or a directory).
    #[arg(short, long)]
    pub session: Option<String>,

    /// Stages to run: "all" or a comma-separated list of numbers or names.
    #[arg(long, default_value = "all")]
    pub phases: StageSelection,

    /// Clear this stage and every later one before running.
    #[arg(long)]
    pub rerun_from: Option<StageId>,

    /// Run selected stages even if they are already complete.
    #[arg(long)]
    pub force: bool,

    /// Pause after curation filtering for a manual review.
    #[arg(long)]
    pub human_in_the_loop: bool,

    /// Profile to load from the profile file.
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Path to the profile file.
    #[arg(long, default_value = DEFAULT_PROFILES_PATH)]
    pub profiles: PathBuf,

    /// Directory under which sessions are created.
    #[arg(long)]
    pub sessions_root: Option<PathBuf>,

    /// Completion service API key.
    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    /// Chat-completions endpoint URL.
    #[arg(long)]
    pub llm_api_url: Option<String>,

    /// Model for planning, scoring, distillation and generation.
    #[arg(short, long)]
    pub model: Option<String>,

    /// Model for the automatic curation reviewer.
    #[arg(long)]
    pub reviewer_model: Option<String>,

    /// SearxNG instance base URL.
    #[arg(long)]
    pub searxng_url: Option<String>,

    /// Result URLs taken per search query.
    #[arg(long)]
    pub search_depth: Option<usize>,

    /// Minimum relevance score for a document to be kept.
    #[arg(long)]
    pub relevance_threshold: Option<f64>,

    /// "chatml" or a path to a tera chat template.
    #[arg(long)]
    pub chat_template: Option<String>,

    /// Reference conversation text for persona styling.
    #[arg(long)]
    pub persona_file: Option<PathBuf>,
}

impl RunArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            llm_api_key: self.llm_api_key.clone(),
            llm_api_url: self.llm_api_url.clone(),
            llm_model: self.model.clone(),
            reviewer_model: self.reviewer_model.clone(),
            searxng_url: self.searxng_url.clone(),
            search_depth: self.search_depth,
            relevance_threshold: self.relevance_threshold,
            human_in_the_loop: self.human_in_the_loop,
            chat_template: self.chat_template.clone(),
            persona_file: self.persona_file.clone(),
            sessions_root: self.sessions_root.clone(),
        }
    }

    fn request(&self) -> RunRequest {
        RunRequest {
            selection: self.phases.clone(),
            rerun_from: self.rerun_from,
            force: self.force,
        }
    }
}

/// Arguments for `knowledge-forge status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Session id or directory.
    #[arg(short, long)]
    pub session: String,

    /// Directory under which session ids are looked up.
    #[arg(long, default_value = DEFAULT_SESSIONS_ROOT)]
    pub sessions_root: PathBuf,

    /// Print the raw checkpoint as JSON.
    #[arg(short, long)]
    pub json: bool,
}

/// Arguments for `knowledge-forge reset`.
#[derive(Parser, Debug)]
pub struct ResetArgs {
    /// Session id or directory.
    #[arg(short, long)]
    pub session: String,

    /// Directory under which session ids are looked up.
    #[arg(long, default_value = DEFAULT_SESSIONS_ROOT)]
    pub sessions_root: PathBuf,

    /// First stage to clear (number or name).
    #[arg(long)]
    pub from: StageId,

    /// Also delete the artifacts owned by the cleared stages.
    #[arg(long)]
    pub purge: bool,
}

/// How a successful command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Complete,
    Paused,
}

impl CommandStatus {
    pub fn exit_code(self) -> u8 {
        match self {
            CommandStatus::Complete => EXIT_COMPLETE,
            CommandStatus::Paused => EXIT_PAUSED,
        }
    }
}

/// Maps an error returned by [`run_with_cli`] to a process exit code.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<ConfigError>().is_some() {
        return EXIT_CONFIG;
    }
    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::Configuration(_)) => EXIT_CONFIG,
        Some(PipelineError::CorruptState { .. }) => EXIT_CORRUPT,
        Some(PipelineError::InsufficientOutput { .. }) => EXIT_STAGE_FAILED,
        _ => EXIT_OTHER,
    }
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<CommandStatus> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
///
/// This is the main entry point for the knowledge-forge CLI.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<CommandStatus> {
    match cli.command {
        Commands::Run(args) => run_pipeline_command(*args).await,
        Commands::Status(args) => {
            run_status_command(args).await?;
            Ok(CommandStatus::Complete)
        }
        Commands::Reset(args) => {
            run_reset_command(args).await?;
            Ok(CommandStatus::Complete)
        }
    }
}

// ============================================================================
// Run Command Implementation
// ============================================================================

async fn run_pipeline_command(args: RunArgs) -> anyhow::Result<CommandStatus> {
    // Validation happens before any session directory is touched.
    let config = PipelineConfig::load(&args.profiles, args.profile.as_deref(), &args.overrides())?;

    let session = open_session(&config.sessions_root, &args).await?;
    println!("Session: {} ({})", session.id, session.dir().display());
    println!("Goal: {}", session.goal);

    let services = PipelineServices::from_config(&config)?;
    let controller = PipelineController::new(config, services, session)?;
    let outcome = controller.run(&args.request()).await?;

    match &outcome {
        RunOutcome::Completed { ran, skipped } => {
            for stage in skipped {
                println!("  {} {:<9} already complete", stage.number(), stage.name());
            }
            for stage in ran {
                println!("  {} {:<9} complete", stage.number(), stage.name());
            }
            println!("Pipeline complete.");
        }
        RunOutcome::Paused { stage, reason } => {
            println!("Paused at stage {} ({}): {}", stage.number(), stage, reason);
            println!(
                "Re-run with --session {} to continue.",
                controller.session().id
            );
        }
        RunOutcome::Failed { .. } => {}
    }

    match outcome.into_result()? {
        RunOutcome::Paused { .. } => Ok(CommandStatus::Paused),
        _ => Ok(CommandStatus::Complete),
    }
}

async fn open_session(sessions_root: &Path, args: &RunArgs) -> anyhow::Result<Session> {
    if let Some(id) = &args.session {
        let dir = Session::locate(sessions_root, id);
        return Ok(Session::resume(&dir, args.goal.as_deref()).await?);
    }
    let goal = args.goal.as_deref().ok_or_else(|| {
        PipelineError::Configuration("either a goal or --session is required".to_string())
    })?;
    Ok(Session::create(sessions_root, goal).await?)
}

// ============================================================================
// Status and Reset Commands
// ============================================================================

async fn run_status_command(args: StatusArgs) -> anyhow::Result<()> {
    let dir = Session::locate(&args.sessions_root, &args.session);
    let session = Session::resume(&dir, None).await?;
    let checkpoint = Checkpoint::load(session.store()).await?;

    if args.json {
        let json = serde_json::to_string_pretty(&checkpoint)
            .context("Failed to serialize checkpoint")?;
        println!("{json}");
        return Ok(());
    }

    println!("Session: {}", session.id);
    println!("Goal: {}", session.goal);
    println!("Created: {}", session.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    for line in status_lines(&checkpoint) {
        println!("  {line}");
    }
    Ok(())
}

/// One line per stage describing its checkpoint state.
fn status_lines(checkpoint: &Checkpoint) -> Vec<String> {
    StageId::ALL
        .into_iter()
        .map(|stage| {
            let state = match checkpoint.record(stage) {
                Some(record) if record.complete && record.skipped => "skipped".to_string(),
                Some(record) if record.complete => match record.completed_at {
                    Some(at) => format!("complete ({})", at.format("%Y-%m-%d %H:%M:%S")),
                    None => "complete".to_string(),
                },
                Some(record) => match &record.paused {
                    Some(reason) => format!("paused: {reason}"),
                    None => "pending".to_string(),
                },
                None => "pending".to_string(),
            };
            format!("{} {:<9} {}", stage.number(), stage.name(), state)
        })
        .collect()
}

async fn run_reset_command(args: ResetArgs) -> anyhow::Result<()> {
    let dir = Session::locate(&args.sessions_root, &args.session);
    let session = Session::resume(&dir, None).await?;
    let checkpoint = reset_session(session.store(), args.from, args.purge).await?;

    info!(session_id = %session.id, from = %args.from, purge = args.purge, "Session reset");
    match checkpoint.complete_through() {
        Some(stage) => println!(
            "Session {} is now complete through stage {} ({}).",
            session.id,
            stage.number(),
            stage
        ),
        None => println!("Session {} has no completed stages.", session.id),
    }
    Ok(())
}
