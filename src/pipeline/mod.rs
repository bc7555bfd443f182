//! The resumable seven-stage knowledge pipeline.
//!
//! # Architecture
//!
//! - **Session**: one goal and one working directory; the directory is the
//!   durability boundary and holds every artifact of the run.
//! - **Checkpoint**: which stages have completed, plus the curation pause flag.
//! - **Stages**: plan, acquire, curate, distill, generate, persona, finalize.
//!   Each reads the artifacts of earlier stages and writes its own.
//! - **Controller**: runs the requested stages in order and records each
//!   terminal outcome.
//!
//! # Example
//!
//! ```rust,ignore
//! use knowledge_forge::pipeline::{
//!     PipelineConfig, PipelineController, PipelineServices, RunRequest, Session,
//! };
//!
//! let config = PipelineConfig::new().with_api_key(api_key);
//! let services = PipelineServices::from_config(&config)?;
//! let session = Session::create(&config.sessions_root, "Learn Rust lifetimes").await?;
//!
//! let controller = PipelineController::new(config, services, session)?;
//! match controller.run(&RunRequest::default()).await? {
//!     RunOutcome::Completed { ran, .. } => println!("ran {} stages", ran.len()),
//!     RunOutcome::Paused { reason, .. } => println!("paused: {reason}"),
//!     RunOutcome::Failed { stage, reason } => eprintln!("{stage} failed: {reason}"),
//! }
//! ```
//!
//! # Resuming
//!
//! Re-running with the same session skips every complete stage. Use
//! `RunRequest::rerun_from` to clear a stage and everything after it;
//! downstream artifacts are not invalidated automatically when an upstream
//! stage is re-run.

pub mod artifacts;
pub mod checkpoint;
pub mod config;
pub mod controller;
pub mod session;
pub mod stages;

pub use checkpoint::{Checkpoint, StageId, StagePlan, StageRecord, StageSelection};
pub use config::{ConfigError, ConfigOverrides, PipelineConfig};
pub use controller::{
    reset_session, PipelineController, PipelineServices, RunOutcome, RunRequest,
};
pub use session::{derive_session_id, Session, SessionManifest};
pub use stages::{StageOutcome, StageReport};
