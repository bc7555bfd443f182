//! Command-line interface for knowledge-forge.
//!
//! Provides commands to run or resume a session, inspect its checkpoint, and
//! reset it from a given stage.

mod commands;

pub use commands::{
    exit_code_for, parse_cli, run, run_with_cli, Cli, CommandStatus, EXIT_COMPLETE, EXIT_CONFIG,
    EXIT_CORRUPT, EXIT_OTHER, EXIT_PAUSED, EXIT_STAGE_FAILED,
};
