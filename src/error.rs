//! Error types for knowledge-forge operations.
//!
//! Defines the error types shared across subsystems:
//! - Completion service (LLM) interactions
//! - Web search and raw content fetching
//! - Artifact storage
//! - Chat-template formatting
//! - Pipeline orchestration (configuration, corrupt state, insufficient output)

use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::checkpoint::StageId;

/// Classifies an error as worth retrying at the item level.
///
/// Only per-item operations inside a batch are retried; the pipeline
/// controller never retries a whole stage.
pub trait Transient {
    /// Returns true if a later attempt of the same operation may succeed.
    fn is_transient(&self) -> bool;
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: LLM_API_KEY is not set")]
    MissingApiKey,

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Request timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("LLM response rejected: {0}")]
    InvalidResponse(String),

    #[error("Completion service reported an error: {0}")]
    ServiceReported(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

impl Transient for LlmError {
    fn is_transient(&self) -> bool {
        match self {
            LlmError::RequestFailed(_)
            | LlmError::Timeout { .. }
            | LlmError::RateLimited(_)
            | LlmError::ParseError(_) => true,
            LlmError::ApiError { code, .. } => *code >= 500 || *code == 429,
            LlmError::MissingApiKey
            | LlmError::ClientBuild(_)
            | LlmError::InvalidResponse(_)
            | LlmError::ServiceReported(_) => false,
        }
    }
}

/// Errors from the web search service and the raw content fetcher.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Request to {url} failed: {reason}")]
    RequestFailed { url: String, reason: String },

    #[error("Request to {url} timed out after {seconds} seconds")]
    Timeout { url: String, seconds: u64 },

    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    #[error("Invalid URL '{0}'")]
    InvalidUrl(String),

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Malformed response from {url}: {reason}")]
    MalformedResponse { url: String, reason: String },
}

impl Transient for ServiceError {
    fn is_transient(&self) -> bool {
        match self {
            ServiceError::RequestFailed { .. }
            | ServiceError::Timeout { .. }
            | ServiceError::MalformedResponse { .. } => true,
            ServiceError::Http { status, .. } => *status >= 500 || *status == 429,
            ServiceError::InvalidUrl(_) | ServiceError::ClientBuild(_) => false,
        }
    }
}

/// Errors that can occur during artifact storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid artifact key '{0}'")]
    InvalidKey(String),

    #[error("Artifact '{key}' is unreadable: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Failed to serialize artifact '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised while rendering a conversation into its final training text.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("Chat template unavailable: {0}")]
    Unavailable(String),

    #[error("Chat template rendering failed: {0}")]
    Render(#[from] tera::Error),

    #[error("Conversation cannot be formatted: {0}")]
    InvalidConversation(String),
}

/// Errors that halt a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Corrupt state in '{path}': {reason}")]
    CorruptState { path: String, reason: String },

    #[error("Stage '{stage}' produced insufficient output: {reason}")]
    InsufficientOutput { stage: StageId, reason: String },

    #[error("Storage error: {0}")]
    Store(StoreError),

    #[error("Worker pool error: {0}")]
    Pool(#[from] crate::scheduler::PoolError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Corrupt { key, reason } => PipelineError::CorruptState { path: key, reason },
            other => PipelineError::Store(other),
        }
    }
}

impl From<crate::pipeline::config::ConfigError> for PipelineError {
    fn from(err: crate::pipeline::config::ConfigError) -> Self {
        PipelineError::Configuration(err.to_string())
    }
}
