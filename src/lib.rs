//! knowledge-forge: research a learning goal on the web and distill it into a
//! persona-styled conversational training dataset.
//!
//! The library exposes the resumable seven-stage pipeline, its checkpoint
//! controller, and the adapters it uses for the completion service, web
//! search, and content fetching.

// Core modules
pub mod cli;
pub mod dataset;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod prompts;
pub mod scheduler;
pub mod storage;
pub mod utils;
pub mod web;

// Re-export commonly used error types
pub use error::{FormatError, LlmError, PipelineError, ServiceError, StoreError, Transient};
