//! Completion-service integration for knowledge-forge.
//!
//! - [`LiteLlmClient`]: one-shot HTTP client for OpenAI-compatible
//!   chat-completion endpoints, implementing [`LlmProvider`]
//! - [`CompletionService`]: "system + user prompt in, JSON out" on top of any
//!   provider, rejecting empty, non-JSON and `error`-tagged responses
//! - [`responses`]: typed, validated views of each structured call
//!
//! ```ignore
//! use knowledge_forge::llm::{CompletionOptions, CompletionService, LiteLlmClient, ParsedPlan};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let client = LiteLlmClient::new(url, api_key, "deepseek-chat", Duration::from_secs(300))?;
//! let service = CompletionService::new(Arc::new(client));
//! let plan: ParsedPlan = service
//!     .complete_as(PLAN_SYSTEM_PROMPT, goal, &CompletionOptions::new("deepseek-chat"))
//!     .await?;
//! ```

pub mod completion;
pub mod litellm;
pub mod responses;

pub use completion::{CompletionOptions, CompletionService};
pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, Usage,
};
pub use responses::{
    KeyEntity, ParsedKnowledge, ParsedPlan, ParsedReview, ParsedScore, ParsedSummary,
    ValidatedResponse,
};
