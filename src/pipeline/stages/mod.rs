//! The seven stage functions.
//!
//! Each stage reads its inputs from the artifact store, takes only the
//! adapters and settings it needs, writes its outputs, and reports a
//! [`StageOutcome`]. Stages never touch the checkpoint; the controller
//! records the outcome after the stage returns.

pub mod acquire;
pub mod curate;
pub mod distill;
pub mod finalize;
pub mod generate;
pub mod persona;
pub mod plan;

use std::time::Duration;

use thiserror::Error;

use crate::error::{LlmError, PipelineError, ServiceError, StoreError, Transient};
use crate::llm::{CompletionOptions, CompletionService, ValidatedResponse};
use crate::prompts::StagePrompt;
use crate::scheduler::{retry_with_timeout, Attempted, BatchReport, ItemFailure, RetryPolicy};
use crate::storage::ArtifactStore;

/// Terminal outcome of one stage invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Success(StageReport),
    /// Halt without completing; the operator must act before re-running.
    Paused(String),
    /// The stage's fatal-failure condition was met.
    Failed(String),
}

/// What a successful stage did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageReport {
    pub summary: String,
    /// Completed without producing output (persona with no reference text).
    pub skipped: bool,
    pub batches: Vec<BatchSummary>,
}

impl StageReport {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Default::default()
        }
    }

    pub fn skipped(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            skipped: true,
            batches: Vec::new(),
        }
    }

    pub fn with_batches(mut self, batches: Vec<BatchSummary>) -> Self {
        self.batches = batches;
        self
    }
}

/// Item counts of one worker-pool batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub label: String,
    pub succeeded: u64,
    pub failed: u64,
    pub retries: u64,
}

impl BatchSummary {
    pub fn of<I, T>(label: &str, report: &BatchReport<I, T>) -> Self {
        Self {
            label: label.to_string(),
            succeeded: report.stats.succeeded,
            failed: report.stats.failed,
            retries: report.stats.retries,
        }
    }

    /// A single un-batched call counted as a batch of one.
    pub fn single<T>(label: &str, outcome: &Result<Attempted<T>, ItemFailure>) -> Self {
        let (succeeded, attempts) = match outcome {
            Ok(a) => (1, a.attempts),
            Err(f) => (0, f.attempts),
        };
        Self {
            label: label.to_string(),
            succeeded,
            failed: 1 - succeeded,
            retries: u64::from(attempts.saturating_sub(1)),
        }
    }
}

/// Failure of one item inside a batch.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Invalid(String),
}

impl Transient for ItemError {
    fn is_transient(&self) -> bool {
        match self {
            ItemError::Llm(e) => e.is_transient(),
            ItemError::Service(e) => e.is_transient(),
            ItemError::Store(_) | ItemError::Invalid(_) => false,
        }
    }
}

/// Completion settings a stage uses for its calls.
#[derive(Clone, Copy)]
pub struct CompletionCall<'a> {
    pub service: &'a CompletionService,
    pub options: &'a CompletionOptions,
    pub retry: &'a RetryPolicy,
    pub timeout: Duration,
}

impl<'a> CompletionCall<'a> {
    /// One validated call with retry and timeout, for un-batched requests.
    pub async fn request<T: ValidatedResponse>(
        &self,
        prompt: &StagePrompt,
    ) -> Result<Attempted<T>, ItemFailure> {
        retry_with_timeout(self.retry, self.timeout, || self.attempt::<T>(prompt)).await
    }

    /// One validated call, no retry; pool workers get retries from the pool.
    pub async fn attempt<T: ValidatedResponse>(&self, prompt: &StagePrompt) -> Result<T, LlmError> {
        self.service
            .complete_as(&prompt.system, &prompt.user, self.options)
            .await
    }

    /// Same call with a different token budget.
    pub fn with_options(&self, options: &'a CompletionOptions) -> Self {
        Self { options, ..*self }
    }
}

/// Reads a required upstream artifact.
///
/// A missing input means an earlier stage's output was removed from under a
/// complete checkpoint, which is corrupt state rather than a stage failure.
pub(crate) async fn require_json<T: serde::de::DeserializeOwned>(
    store: &ArtifactStore,
    key: &str,
) -> Result<T, PipelineError> {
    store
        .get_json::<T>(key)
        .await?
        .ok_or_else(|| missing_input(key))
}

/// Reads a required upstream JSON Lines artifact.
pub(crate) async fn require_jsonl<T: serde::de::DeserializeOwned>(
    store: &ArtifactStore,
    key: &str,
) -> Result<Vec<T>, PipelineError> {
    store
        .get_jsonl::<T>(key)
        .await?
        .ok_or_else(|| missing_input(key))
}

fn missing_input(key: &str) -> PipelineError {
    PipelineError::CorruptState {
        path: key.to_string(),
        reason: "required input artifact is missing; re-run the stage that produces it".to_string(),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Scripted completion provider shared by stage tests.

    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::error::LlmError;
    use crate::llm::{CompletionService, GenerationRequest, GenerationResponse, LlmProvider};

    type Responder = Box<dyn Fn(&str) -> Result<String, LlmError> + Send + Sync>;

    /// Routes each request on its system prompt to a responder closure.
    #[derive(Default)]
    pub struct RoutedProvider {
        routes: HashMap<&'static str, Responder>,
        pub calls: Mutex<Vec<String>>,
    }

    impl RoutedProvider {
        pub fn route<F>(mut self, system_prompt: &'static str, responder: F) -> Self
        where
            F: Fn(&str) -> Result<String, LlmError> + Send + Sync + 'static,
        {
            self.routes.insert(system_prompt, Box::new(responder));
            self
        }

        pub fn call_count(&self, system_prompt: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.as_str() == system_prompt)
                .count()
        }
    }

    #[async_trait]
    impl LlmProvider for RoutedProvider {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            let system = request.system_prompt().unwrap_or_default().to_string();
            let user = request.user_prompt().unwrap_or_default().to_string();
            self.calls.lock().unwrap().push(system.clone());
            let responder = self
                .routes
                .get(system.as_str())
                .ok_or_else(|| LlmError::RequestFailed(format!("no route for {system}")))?;
            responder(&user).map(|content| GenerationResponse::from_text(request.model, content))
        }
    }

    pub fn service(provider: Arc<RoutedProvider>) -> CompletionService {
        CompletionService::new(provider)
    }
}
