//! The checkpoint and resume controller.
//!
//! Runs the requested stages strictly in order, records each terminal
//! outcome in the checkpoint, and halts on the first pause or failure. The
//! checkpoint write is always the last action after a stage succeeds, so a
//! crash can never leave a stage marked complete without its artifact.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::checkpoint::{Checkpoint, StageId, StageSelection};
use super::config::PipelineConfig;
use super::session::Session;
use super::stages::curate::{CurationMode, Curator};
use super::stages::distill::REDUCE_MAX_TOKENS;
use super::stages::generate::SCENARIO_MAX_TOKENS;
use super::stages::{
    acquire, distill, finalize, generate, persona, plan, CompletionCall, StageOutcome,
};
use crate::error::PipelineError;
use crate::llm::{CompletionService, LiteLlmClient, LlmProvider};
use crate::metrics::{
    PipelineMetrics, OUTCOME_ERROR, OUTCOME_FAILED, OUTCOME_PAUSED, OUTCOME_SKIPPED,
    OUTCOME_SUCCESS,
};
use crate::scheduler::WorkerPool;
use crate::storage::{keys, ArtifactStore};
use crate::web::{
    ContentFetcher, HtmlTextExtractor, HttpFetcher, SearchProvider, SearxngClient, TextExtractor,
};

/// The external adapters a run talks to.
#[derive(Clone)]
pub struct PipelineServices {
    pub llm: Arc<dyn LlmProvider>,
    pub search: Arc<dyn SearchProvider>,
    pub fetcher: Arc<dyn ContentFetcher>,
    pub extractor: Arc<dyn TextExtractor>,
}

impl PipelineServices {
    /// Builds the HTTP-backed adapters described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Configuration` if no API key is configured or
    /// an HTTP client cannot be built.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let client_error = |e: &dyn std::fmt::Display| PipelineError::Configuration(e.to_string());
        let api_key = config
            .llm_api_key
            .clone()
            .ok_or_else(|| PipelineError::Configuration("LLM_API_KEY is not set".to_string()))?;
        let llm = LiteLlmClient::new(
            config.llm_api_url.clone(),
            api_key,
            config.llm_model.clone(),
            config.llm_timeout,
        )
        .map_err(|e| client_error(&e))?;
        info!(
            endpoint = %llm.endpoint(),
            model = %llm.default_model(),
            api_key = %llm.api_key_masked(),
            "Completion service configured"
        );

        Ok(Self {
            llm: Arc::new(llm),
            search: Arc::new(
                SearxngClient::new(config.searxng_url.clone(), config.request_timeout)
                    .map_err(|e| client_error(&e))?,
            ),
            fetcher: Arc::new(
                HttpFetcher::new(config.request_timeout).map_err(|e| client_error(&e))?,
            ),
            extractor: Arc::new(HtmlTextExtractor::default()),
        })
    }
}

/// What one invocation should do.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub selection: StageSelection,
    /// Clear the records of this stage and every later one before resolving.
    pub rerun_from: Option<StageId>,
    /// Run requested stages even if they are already complete.
    pub force: bool,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every stage that was asked for ran to completion.
    Completed {
        ran: Vec<StageId>,
        skipped: Vec<StageId>,
    },
    /// A stage is waiting for operator action.
    Paused { stage: StageId, reason: String },
    /// A stage met its fatal-failure condition.
    Failed { stage: StageId, reason: String },
}

impl RunOutcome {
    /// Converts a stage failure into `PipelineError::InsufficientOutput`.
    ///
    /// Completed and paused runs are both `Ok`.
    pub fn into_result(self) -> Result<RunOutcome, PipelineError> {
        match self {
            RunOutcome::Failed { stage, reason } => {
                Err(PipelineError::InsufficientOutput { stage, reason })
            }
            other => Ok(other),
        }
    }
}

/// Drives one session through the stage sequence.
pub struct PipelineController {
    config: PipelineConfig,
    services: PipelineServices,
    session: Session,
    completion: CompletionService,
    fetch_pool: WorkerPool,
    llm_pool: WorkerPool,
}

impl PipelineController {
    /// Validates the configuration and prepares the worker pools.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Configuration` for an invalid configuration and
    /// `PipelineError::Pool` if a worker pool cannot be built.
    pub fn new(
        config: PipelineConfig,
        services: PipelineServices,
        session: Session,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let fetch_pool = WorkerPool::new(config.fetch_pool())?;
        let llm_pool = WorkerPool::new(config.llm_pool())?;
        let completion = CompletionService::new(services.llm.clone());
        Ok(Self {
            config,
            services,
            session,
            completion,
            fetch_pool,
            llm_pool,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs the requested stages and writes `metrics.prom` for this run.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::CorruptState` if the checkpoint or a completed
    /// stage's artifact is unreadable, and any storage error that prevents a
    /// stage or checkpoint write. Stage failures and pauses are `Ok` outcomes.
    pub async fn run(&self, request: &RunRequest) -> Result<RunOutcome, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "pipeline_run",
            session_id = %self.session.id,
            run_id = %run_id
        );

        let metrics = PipelineMetrics::new()?;
        async {
            let result = self.run_stages(request, &metrics).await;
            if let Err(e) = self.write_metrics(&metrics).await {
                warn!(error = %e, "Failed to write run metrics");
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_stages(
        &self,
        request: &RunRequest,
        metrics: &PipelineMetrics,
    ) -> Result<RunOutcome, PipelineError> {
        let store = self.session.store();
        let mut checkpoint = Checkpoint::load(store).await?;
        checkpoint.verify_artifacts(store).await?;

        if let Some(stage) = request.rerun_from {
            info!(stage = %stage, "Clearing checkpoint from stage");
            checkpoint.reset_from(stage);
            checkpoint.persist(store).await?;
        }

        let plan = checkpoint.resolve_stages_to_run(&request.selection, request.force);
        for stage in &plan.skipped {
            info!(stage = %stage, "Stage already complete, skipping");
        }
        check_prerequisites(&checkpoint, &plan.run)?;
        info!(
            goal = %self.session.goal,
            stages = ?plan.run.iter().map(|s| s.name()).collect::<Vec<_>>(),
            "Starting pipeline run"
        );

        let mut ran = Vec::new();
        for stage in plan.run {
            info!(stage = %stage, number = stage.number(), "Running stage");
            let started = Instant::now();
            let outcome = match self.run_stage(stage, &checkpoint).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    metrics.record_stage(stage, OUTCOME_ERROR, started.elapsed());
                    error!(stage = %stage, error = %e, "Run halted");
                    return Err(e);
                }
            };
            let elapsed = started.elapsed();

            match outcome {
                StageOutcome::Success(report) => {
                    let label = if report.skipped {
                        OUTCOME_SKIPPED
                    } else {
                        OUTCOME_SUCCESS
                    };
                    metrics.record_stage(stage, label, elapsed);
                    metrics.record_batches(&report.batches);

                    checkpoint.mark_complete(stage, report.skipped);
                    checkpoint.persist(store).await?;
                    info!(
                        stage = %stage,
                        elapsed_ms = elapsed.as_millis() as u64,
                        summary = %report.summary,
                        "Stage complete"
                    );
                    ran.push(stage);
                }
                StageOutcome::Paused(reason) => {
                    metrics.record_stage(stage, OUTCOME_PAUSED, elapsed);
                    checkpoint.mark_paused(stage, reason.clone());
                    checkpoint.persist(store).await?;
                    warn!(stage = %stage, reason = %reason, "Run paused");
                    return Ok(RunOutcome::Paused { stage, reason });
                }
                StageOutcome::Failed(reason) => {
                    metrics.record_stage(stage, OUTCOME_FAILED, elapsed);
                    error!(stage = %stage, reason = %reason, "Run halted: stage failed");
                    return Ok(RunOutcome::Failed { stage, reason });
                }
            }
        }

        info!(ran = ran.len(), skipped = plan.skipped.len(), "Pipeline run complete");
        Ok(RunOutcome::Completed {
            ran,
            skipped: plan.skipped,
        })
    }

    async fn run_stage(
        &self,
        stage: StageId,
        checkpoint: &Checkpoint,
    ) -> Result<StageOutcome, PipelineError> {
        let store = self.session.store();
        let retry = self.config.retry_policy();
        let options = self.config.completion_options();
        let llm = CompletionCall {
            service: &self.completion,
            options: &options,
            retry: &retry,
            timeout: self.config.llm_timeout,
        };

        match stage {
            StageId::Plan => plan::run(store, &self.session.goal, llm).await,
            StageId::Acquire => {
                acquire::run(
                    store,
                    self.services.search.as_ref(),
                    self.services.fetcher.as_ref(),
                    self.config.search_depth,
                    &self.fetch_pool,
                )
                .await
            }
            StageId::Curate => {
                let reviewer_options = self.config.reviewer_options();
                let curator = Curator {
                    store,
                    extractor: self.services.extractor.as_ref(),
                    scorer: llm,
                    reviewer: llm.with_options(&reviewer_options),
                    pool: &self.llm_pool,
                    threshold: self.config.relevance_threshold,
                };
                let mode = CurationMode::select(
                    self.config.human_in_the_loop,
                    checkpoint.pause_reason(StageId::Curate).is_some(),
                );
                curator.run(mode).await
            }
            StageId::Distill => {
                let reduce_options = options.clone().with_max_tokens(REDUCE_MAX_TOKENS);
                distill::run(store, llm, llm.with_options(&reduce_options), &self.llm_pool).await
            }
            StageId::Generate => {
                let scenario_options = options.clone().with_max_tokens(SCENARIO_MAX_TOKENS);
                generate::run(store, llm.with_options(&scenario_options), &self.llm_pool).await
            }
            StageId::Persona => {
                persona::run(store, llm, &self.config.persona_file, &self.llm_pool).await
            }
            StageId::Finalize => {
                finalize::run(
                    store,
                    &self.config.chat_template,
                    checkpoint.was_skipped(StageId::Persona),
                )
                .await
            }
        }
    }

    async fn write_metrics(&self, metrics: &PipelineMetrics) -> Result<(), PipelineError> {
        let text = metrics.render()?;
        self.session
            .store()
            .put(keys::METRICS, text.as_bytes())
            .await?;
        Ok(())
    }
}

/// Every stage must follow a stage that is complete or runs earlier in the
/// same invocation.
fn check_prerequisites(checkpoint: &Checkpoint, run: &[StageId]) -> Result<(), PipelineError> {
    for stage in run {
        let missing = StageId::ALL
            .into_iter()
            .filter(|earlier| earlier < stage)
            .find(|earlier| !checkpoint.is_complete(*earlier) && !run.contains(earlier));
        if let Some(earlier) = missing {
            return Err(PipelineError::Configuration(format!(
                "stage {} ({}) needs stage {} ({}) to be complete first",
                stage.number(),
                stage,
                earlier.number(),
                earlier
            )));
        }
    }
    Ok(())
}

/// Clears the checkpoint from `from` onward, optionally deleting the
/// artifacts those stages own.
///
/// The controller never deletes artifacts on its own; `purge` is the
/// operator's explicit request to do so.
///
/// # Errors
///
/// Returns `PipelineError::CorruptState` if the checkpoint does not parse
/// and a storage error if a write or delete fails.
pub async fn reset_session(
    store: &ArtifactStore,
    from: StageId,
    purge: bool,
) -> Result<Checkpoint, PipelineError> {
    let mut checkpoint = Checkpoint::load(store).await?;
    checkpoint.reset_from(from);

    if purge {
        let mut removed = 0usize;
        for stage in from.and_later() {
            removed += purge_stage_artifacts(store, stage).await?;
        }
        info!(from = %from, removed, "Purged stage artifacts");
    }

    checkpoint.persist(store).await?;
    info!(from = %from, "Checkpoint reset");
    Ok(checkpoint)
}

async fn purge_stage_artifacts(store: &ArtifactStore, stage: StageId) -> Result<usize, PipelineError> {
    let mut removed = 0;
    for owned in stage.owned_artifacts() {
        // Directory prefixes carry no extension.
        if !owned.contains('.') {
            for key in store.list(owned)? {
                store.delete(&key).await?;
                removed += 1;
            }
        } else if store.contains(owned).await? {
            store.delete(owned).await?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::artifacts::ResearchPlan;
    use crate::pipeline::stages::test_support::RoutedProvider;
    use crate::prompts::PLAN_SYSTEM_PROMPT;
    use crate::web::{ExtractedText, SearchHit};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct NoSearch;

    #[async_trait]
    impl SearchProvider for NoSearch {
        async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, crate::error::ServiceError> {
            Ok(Vec::new())
        }
    }

    struct NoFetch;

    #[async_trait]
    impl ContentFetcher for NoFetch {
        async fn fetch_raw(&self, url: &str) -> Result<Vec<u8>, crate::error::ServiceError> {
            Err(crate::error::ServiceError::InvalidUrl(url.to_string()))
        }
    }

    struct NoText;

    impl TextExtractor for NoText {
        fn extract(&self, _raw: &[u8]) -> Option<ExtractedText> {
            None
        }
    }

    fn services(provider: RoutedProvider) -> PipelineServices {
        PipelineServices {
            llm: Arc::new(provider),
            search: Arc::new(NoSearch),
            fetcher: Arc::new(NoFetch),
            extractor: Arc::new(NoText),
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig::new()
            .with_api_key("test-key")
            .with_retry(1, Duration::from_millis(1))
    }

    async fn controller(dir: &TempDir, provider: RoutedProvider) -> PipelineController {
        let session = Session::create(dir.path(), "Learn Rust ownership").await.unwrap();
        PipelineController::new(config(), services(provider), session).unwrap()
    }

    fn plan_provider() -> RoutedProvider {
        RoutedProvider::default().route(PLAN_SYSTEM_PROMPT, |_| {
            Ok(r#"{"search_queries": ["rust ownership"], "relevance_keywords": ["borrow"]}"#.into())
        })
    }

    fn only(stages: &str) -> StageSelection {
        stages.parse().unwrap()
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let session = Session::create(dir.path(), "goal").await.unwrap();
        let result = PipelineController::new(
            PipelineConfig::new(),
            services(RoutedProvider::default()),
            session,
        );
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn test_services_from_config() {
        PipelineServices::from_config(&config()).expect("clients build");

        let err = PipelineServices::from_config(&PipelineConfig::new()).err();
        assert!(matches!(err, Some(PipelineError::Configuration(ref m)) if m.contains("LLM_API_KEY")));
    }

    #[tokio::test]
    async fn test_failed_stage_halts_without_marking_complete() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir, plan_provider()).await;

        let outcome = controller.run(&RunRequest::default()).await.unwrap();
        match outcome {
            RunOutcome::Failed { stage, ref reason } => {
                assert_eq!(stage, StageId::Acquire);
                assert!(reason.contains("no result URLs"));
            }
            other => panic!("expected failure, got {other:?}"),
        }

        let store = controller.session().store();
        let checkpoint = Checkpoint::load(store).await.unwrap();
        assert!(checkpoint.is_complete(StageId::Plan));
        assert!(!checkpoint.is_complete(StageId::Acquire));
        assert!(store.contains(keys::METRICS).await.unwrap());

        let err = outcome_error(outcome);
        assert!(matches!(
            err,
            PipelineError::InsufficientOutput {
                stage: StageId::Acquire,
                ..
            }
        ));
    }

    fn outcome_error(outcome: RunOutcome) -> PipelineError {
        match outcome.into_result() {
            Err(e) => e,
            Ok(other) => panic!("expected an error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_selected_stage_needs_its_predecessors() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir, plan_provider()).await;
        let request = RunRequest {
            selection: only("distill"),
            ..Default::default()
        };
        let err = controller.run(&request).await.unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(ref m) if m.contains("plan")));
    }

    #[tokio::test]
    async fn test_complete_stage_is_skipped_unless_forced() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir, plan_provider()).await;
        let request = RunRequest {
            selection: only("1"),
            ..Default::default()
        };

        let first = controller.run(&request).await.unwrap();
        assert_eq!(
            first,
            RunOutcome::Completed {
                ran: vec![StageId::Plan],
                skipped: vec![]
            }
        );

        let second = controller.run(&request).await.unwrap();
        assert_eq!(
            second,
            RunOutcome::Completed {
                ran: vec![],
                skipped: vec![StageId::Plan]
            }
        );

        let forced = RunRequest {
            force: true,
            ..request
        };
        let third = controller.run(&forced).await.unwrap();
        assert_eq!(
            third,
            RunOutcome::Completed {
                ran: vec![StageId::Plan],
                skipped: vec![]
            }
        );
    }

    #[tokio::test]
    async fn test_missing_artifact_of_complete_stage_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir, plan_provider()).await;
        let store = controller.session().store();

        let mut checkpoint = Checkpoint::default();
        checkpoint.mark_complete(StageId::Plan, false);
        checkpoint.persist(store).await.unwrap();

        let err = controller.run(&RunRequest::default()).await.unwrap_err();
        assert!(matches!(err, PipelineError::CorruptState { ref path, .. } if path == keys::RESEARCH_PLAN));
    }

    #[tokio::test]
    async fn test_reset_session_purges_owned_artifacts() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        let plan = ResearchPlan {
            goal: "g".into(),
            search_queries: vec!["q".into()],
            relevance_keywords: vec![],
            created_at: Utc::now(),
        };
        store.put_json(keys::RESEARCH_PLAN, &plan).await.unwrap();
        store.put(&keys::raw_document("abc"), b"{}").await.unwrap();
        store.put(keys::ACQUISITION_MANIFEST, b"{}").await.unwrap();

        let mut checkpoint = Checkpoint::default();
        checkpoint.mark_complete(StageId::Plan, false);
        checkpoint.mark_complete(StageId::Acquire, false);
        checkpoint.persist(&store).await.unwrap();

        let reset = reset_session(&store, StageId::Acquire, true).await.unwrap();
        assert_eq!(reset.complete_through(), Some(StageId::Plan));
        assert!(store.list(keys::RAW_PREFIX).unwrap().is_empty());
        assert!(!store.contains(keys::ACQUISITION_MANIFEST).await.unwrap());
        assert!(store.contains(keys::RESEARCH_PLAN).await.unwrap());

        let reloaded = Checkpoint::load(&store).await.unwrap();
        assert_eq!(reloaded, reset);
    }

    #[tokio::test]
    async fn test_reset_without_purge_keeps_artifacts() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        store.put(keys::ACQUISITION_MANIFEST, b"{}").await.unwrap();

        reset_session(&store, StageId::Plan, false).await.unwrap();
        assert!(store.contains(keys::ACQUISITION_MANIFEST).await.unwrap());
    }
}
