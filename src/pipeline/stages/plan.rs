//! Stage 1: turn the learning goal into search queries and relevance keywords.

use chrono::Utc;
use tracing::{info, warn};

use super::{BatchSummary, CompletionCall, StageOutcome, StageReport};
use crate::error::PipelineError;
use crate::llm::ParsedPlan;
use crate::pipeline::artifacts::ResearchPlan;
use crate::prompts::build_plan_prompt;
use crate::storage::{keys, ArtifactStore};

pub async fn run(
    store: &ArtifactStore,
    goal: &str,
    llm: CompletionCall<'_>,
) -> Result<StageOutcome, PipelineError> {
    let outcome = llm.request::<ParsedPlan>(&build_plan_prompt(goal)).await;
    let batch = BatchSummary::single("plan", &outcome);

    let parsed = match outcome {
        Ok(attempted) => attempted.value,
        Err(failure) => {
            warn!(error = %failure, "Research plan request failed");
            return Ok(StageOutcome::Failed(format!(
                "completion service returned no usable query list: {failure}"
            )));
        }
    };

    let plan = ResearchPlan {
        goal: goal.to_string(),
        search_queries: parsed.search_queries,
        relevance_keywords: parsed.relevance_keywords,
        created_at: Utc::now(),
    };
    store.put_json(keys::RESEARCH_PLAN, &plan).await?;

    info!(
        queries = plan.search_queries.len(),
        keywords = plan.relevance_keywords.len(),
        "Research plan written"
    );
    Ok(StageOutcome::Success(
        StageReport::new(format!(
            "{} search queries, {} relevance keywords",
            plan.search_queries.len(),
            plan.relevance_keywords.len()
        ))
        .with_batches(vec![batch]),
    ))
}
