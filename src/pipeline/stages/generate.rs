//! Stage 5: generate one conversation per candidate task.

use tracing::{info, warn};

use super::{require_json, BatchSummary, CompletionCall, StageOutcome, StageReport};
use crate::dataset::DatasetItem;
use crate::error::PipelineError;
use crate::pipeline::artifacts::DistilledKnowledge;
use crate::prompts::build_scenario_prompt;
use crate::scheduler::WorkerPool;
use crate::storage::{keys, ArtifactStore};

/// Token budget for each scenario call.
pub const SCENARIO_MAX_TOKENS: u32 = 2000;

pub async fn run(
    store: &ArtifactStore,
    llm: CompletionCall<'_>,
    pool: &WorkerPool,
) -> Result<StageOutcome, PipelineError> {
    let distilled: DistilledKnowledge = require_json(store, keys::DISTILLED_KNOWLEDGE).await?;
    let tasks: Vec<(usize, String)> = distilled
        .knowledge
        .potential_tasks
        .iter()
        .cloned()
        .enumerate()
        .collect();
    if tasks.is_empty() {
        return Ok(StageOutcome::Failed(
            "distilled knowledge lists no candidate tasks".to_string(),
        ));
    }
    info!(tasks = tasks.len(), "Generating conversations");

    let knowledge = &distilled.knowledge;
    let report = pool
        .run_all("generate", tasks, move |(_, task): (usize, String)| async move {
            let prompt = build_scenario_prompt(knowledge, &task);
            llm.attempt::<DatasetItem>(&prompt)
                .await
                .map(|item| item.with_task(task))
        })
        .await?;
    let batch = BatchSummary::of("generate", &report);

    for ((_, task), failure) in report.failures() {
        warn!(task = %task, error = %failure, "Conversation generation failed");
    }
    let mut generated = report.into_successes();
    if generated.is_empty() {
        return Ok(StageOutcome::Failed(
            "zero dataset items were generated".to_string(),
        ));
    }
    generated.sort_by_key(|((index, _), _)| *index);
    let items: Vec<DatasetItem> = generated.into_iter().map(|(_, item)| item).collect();

    store.put_jsonl(keys::BASE_DATASET, &items).await?;
    info!(items = items.len(), "Base dataset written");
    Ok(StageOutcome::Success(
        StageReport::new(format!(
            "{} of {} tasks produced a conversation",
            items.len(),
            distilled.knowledge.potential_tasks.len()
        ))
        .with_batches(vec![batch]),
    ))
}
