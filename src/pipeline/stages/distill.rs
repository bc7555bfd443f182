//! Stage 4: map-reduce distillation of the curated documents.
//!
//! The map step summarises every retained document under the worker pool;
//! summaries are memoised under `summaries/`. The reduce step waits for the
//! whole map batch and synthesises one knowledge record from the summaries,
//! ordered by content address so the input does not depend on arrival order.

use chrono::Utc;
use tracing::{info, warn};

use super::{require_json, BatchSummary, CompletionCall, ItemError, StageOutcome, StageReport};
use crate::error::PipelineError;
use crate::llm::{ParsedKnowledge, ParsedSummary};
use crate::pipeline::artifacts::{
    CuratedDocument, CurationManifest, DistilledKnowledge, DocumentSummary,
};
use crate::prompts::{build_distill_prompt, build_summary_prompt};
use crate::scheduler::WorkerPool;
use crate::storage::{keys, ArtifactStore};

/// Token budget for the reduce call.
pub const REDUCE_MAX_TOKENS: u32 = 4000;

pub async fn run(
    store: &ArtifactStore,
    summarizer: CompletionCall<'_>,
    reducer: CompletionCall<'_>,
    pool: &WorkerPool,
) -> Result<StageOutcome, PipelineError> {
    let curation: CurationManifest = require_json(store, keys::CURATION_MANIFEST).await?;

    let mut summaries = Vec::new();
    let mut pending = Vec::new();
    for address in &curation.retained {
        match store
            .get_json::<DocumentSummary>(&keys::summary(address))
            .await?
        {
            Some(summary) => summaries.push(summary),
            None => pending.push(address.clone()),
        }
    }
    info!(
        memoised = summaries.len(),
        to_summarise = pending.len(),
        "Summarising curated documents"
    );

    let report = pool
        .run_all("summarise", pending, move |address: String| async move {
            let document = store
                .get_json::<CuratedDocument>(&keys::curated_document(&address))
                .await?
                .ok_or_else(|| ItemError::Invalid(format!("curated document {address} is missing")))?;
            let parsed = summarizer
                .attempt::<ParsedSummary>(&build_summary_prompt(&document.text))
                .await?;
            let summary = DocumentSummary {
                address: address.clone(),
                summary: parsed.summary,
            };
            store.put_json(&keys::summary(&address), &summary).await?;
            Ok::<_, ItemError>(summary)
        })
        .await?;
    let mut batches = vec![BatchSummary::of("summarise", &report)];

    for (address, failure) in report.failures() {
        warn!(address = %address, error = %failure, "Summary failed");
    }
    summaries.extend(report.into_successes().into_iter().map(|(_, s)| s));
    if summaries.is_empty() {
        return Ok(StageOutcome::Failed(
            "no document summaries were produced".to_string(),
        ));
    }
    summaries.sort_by(|a, b| a.address.cmp(&b.address));

    let texts: Vec<String> = summaries.iter().map(|s| s.summary.clone()).collect();
    let outcome = reducer
        .request::<ParsedKnowledge>(&build_distill_prompt(&texts))
        .await;
    batches.push(BatchSummary::single("reduce", &outcome));
    let knowledge = match outcome {
        Ok(attempted) => attempted.value,
        Err(failure) => {
            return Ok(StageOutcome::Failed(format!(
                "reduce step yielded no themes: {failure}"
            )));
        }
    };

    let record = DistilledKnowledge {
        knowledge,
        source_documents: summaries.into_iter().map(|s| s.address).collect(),
        distilled_at: Utc::now(),
    };
    store.put_json(keys::DISTILLED_KNOWLEDGE, &record).await?;

    info!(
        themes = record.knowledge.main_themes.len(),
        entities = record.knowledge.key_entities.len(),
        tasks = record.knowledge.potential_tasks.len(),
        "Knowledge distilled"
    );
    Ok(StageOutcome::Success(
        StageReport::new(format!(
            "{} themes, {} entities, {} candidate tasks from {} summaries",
            record.knowledge.main_themes.len(),
            record.knowledge.key_entities.len(),
            record.knowledge.potential_tasks.len(),
            record.source_documents.len()
        ))
        .with_batches(batches),
    ))
}
