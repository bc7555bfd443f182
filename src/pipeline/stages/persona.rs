//! Stage 6: restyle assistant turns after a persona reference.
//!
//! Only assistant wording is taken from the styled conversation; turn
//! structure always comes from the base item (see [`merge_styled`]).

use std::collections::HashMap;
use std::path::Path;

use tracing::{info, warn};

use super::{require_jsonl, BatchSummary, CompletionCall, ItemError, StageOutcome, StageReport};
use crate::dataset::{merge_styled, DatasetItem};
use crate::error::PipelineError;
use crate::prompts::build_persona_prompt;
use crate::scheduler::WorkerPool;
use crate::storage::{keys, ArtifactStore};

pub async fn run(
    store: &ArtifactStore,
    llm: CompletionCall<'_>,
    persona_file: &Path,
    pool: &WorkerPool,
) -> Result<StageOutcome, PipelineError> {
    let examples = match tokio::fs::read_to_string(persona_file).await {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => {
            warn!(path = %persona_file.display(), "Persona reference is empty, skipping persona stage");
            return Ok(StageOutcome::Success(StageReport::skipped(format!(
                "persona reference {} is empty",
                persona_file.display()
            ))));
        }
        Err(e) => {
            warn!(path = %persona_file.display(), error = %e, "Persona reference unavailable, skipping persona stage");
            return Ok(StageOutcome::Success(StageReport::skipped(format!(
                "no persona reference at {}",
                persona_file.display()
            ))));
        }
    };

    let base: Vec<DatasetItem> = require_jsonl(store, keys::BASE_DATASET).await?;
    info!(items = base.len(), "Styling conversations");

    let examples = examples.as_str();
    let indexed: Vec<(usize, DatasetItem)> = base.iter().cloned().enumerate().collect();
    let report = pool
        .run_all("persona", indexed, move |(_, item): (usize, DatasetItem)| async move {
            let conversation = serde_json::to_string_pretty(&item)
                .map_err(|e| ItemError::Invalid(e.to_string()))?;
            let styled = llm
                .attempt::<DatasetItem>(&build_persona_prompt(examples, &conversation))
                .await?;
            Ok::<_, ItemError>(styled)
        })
        .await?;
    let batch = BatchSummary::of("persona", &report);

    let mut styled: HashMap<usize, DatasetItem> = HashMap::new();
    for ((index, _), outcome) in report.results {
        match outcome {
            Ok(item) => {
                styled.insert(index, item);
            }
            Err(failure) => {
                warn!(item = index, error = %failure, "Styling failed, keeping original");
            }
        }
    }

    let mut restyled = 0usize;
    let items: Vec<DatasetItem> = base
        .iter()
        .enumerate()
        .map(|(index, original)| match styled.get(&index) {
            Some(candidate) => {
                let outcome = merge_styled(original, candidate);
                if outcome.is_styled() {
                    restyled += 1;
                } else {
                    warn!(item = index, "Styled conversation changed its structure, keeping original");
                }
                outcome.into_item()
            }
            None => original.clone(),
        })
        .collect();

    store.put_jsonl(keys::PERSONA_DATASET, &items).await?;
    info!(items = items.len(), restyled, "Persona dataset written");
    Ok(StageOutcome::Success(
        StageReport::new(format!("{} of {} conversations restyled", restyled, items.len()))
            .with_batches(vec![batch]),
    ))
}
