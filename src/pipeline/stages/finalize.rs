//! Stage 7: render conversations into final training records.

use tracing::{info, warn};

use super::{require_jsonl, StageOutcome, StageReport};
use crate::dataset::{ChatFormatter, DatasetItem, FinalRecord, TeraChatTemplate};
use crate::error::PipelineError;
use crate::storage::{keys, ArtifactStore};

/// Formats the persona dataset, or the base dataset when persona styling
/// was skipped or has not produced output.
pub async fn run(
    store: &ArtifactStore,
    chat_template: &str,
    persona_skipped: bool,
) -> Result<StageOutcome, PipelineError> {
    let formatter = match TeraChatTemplate::load(chat_template) {
        Ok(formatter) => formatter,
        Err(e) => {
            return Ok(StageOutcome::Failed(format!(
                "formatting adapter unavailable: {e}"
            )));
        }
    };

    let source = if !persona_skipped && store.contains(keys::PERSONA_DATASET).await? {
        keys::PERSONA_DATASET
    } else {
        info!("No persona dataset, formatting the base dataset");
        keys::BASE_DATASET
    };
    let items: Vec<DatasetItem> = require_jsonl(store, source).await?;

    format_items(store, &formatter, &items, source).await
}

async fn format_items(
    store: &ArtifactStore,
    formatter: &dyn ChatFormatter,
    items: &[DatasetItem],
    source: &str,
) -> Result<StageOutcome, PipelineError> {
    let mut records: Vec<FinalRecord> = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match formatter.format(item) {
            Ok(record) => records.push(record),
            Err(e) => warn!(item = index, error = %e, "Skipping conversation that failed to format"),
        }
    }

    if records.is_empty() {
        return Ok(StageOutcome::Failed(format!(
            "none of the {} conversations in {source} could be formatted",
            items.len()
        )));
    }

    store.put_jsonl(keys::FINAL_DATASET, &records).await?;
    info!(records = records.len(), source, "Final dataset written");
    Ok(StageOutcome::Success(StageReport::new(format!(
        "{} records formatted from {}",
        records.len(),
        source
    ))))
}
