//! Stage-named artifact keys and key builders for content-addressed documents.

/// Session manifest (id, goal, creation time).
pub const SESSION_MANIFEST: &str = "session.json";
/// Pipeline checkpoint record.
pub const CHECKPOINT: &str = "checkpoint.json";
/// Prometheus text exposition written at the end of each run.
pub const METRICS: &str = "metrics.prom";

/// Stage 1 output.
pub const RESEARCH_PLAN: &str = "research_plan.json";
/// Stage 2 completion record.
pub const ACQUISITION_MANIFEST: &str = "acquisition.json";
/// Stage 3 completion record.
pub const CURATION_MANIFEST: &str = "curation.json";
/// Stage 4 output.
pub const DISTILLED_KNOWLEDGE: &str = "distilled_knowledge.json";
/// Stage 5 output.
pub const BASE_DATASET: &str = "base_dataset.jsonl";
/// Stage 6 output.
pub const PERSONA_DATASET: &str = "persona_dataset.jsonl";
/// Stage 7 output.
pub const FINAL_DATASET: &str = "final_dataset.jsonl";

/// Fetched documents, keyed by content address.
pub const RAW_PREFIX: &str = "raw";
/// Curated documents, keyed by the content address of their source.
pub const CURATED_PREFIX: &str = "curated";
/// Per-document relevance decisions.
pub const SCORES_PREFIX: &str = "scores";
/// Per-document summaries from the distillation map step.
pub const SUMMARIES_PREFIX: &str = "summaries";

pub fn raw_document(address: &str) -> String {
    format!("{RAW_PREFIX}/{address}.json")
}

pub fn curated_document(address: &str) -> String {
    format!("{CURATED_PREFIX}/{address}.json")
}

pub fn relevance_decision(address: &str) -> String {
    format!("{SCORES_PREFIX}/{address}.json")
}

pub fn summary(address: &str) -> String {
    format!("{SUMMARIES_PREFIX}/{address}.json")
}

/// Extracts the content address from a `<prefix>/<address>.json` key.
pub fn address_of(key: &str) -> Option<&str> {
    key.rsplit('/').next()?.strip_suffix(".json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_round_trip() {
        let key = curated_document("abc123");
        assert_eq!(key, "curated/abc123.json");
        assert_eq!(address_of(&key), Some("abc123"));
        assert_eq!(address_of("curated/readme.md"), None);
    }
}
