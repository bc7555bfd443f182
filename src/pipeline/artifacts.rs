//! Structured artifacts written by the stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::ParsedKnowledge;

/// Stage 1 output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchPlan {
    pub goal: String,
    pub search_queries: Vec<String>,
    #[serde(default)]
    pub relevance_keywords: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Raw fetched content, stored under `raw/<content address>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedDocument {
    pub url: String,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

/// A URL that could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFetch {
    pub url: String,
    pub reason: String,
}

/// Stage 2 completion record. URL lists are sorted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionManifest {
    /// Fetched during this run.
    pub fetched: Vec<String>,
    /// Already present in the store and not fetched again.
    pub reused: Vec<String>,
    pub failed: Vec<FailedFetch>,
}

impl AcquisitionManifest {
    pub fn available(&self) -> usize {
        self.fetched.len() + self.reused.len()
    }
}

/// A cleaned, scored document, stored under `curated/<content address>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuratedDocument {
    pub address: String,
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    pub text: String,
    pub relevance_score: f64,
}

/// Memoised curation outcome for one raw document, under `scores/`.
///
/// `relevance_score` is `None` when the document had too little text to score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceDecision {
    pub address: String,
    pub relevance_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// How the retained document set was reviewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewMode {
    /// An operator edited `curated/` during a pause.
    Human,
    /// The reviewer model chose documents to discard.
    Automatic,
    /// The reviewer failed; every retained document was kept.
    Skipped,
}

/// Stage 3 completion record. Address lists are sorted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurationManifest {
    pub threshold: f64,
    pub retained: Vec<String>,
    pub below_threshold: Vec<String>,
    /// Raw documents with too little text, or whose scoring failed.
    pub unusable: Vec<String>,
    pub discarded_by_review: Vec<String>,
    pub review: ReviewMode,
}

/// Map-step output for one curated document, under `summaries/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub address: String,
    pub summary: String,
}

/// Stage 4 output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistilledKnowledge {
    #[serde(flatten)]
    pub knowledge: ParsedKnowledge,
    pub source_documents: Vec<String>,
    pub distilled_at: DateTime<Utc>,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
