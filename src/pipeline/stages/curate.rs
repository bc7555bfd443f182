//! Stage 3: extract, score and filter the fetched documents.
//!
//! The stage runs in one of three explicit modes:
//!
//! - [`CurationMode::FilterThenPause`]: score and filter, then pause so an
//!   operator can delete unwanted files from `curated/`.
//! - [`CurationMode::FinalizeAfterReview`]: the stage paused on a previous
//!   run; accept whatever the operator left in `curated/` and complete.
//! - [`CurationMode::Automatic`]: score and filter, then let the reviewer
//!   model pick documents to discard.
//!
//! Relevance decisions are memoised under `scores/`, so a re-entered stage
//! only scores documents it has not seen.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, warn};

use super::{require_json, BatchSummary, CompletionCall, ItemError, StageOutcome, StageReport};
use crate::error::PipelineError;
use crate::llm::{ParsedReview, ParsedScore};
use crate::pipeline::artifacts::{
    AcquisitionManifest, CuratedDocument, CurationManifest, FetchedDocument, RelevanceDecision,
    ResearchPlan, ReviewMode,
};
use crate::prompts::{build_review_prompt, build_score_prompt};
use crate::scheduler::{Attempted, ItemFailure, WorkerPool};
use crate::storage::{content_address, keys, ArtifactStore};
use crate::web::TextExtractor;

/// How this invocation of the stage behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurationMode {
    FilterThenPause,
    FinalizeAfterReview,
    Automatic,
}

impl CurationMode {
    /// Chooses the mode from the human-review setting and the stored pause flag.
    ///
    /// A stored pause always means the review already happened, even if
    /// human review has since been switched off.
    pub fn select(human_in_the_loop: bool, paused_for_review: bool) -> Self {
        match (paused_for_review, human_in_the_loop) {
            (true, _) => CurationMode::FinalizeAfterReview,
            (false, true) => CurationMode::FilterThenPause,
            (false, false) => CurationMode::Automatic,
        }
    }
}

/// Adapters and settings the curation stage uses.
pub struct Curator<'a> {
    pub store: &'a ArtifactStore,
    pub extractor: &'a dyn TextExtractor,
    pub scorer: CompletionCall<'a>,
    pub reviewer: CompletionCall<'a>,
    pub pool: &'a WorkerPool,
    pub threshold: f64,
}

impl Curator<'_> {
    pub async fn run(&self, mode: CurationMode) -> Result<StageOutcome, PipelineError> {
        info!(mode = ?mode, threshold = self.threshold, "Curating documents");
        let acquisition: AcquisitionManifest =
            require_json(self.store, keys::ACQUISITION_MANIFEST).await?;
        let addresses = acquired_addresses(&acquisition);

        if mode == CurationMode::FinalizeAfterReview {
            return self.finalize_after_review(&addresses).await;
        }

        let plan: ResearchPlan = require_json(self.store, keys::RESEARCH_PLAN).await?;
        let (decisions, unscored, batch) = self.score_all(&plan, &addresses).await?;
        let filtered = self.write_filtered(&decisions).await?;

        let mut manifest = CurationManifest {
            threshold: self.threshold,
            retained: filtered.retained.keys().cloned().collect(),
            below_threshold: filtered.below_threshold,
            unusable: merge_sorted(filtered.unusable, unscored),
            discarded_by_review: Vec::new(),
            review: ReviewMode::Automatic,
        };
        let mut batches = vec![batch];

        if mode == CurationMode::FilterThenPause {
            info!(retained = manifest.retained.len(), "Pausing for human review");
            return Ok(StageOutcome::Paused(format!(
                "{} documents retained in {}; delete any that should not be used, then re-run \
                 to continue",
                manifest.retained.len(),
                self.store.root().join(keys::CURATED_PREFIX).display()
            )));
        }

        if !filtered.retained.is_empty() {
            let review = self.review(&plan.goal, &filtered.retained).await;
            batches.push(BatchSummary::single("review", &review));
            match review {
                Ok(attempted) => {
                    let discard = matching_addresses(&attempted.value, &filtered.retained);
                    for address in &discard {
                        self.store.delete(&keys::curated_document(address)).await?;
                    }
                    manifest.retained.retain(|a| !discard.contains(a));
                    manifest.discarded_by_review = discard.into_iter().collect();
                }
                Err(failure) => {
                    warn!(error = %failure, "Automatic review failed, keeping every document");
                    manifest.review = ReviewMode::Skipped;
                }
            }
        }

        self.complete(manifest, batches).await
    }

    /// Returns decisions by address, addresses that could not be scored, and the batch summary.
    async fn score_all(
        &self,
        plan: &ResearchPlan,
        addresses: &[String],
    ) -> Result<(BTreeMap<String, RelevanceDecision>, Vec<String>, BatchSummary), PipelineError>
    {
        let mut decisions = BTreeMap::new();
        let mut pending = Vec::new();
        for address in addresses {
            match self
                .store
                .get_json::<RelevanceDecision>(&keys::relevance_decision(address))
                .await?
            {
                Some(decision) => {
                    decisions.insert(address.clone(), decision);
                }
                None => pending.push(address.clone()),
            }
        }
        info!(
            memoised = decisions.len(),
            to_score = pending.len(),
            "Scoring documents"
        );

        let store = self.store;
        let extractor = self.extractor;
        let scorer = self.scorer;
        let report = self
            .pool
            .run_all("score", pending, move |address: String| async move {
                let decision = score_document(store, extractor, scorer, plan, &address).await?;
                store
                    .put_json(&keys::relevance_decision(&address), &decision)
                    .await?;
                Ok::<_, ItemError>(decision)
            })
            .await?;
        let batch = BatchSummary::of("score", &report);

        let mut unscored = Vec::new();
        for (address, outcome) in report.results {
            match outcome {
                Ok(decision) => {
                    decisions.insert(address, decision);
                }
                Err(failure) => {
                    warn!(address = %address, error = %failure, "Scoring failed");
                    unscored.push(address);
                }
            }
        }
        unscored.sort();
        Ok((decisions, unscored, batch))
    }

    /// Writes curated documents at or above the threshold and removes stale ones.
    async fn write_filtered(
        &self,
        decisions: &BTreeMap<String, RelevanceDecision>,
    ) -> Result<Filtered, PipelineError> {
        let mut filtered = Filtered::default();
        for (address, decision) in decisions {
            match decision.relevance_score {
                Some(score) if score >= self.threshold => {
                    match self.curated_document(address, score).await? {
                        Some(document) => {
                            self.store
                                .put_json(&keys::curated_document(address), &document)
                                .await?;
                            filtered.retained.insert(address.clone(), document);
                        }
                        None => filtered.unusable.push(address.clone()),
                    }
                }
                Some(_) => filtered.below_threshold.push(address.clone()),
                None => filtered.unusable.push(address.clone()),
            }
        }

        for key in self.store.list(keys::CURATED_PREFIX)? {
            let keep = keys::address_of(&key).is_some_and(|a| filtered.retained.contains_key(a));
            if !keep {
                self.store.delete(&key).await?;
            }
        }

        info!(
            retained = filtered.retained.len(),
            below_threshold = filtered.below_threshold.len(),
            unusable = filtered.unusable.len(),
            "Relevance filter applied"
        );
        Ok(filtered)
    }

    async fn curated_document(
        &self,
        address: &str,
        score: f64,
    ) -> Result<Option<CuratedDocument>, PipelineError> {
        let Some(raw) = self
            .store
            .get_json::<FetchedDocument>(&keys::raw_document(address))
            .await?
        else {
            return Ok(None);
        };
        Ok(self.extractor.extract(&raw.content).map(|extracted| CuratedDocument {
            address: address.to_string(),
            url: raw.url,
            title: extracted.title,
            text: extracted.text,
            relevance_score: score,
        }))
    }

    async fn review(
        &self,
        goal: &str,
        retained: &BTreeMap<String, CuratedDocument>,
    ) -> Result<Attempted<ParsedReview>, ItemFailure> {
        let documents: Vec<(String, String)> = retained
            .iter()
            .map(|(address, doc)| (format!("{address}.json"), doc.text.clone()))
            .collect();
        self.reviewer
            .request::<ParsedReview>(&build_review_prompt(goal, &documents))
            .await
    }

    /// Accepts the operator-edited `curated/` directory as final.
    async fn finalize_after_review(
        &self,
        addresses: &[String],
    ) -> Result<StageOutcome, PipelineError> {
        let present: BTreeSet<String> = self
            .store
            .list(keys::CURATED_PREFIX)?
            .iter()
            .filter_map(|key| keys::address_of(key).map(str::to_string))
            .collect();

        let mut manifest = CurationManifest {
            threshold: self.threshold,
            retained: present.iter().cloned().collect(),
            below_threshold: Vec::new(),
            unusable: Vec::new(),
            discarded_by_review: Vec::new(),
            review: ReviewMode::Human,
        };

        for address in addresses {
            let decision = self
                .store
                .get_json::<RelevanceDecision>(&keys::relevance_decision(address))
                .await?;
            match decision.and_then(|d| d.relevance_score) {
                Some(score) if score >= self.threshold => {
                    if !present.contains(address) {
                        manifest.discarded_by_review.push(address.clone());
                    }
                }
                Some(_) => manifest.below_threshold.push(address.clone()),
                None => manifest.unusable.push(address.clone()),
            }
        }

        info!(
            retained = manifest.retained.len(),
            removed_by_operator = manifest.discarded_by_review.len(),
            "Human review accepted"
        );
        self.complete(manifest, Vec::new()).await
    }

    async fn complete(
        &self,
        manifest: CurationManifest,
        batches: Vec<BatchSummary>,
    ) -> Result<StageOutcome, PipelineError> {
        if manifest.retained.is_empty() {
            warn!("No documents survived curation");
        }
        self.store
            .put_json(keys::CURATION_MANIFEST, &manifest)
            .await?;
        Ok(StageOutcome::Success(
            StageReport::new(format!(
                "{} retained, {} below threshold, {} unusable, {} discarded by review",
                manifest.retained.len(),
                manifest.below_threshold.len(),
                manifest.unusable.len(),
                manifest.discarded_by_review.len()
            ))
            .with_batches(batches),
        ))
    }
}

#[derive(Default)]
struct Filtered {
    retained: BTreeMap<String, CuratedDocument>,
    below_threshold: Vec<String>,
    unusable: Vec<String>,
}

async fn score_document(
    store: &ArtifactStore,
    extractor: &dyn TextExtractor,
    scorer: CompletionCall<'_>,
    plan: &ResearchPlan,
    address: &str,
) -> Result<RelevanceDecision, ItemError> {
    let raw = store
        .get_json::<FetchedDocument>(&keys::raw_document(address))
        .await?
        .ok_or_else(|| ItemError::Invalid(format!("raw document {address} is missing")))?;

    let Some(extracted) = extractor.extract(&raw.content) else {
        return Ok(RelevanceDecision {
            address: address.to_string(),
            relevance_score: None,
            note: Some("too little readable text".to_string()),
        });
    };

    let prompt = build_score_prompt(&plan.goal, &plan.relevance_keywords, &extracted.text);
    let score = scorer.attempt::<ParsedScore>(&prompt).await?;
    Ok(RelevanceDecision {
        address: address.to_string(),
        relevance_score: Some(score.relevance_score),
        note: None,
    })
}

fn acquired_addresses(manifest: &AcquisitionManifest) -> Vec<String> {
    manifest
        .fetched
        .iter()
        .chain(&manifest.reused)
        .map(|url| content_address(url))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Resolves reviewer identifiers (`<address>.json`, bare addresses or URLs).
fn matching_addresses(
    review: &ParsedReview,
    retained: &BTreeMap<String, CuratedDocument>,
) -> BTreeSet<String> {
    review
        .files_to_discard
        .iter()
        .filter_map(|id| {
            let id = id.trim();
            let bare = id.rsplit('/').next().unwrap_or(id);
            let bare = bare.strip_suffix(".json").unwrap_or(bare);
            if retained.contains_key(bare) {
                return Some(bare.to_string());
            }
            retained
                .iter()
                .find(|(_, doc)| doc.url == id)
                .map(|(address, _)| address.clone())
        })
        .collect()
}

fn merge_sorted(mut a: Vec<String>, b: Vec<String>) -> Vec<String> {
    a.extend(b);
    a.sort();
    a.dedup();
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::CompletionOptions;
    use crate::pipeline::stages::test_support::{service, RoutedProvider};
    use crate::prompts::{REVIEW_SYSTEM_PROMPT, SCORE_SYSTEM_PROMPT};
    use crate::scheduler::{RetryPolicy, WorkerPoolConfig};
    use crate::web::HtmlTextExtractor;
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Pages whose body carries `score=<x>`; the scorer echoes it back.
    fn page(score: &str) -> Vec<u8> {
        format!(
            "<html><head><title>Doc {score}</title></head><body><p>score={score}</p><p>{}</p></body></html>",
            "Relevant prose about ownership and borrowing. ".repeat(10)
        )
        .into_bytes()
    }

    fn echo_score(user: &str) -> Result<String, LlmError> {
        let score = user
            .split("score=")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .ok_or_else(|| LlmError::RequestFailed("no score marker".into()))?;
        Ok(format!("{{\"relevance_score\": {score}}}"))
    }

    struct Fixture {
        _dir: TempDir,
        store: ArtifactStore,
        provider: Arc<RoutedProvider>,
    }

    async fn fixture(scores: &[&str], review: &'static str) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        let plan = ResearchPlan {
            goal: "Learn ownership".into(),
            search_queries: vec!["q".into()],
            relevance_keywords: vec!["borrow".into()],
            created_at: Utc::now(),
        };
        store.put_json(keys::RESEARCH_PLAN, &plan).await.unwrap();

        let mut acquisition = AcquisitionManifest::default();
        for (i, score) in scores.iter().enumerate() {
            let url = format!("https://docs.example/{i}");
            let doc = FetchedDocument {
                url: url.clone(),
                content: page(score),
                fetched_at: Utc::now(),
            };
            store
                .put_json(&keys::raw_document(&content_address(&url)), &doc)
                .await
                .unwrap();
            acquisition.fetched.push(url);
        }
        store
            .put_json(keys::ACQUISITION_MANIFEST, &acquisition)
            .await
            .unwrap();

        let provider = Arc::new(
            RoutedProvider::default()
                .route(SCORE_SYSTEM_PROMPT, echo_score)
                .route(REVIEW_SYSTEM_PROMPT, move |_| Ok(review.to_string())),
        );
        Fixture {
            _dir: dir,
            store,
            provider,
        }
    }

    async fn curate(f: &Fixture, mode: CurationMode) -> StageOutcome {
        let service = service(f.provider.clone());
        let options = CompletionOptions::new("m");
        let retry = RetryPolicy::none();
        let call = CompletionCall {
            service: &service,
            options: &options,
            retry: &retry,
            timeout: Duration::from_secs(5),
        };
        let pool = WorkerPool::new(WorkerPoolConfig::new(3).with_retry(RetryPolicy::none())).unwrap();
        let extractor = HtmlTextExtractor::default();
        Curator {
            store: &f.store,
            extractor: &extractor,
            scorer: call,
            reviewer: call,
            pool: &pool,
            threshold: 0.7,
        }
        .run(mode)
        .await
        .unwrap()
    }

    async fn manifest(f: &Fixture) -> CurationManifest {
        f.store
            .get_json(keys::CURATION_MANIFEST)
            .await
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_mode_selection() {
        assert_eq!(CurationMode::select(true, false), CurationMode::FilterThenPause);
        assert_eq!(CurationMode::select(true, true), CurationMode::FinalizeAfterReview);
        assert_eq!(CurationMode::select(false, true), CurationMode::FinalizeAfterReview);
        assert_eq!(CurationMode::select(false, false), CurationMode::Automatic);
    }

    #[tokio::test]
    async fn test_threshold_keeps_scores_at_or_above() {
        let f = fixture(&["0.9", "0.5", "0.71"], r#"{"files_to_discard": []}"#).await;
        let outcome = curate(&f, CurationMode::Automatic).await;
        assert!(matches!(outcome, StageOutcome::Success(_)));

        let m = manifest(&f).await;
        assert_eq!(m.retained.len(), 2);
        assert_eq!(m.below_threshold.len(), 1);

        let mut kept: Vec<f64> = Vec::new();
        for key in f.store.list(keys::CURATED_PREFIX).unwrap() {
            let doc: CuratedDocument = f.store.get_json(&key).await.unwrap().unwrap();
            kept.push(doc.relevance_score);
        }
        kept.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(kept, vec![0.71, 0.9]);
    }

    #[tokio::test]
    async fn test_reviewer_discards_named_documents() {
        let discard = content_address("https://docs.example/0");
        let review: &'static str =
            Box::leak(format!(r#"{{"files_to_discard": ["{discard}.json"]}}"#).into_boxed_str());
        let f = fixture(&["0.9", "0.8"], review).await;
        curate(&f, CurationMode::Automatic).await;

        let m = manifest(&f).await;
        assert_eq!(m.discarded_by_review, vec![discard.clone()]);
        assert_eq!(m.retained.len(), 1);
        assert!(!f
            .store
            .contains(&keys::curated_document(&discard))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_reviewer_failure_keeps_everything() {
        let f = fixture(&["0.9", "0.8"], "no json here").await;
        curate(&f, CurationMode::Automatic).await;

        let m = manifest(&f).await;
        assert_eq!(m.review, ReviewMode::Skipped);
        assert_eq!(m.retained.len(), 2);
    }

    #[tokio::test]
    async fn test_pause_then_finalize_after_review() {
        let f = fixture(&["0.9", "0.8", "0.2"], r#"{"files_to_discard": []}"#).await;

        let outcome = curate(&f, CurationMode::FilterThenPause).await;
        assert!(matches!(outcome, StageOutcome::Paused(_)));
        assert!(!f.store.contains(keys::CURATION_MANIFEST).await.unwrap());
        assert_eq!(f.store.list(keys::CURATED_PREFIX).unwrap().len(), 2);

        // Operator removes one document during the pause.
        let removed = content_address("https://docs.example/1");
        f.store
            .delete(&keys::curated_document(&removed))
            .await
            .unwrap();

        let scored = f.provider.call_count(SCORE_SYSTEM_PROMPT);
        let outcome = curate(&f, CurationMode::FinalizeAfterReview).await;
        assert!(matches!(outcome, StageOutcome::Success(_)));
        assert_eq!(f.provider.call_count(SCORE_SYSTEM_PROMPT), scored);
        assert_eq!(f.provider.call_count(REVIEW_SYSTEM_PROMPT), 0);

        let m = manifest(&f).await;
        assert_eq!(m.review, ReviewMode::Human);
        assert_eq!(m.retained.len(), 1);
        assert_eq!(m.discarded_by_review, vec![removed]);
        assert_eq!(m.below_threshold.len(), 1);
    }

    #[tokio::test]
    async fn test_scores_are_memoised() {
        let f = fixture(&["0.9", "0.3"], r#"{"files_to_discard": []}"#).await;
        curate(&f, CurationMode::Automatic).await;
        assert_eq!(f.provider.call_count(SCORE_SYSTEM_PROMPT), 2);

        curate(&f, CurationMode::Automatic).await;
        assert_eq!(f.provider.call_count(SCORE_SYSTEM_PROMPT), 2);
    }

    #[tokio::test]
    async fn test_short_documents_are_unusable() {
        let f = fixture(&["0.9"], r#"{"files_to_discard": []}"#).await;
        let url = "https://docs.example/short";
        let doc = FetchedDocument {
            url: url.into(),
            content: b"<html><body>tiny</body></html>".to_vec(),
            fetched_at: Utc::now(),
        };
        f.store
            .put_json(&keys::raw_document(&content_address(url)), &doc)
            .await
            .unwrap();
        let mut acquisition: AcquisitionManifest = f
            .store
            .get_json(keys::ACQUISITION_MANIFEST)
            .await
            .unwrap()
            .unwrap();
        acquisition.fetched.push(url.into());
        f.store
            .put_json(keys::ACQUISITION_MANIFEST, &acquisition)
            .await
            .unwrap();

        curate(&f, CurationMode::Automatic).await;
        let m = manifest(&f).await;
        assert_eq!(m.unusable, vec![content_address(url)]);
        assert_eq!(f.provider.call_count(SCORE_SYSTEM_PROMPT), 1);
    }
}
