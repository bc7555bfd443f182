//! Stage 2: search every plan query and fetch the resulting pages.
//!
//! Fetched documents are content-addressed by URL. A URL whose raw document
//! is already in the store is not fetched again, so re-running a partially
//! acquired session only pays for what is missing.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tracing::{info, warn};

use super::{require_json, BatchSummary, ItemError, StageOutcome, StageReport};
use crate::error::PipelineError;
use crate::pipeline::artifacts::{AcquisitionManifest, FailedFetch, FetchedDocument, ResearchPlan};
use crate::scheduler::WorkerPool;
use crate::storage::{content_address, keys, ArtifactStore};
use crate::web::{ContentFetcher, SearchHit, SearchProvider};

pub async fn run(
    store: &ArtifactStore,
    search: &dyn SearchProvider,
    fetcher: &dyn ContentFetcher,
    search_depth: usize,
    pool: &WorkerPool,
) -> Result<StageOutcome, PipelineError> {
    let plan: ResearchPlan = require_json(store, keys::RESEARCH_PLAN).await?;

    let searches = pool
        .run_all("search", plan.search_queries.clone(), move |query: String| async move {
            search.search(&query).await
        })
        .await?;
    let search_batch = BatchSummary::of("search", &searches);
    for (query, failure) in searches.failures() {
        warn!(query = %query, error = %failure, "Search query failed, skipping");
    }

    let hits: HashMap<String, Vec<SearchHit>> = searches.into_successes().into_iter().collect();
    let urls = select_urls(&plan.search_queries, &hits, search_depth);
    if urls.is_empty() {
        return Ok(StageOutcome::Failed(
            "search returned no result URLs for any query".to_string(),
        ));
    }

    let mut manifest = AcquisitionManifest::default();
    let mut to_fetch = Vec::new();
    for url in urls {
        if store
            .contains(&keys::raw_document(&content_address(&url)))
            .await?
        {
            manifest.reused.push(url);
        } else {
            to_fetch.push(url);
        }
    }
    info!(
        to_fetch = to_fetch.len(),
        already_stored = manifest.reused.len(),
        "Acquiring documents"
    );

    let fetches = pool
        .run_all("fetch", to_fetch, move |url: String| async move {
            let content = fetcher.fetch_raw(&url).await?;
            let document = FetchedDocument {
                url: url.clone(),
                content,
                fetched_at: Utc::now(),
            };
            store
                .put_json(&keys::raw_document(&content_address(&url)), &document)
                .await?;
            Ok::<_, ItemError>(())
        })
        .await?;
    let fetch_batch = BatchSummary::of("fetch", &fetches);

    for (url, outcome) in fetches.results {
        match outcome {
            Ok(()) => manifest.fetched.push(url),
            Err(failure) => {
                warn!(url = %url, error = %failure, "Fetch failed");
                manifest.failed.push(FailedFetch {
                    url,
                    reason: failure.to_string(),
                });
            }
        }
    }
    manifest.fetched.sort();
    manifest.reused.sort();
    manifest.failed.sort_by(|a, b| a.url.cmp(&b.url));

    let batches = vec![search_batch, fetch_batch];
    if manifest.available() == 0 {
        return Ok(StageOutcome::Failed(format!(
            "no documents could be fetched ({} attempted)",
            manifest.failed.len()
        )));
    }

    store.put_json(keys::ACQUISITION_MANIFEST, &manifest).await?;
    Ok(StageOutcome::Success(
        StageReport::new(format!(
            "{} fetched, {} already stored, {} failed",
            manifest.fetched.len(),
            manifest.reused.len(),
            manifest.failed.len()
        ))
        .with_batches(batches),
    ))
}

/// First `depth` URLs per query, in plan order, without duplicates.
fn select_urls(
    queries: &[String],
    hits: &HashMap<String, Vec<SearchHit>>,
    depth: usize,
) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for query in queries {
        let Some(results) = hits.get(query) else {
            continue;
        };
        for hit in results.iter().take(depth) {
            let url = hit.url.trim();
            if !url.is_empty() && seen.insert(url.to_string()) {
                urls.push(url.to_string());
            }
        }
    }
    urls
}
