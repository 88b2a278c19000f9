//! Search orchestration: query extraction, batched catalog vectorization,
//! scoring, adaptive thresholding, and ranking.

use futures::future::join_all;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::catalog::CatalogItem;
use crate::config::SearchConfig;
use crate::embedding::{ExtractError, FeatureSource, ImageRef};
use crate::engine::similarity;
use crate::engine::threshold::{select_threshold, NoCandidates};

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// The query image itself was unusable. Fatal to the whole call, so the
    /// caller can distinguish "couldn't process your photo" from "no
    /// similar items found".
    #[error("could not extract features from the query image: {0}")]
    QueryExtraction(#[source] ExtractError),

    /// Caller-initiated cancellation. Never yields a partial result list.
    #[error("search cancelled")]
    Cancelled,
}

/// Per-call knobs; everything else comes from `SearchConfig`.
#[derive(Clone, Copy, Debug)]
pub struct SearchOptions {
    pub limit: usize,
    pub floor: f32,
}

/// One ranked match. Produced fresh per search, never persisted.
#[derive(Clone, Debug, Serialize)]
pub struct SimilarityResult {
    pub id: String,
    pub score: f32,
}

/// Top-level search entry point, generic over the vector source.
pub struct SearchEngine<S> {
    source: S,
    config: SearchConfig,
    model_version: String,
}

impl<S: FeatureSource> SearchEngine<S> {
    pub fn new(source: S, config: SearchConfig, model_version: impl Into<String>) -> Self {
        Self {
            source,
            config,
            model_version: model_version.into(),
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    /// Rank catalog items by visual similarity to the query image.
    ///
    /// Per-item failures degrade to a zero score; query-side failure and
    /// cancellation abort the call. The catalog input is never mutated.
    pub async fn search(
        &self,
        query: &ImageRef,
        catalog: &[CatalogItem],
        opts: &SearchOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<SimilarityResult>, SearchError> {
        if cancel.is_cancelled() {
            return Err(SearchError::Cancelled);
        }

        let query_vector = tokio::select! {
            _ = cancel.cancelled() => return Err(SearchError::Cancelled),
            result = self.source.extract(query) => {
                result.map_err(SearchError::QueryExtraction)?
            }
        };

        let vectors = self.vectorize_catalog(catalog, cancel).await?;

        // Score in catalog order; vectorization failures count as 0.
        let scores: Vec<f32> = vectors
            .iter()
            .map(|v| match v {
                Some(v) => similarity::weighted(
                    &query_vector,
                    v,
                    &self.config.regions,
                    self.config.epsilon,
                ),
                None => 0.0,
            })
            .collect();

        let threshold = match select_threshold(
            &scores,
            opts.floor,
            self.config.prefilter,
            self.config.std_multiplier,
        ) {
            Ok(t) => t,
            Err(NoCandidates) => {
                log::info!("search produced no candidates above the pre-filter");
                return Ok(Vec::new());
            }
        };

        let mut hits: Vec<SimilarityResult> = catalog
            .iter()
            .zip(scores.iter())
            .filter(|(_, score)| **score > threshold)
            .map(|(item, score)| SimilarityResult {
                id: item.id.clone(),
                score: *score,
            })
            .collect();

        // Stable sort: ties keep catalog input order.
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(opts.limit);

        log::debug!(
            "search ranked {} of {} items (threshold {:.3})",
            hits.len(),
            catalog.len(),
            threshold
        );
        Ok(hits)
    }

    /// Obtain a vector per item, in fixed-size batches with bounded
    /// concurrency. Output is aligned with the input by position, never by
    /// completion order.
    async fn vectorize_catalog(
        &self,
        catalog: &[CatalogItem],
        cancel: &CancellationToken,
    ) -> Result<Vec<Option<Vec<f32>>>, SearchError> {
        let batch_size = self.config.batch_size.max(1);
        let mut vectors = Vec::with_capacity(catalog.len());

        for batch in catalog.chunks(batch_size) {
            let futures: Vec<_> = batch.iter().map(|item| self.vectorize_item(item)).collect();
            let results = tokio::select! {
                _ = cancel.cancelled() => return Err(SearchError::Cancelled),
                results = join_all(futures) => results,
            };
            vectors.extend(results);
        }

        Ok(vectors)
    }

    /// Cached vector when fresh, extraction otherwise. Failures and
    /// timeouts degrade to `None`; they never abort the batch.
    async fn vectorize_item(&self, item: &CatalogItem) -> Option<Vec<f32>> {
        if let Some(cached) = item.cached_vector_for(&self.model_version) {
            return Some(cached.to_vec());
        }

        let image = ImageRef::parse(&item.image);
        let budget = Duration::from_millis(self.config.item_timeout_ms);
        match tokio::time::timeout(budget, self.source.extract(&image)).await {
            Ok(Ok(vector)) => Some(vector),
            Ok(Err(e)) => {
                log::warn!("item={} outcome=error err={e}", item.id);
                None
            }
            Err(_) => {
                log::warn!(
                    "item={} outcome=timeout after {}ms",
                    item.id,
                    self.config.item_timeout_ms
                );
                None
            }
        }
    }
}
