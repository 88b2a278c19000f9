//! Bulk feature precomputation over a catalog.
//!
//! Runs ahead of serving so that searches hit cached vectors instead of
//! re-extracting the whole catalog per query. The job is idempotent: items
//! that already carry a vector from the active model version are skipped,
//! and a second run over the same catalog does no extraction work.

use futures::future::join_all;
use indicatif::ProgressBar;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::catalog::CatalogItem;
use crate::embedding::{FeatureSource, ImageRef};

/// Outcome summary of one precompute run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchJobState {
    /// Items in the catalog when the job started.
    pub total: usize,
    /// Items whose vector was computed in this run.
    pub processed: usize,
    /// Items skipped because a fresh cached vector already existed.
    pub skipped: usize,
    /// Items whose extraction failed. The job keeps going past these.
    pub failed_ids: Vec<String>,
}

pub struct PrecomputeParams {
    pub batch_size: usize,
    pub item_timeout_ms: u64,
}

enum Outcome {
    Skipped,
    Done(Vec<f32>),
    Failed,
}

/// Compute and cache a feature vector for every catalog item.
///
/// Per-item failure is recorded and skipped over; it never aborts the run.
/// Successful vectors are written back onto the items, tagged with the
/// model version that produced them. Cancellation stops between batches;
/// vectors already written back stay, so a re-run resumes where this one
/// left off.
pub async fn precompute<S: FeatureSource>(
    items: &mut [CatalogItem],
    source: &S,
    model_version: &str,
    params: &PrecomputeParams,
    cancel: &CancellationToken,
    progress: Option<&ProgressBar>,
) -> BatchJobState {
    let mut state = BatchJobState {
        total: items.len(),
        ..Default::default()
    };
    let batch_size = params.batch_size.max(1);

    for batch in items.chunks_mut(batch_size) {
        if cancel.is_cancelled() {
            log::warn!(
                "precompute cancelled after {} of {} items",
                state.processed + state.skipped + state.failed_ids.len(),
                state.total
            );
            return state;
        }

        let futures: Vec<_> = batch
            .iter()
            .map(|item| process_item(item, source, model_version, params.item_timeout_ms))
            .collect();
        let outcomes = tokio::select! {
            _ = cancel.cancelled() => {
                log::warn!(
                    "precompute cancelled after {} of {} items",
                    state.processed + state.skipped + state.failed_ids.len(),
                    state.total
                );
                return state;
            }
            outcomes = join_all(futures) => outcomes,
        };

        for (item, outcome) in batch.iter_mut().zip(outcomes) {
            match outcome {
                Outcome::Skipped => state.skipped += 1,
                Outcome::Done(vector) => {
                    item.set_cached_vector(vector, model_version);
                    state.processed += 1;
                }
                Outcome::Failed => state.failed_ids.push(item.id.clone()),
            }
            if let Some(bar) = progress {
                bar.inc(1);
            }
        }
    }

    log::info!(
        "precompute finished: {} processed, {} skipped, {} failed of {}",
        state.processed,
        state.skipped,
        state.failed_ids.len(),
        state.total
    );
    state
}

async fn process_item<S: FeatureSource>(
    item: &CatalogItem,
    source: &S,
    model_version: &str,
    item_timeout_ms: u64,
) -> Outcome {
    if item.cached_vector_for(model_version).is_some() {
        return Outcome::Skipped;
    }

    let image = ImageRef::parse(&item.image);
    let budget = Duration::from_millis(item_timeout_ms);
    match tokio::time::timeout(budget, source.extract(&image)).await {
        Ok(Ok(vector)) => Outcome::Done(vector),
        Ok(Err(e)) => {
            log::warn!("item={} outcome=error err={e}", item.id);
            Outcome::Failed
        }
        Err(_) => {
            log::warn!("item={} outcome=timeout after {item_timeout_ms}ms", item.id);
            Outcome::Failed
        }
    }
}
