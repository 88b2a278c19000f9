//! Scenario tests for search orchestration, precompute, and the HTTP API.
//!
//! All of them run against `StubSource`, a canned vector source keyed by
//! the image reference, so no model artifact or network is involved.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::catalog::CatalogItem;
use crate::embedding::{ExtractError, FeatureSource, ImageRef};

mod api;

/// Vector source with canned answers and injected failures.
pub struct StubSource {
    vectors: HashMap<String, Vec<f32>>,
    failures: HashSet<String>,
    hangs: HashSet<String>,
    calls: AtomicUsize,
}

impl StubSource {
    pub fn new(vectors: HashMap<String, Vec<f32>>) -> Self {
        Self {
            vectors,
            failures: HashSet::new(),
            hangs: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_on(mut self, key: &str) -> Self {
        self.failures.insert(key.to_string());
        self
    }

    pub fn hanging_on(mut self, key: &str) -> Self {
        self.hangs.insert(key.to_string());
        self
    }

    /// Number of extraction attempts made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FeatureSource for StubSource {
    async fn extract(&self, image: &ImageRef) -> Result<Vec<f32>, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = image.describe();

        if self.hangs.contains(&key) {
            futures::future::pending::<()>().await;
        }
        if self.failures.contains(&key) {
            return Err(ExtractError::Extraction(format!("stubbed failure for {key}")));
        }
        self.vectors
            .get(&key)
            .cloned()
            .ok_or_else(|| ExtractError::Extraction(format!("no stub vector for {key}")))
    }
}

pub fn item(id: &str, image: &str) -> CatalogItem {
    serde_json::from_value(serde_json::json!({ "id": id, "image": image })).unwrap()
}

/// Query vector: uniform direction across every region.
pub fn query_vector() -> Vec<f32> {
    vec![1.0; 20]
}

/// Near-duplicate of the query: one damped component.
pub fn near_vector() -> Vec<f32> {
    let mut v = query_vector();
    v[0] = 0.5;
    v
}

/// Moderately similar: alternates between full and damped components, so
/// every region's direction differs from the query's.
pub fn mid_vector() -> Vec<f32> {
    (0..20).map(|i| if i % 2 == 0 { 1.0 } else { 0.1 }).collect()
}

/// Opposite direction; always scores below the pre-filter.
pub fn opposite_vector() -> Vec<f32> {
    vec![-1.0; 20]
}
