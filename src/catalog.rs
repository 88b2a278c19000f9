//! Catalog records supplied by the external catalog collaborator.
//!
//! The engine only ever reads `id` and `image`, and adds or replaces the
//! cached feature vector fields. Display fields pass through untouched.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// A single catalog item.
///
/// `cached_vector` is only trusted when `cached_model_version` matches the
/// active embedding model version; otherwise it is stale and the item is
/// re-extracted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Opaque identifier, unique within the catalog.
    pub id: String,

    /// Image reference: URL or local path.
    pub image: String,

    /// Pass-through display fields (title, price, ...). Never written by
    /// the engine.
    #[serde(flatten)]
    pub display: serde_json::Map<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_vector: Option<Vec<f32>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_model_version: Option<String>,
}

impl CatalogItem {
    /// The cached vector, but only if it was produced by `version`.
    pub fn cached_vector_for(&self, version: &str) -> Option<&[f32]> {
        match (&self.cached_vector, &self.cached_model_version) {
            (Some(v), Some(cached)) if cached == version => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Replace the cached vector and record the producing model version.
    pub fn set_cached_vector(&mut self, vector: Vec<f32>, version: &str) {
        self.cached_vector = Some(vector);
        self.cached_model_version = Some(version.to_string());
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid catalog JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Load a catalog from a JSON array file.
pub fn load_catalog(path: &Path) -> Result<Vec<CatalogItem>, CatalogError> {
    let data = std::fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}
