//! Feature extraction: image loading composed with model inference.

use std::future::Future;
use std::sync::Arc;

use crate::embedding::loader::{ImageLoader, ImageRef, LoadError};
use crate::embedding::model::EmbeddingModel;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The image could not be loaded or decoded.
    #[error("image unavailable: {0}")]
    ImageUnavailable(#[from] LoadError),

    /// The image decoded fine but the model invocation failed.
    #[error("extraction failed: {0}")]
    Extraction(String),
}

/// Anything that can turn an image reference into a feature vector.
///
/// The orchestrator and the precompute pipeline are generic over this seam,
/// so scenario tests can substitute canned vectors and injected failures.
pub trait FeatureSource: Send + Sync {
    fn extract(
        &self,
        image: &ImageRef,
    ) -> impl Future<Output = Result<Vec<f32>, ExtractError>> + Send;
}

impl<T: FeatureSource> FeatureSource for &T {
    fn extract(
        &self,
        image: &ImageRef,
    ) -> impl Future<Output = Result<Vec<f32>, ExtractError>> + Send {
        (**self).extract(image)
    }
}

/// Production source: `ImageLoader` + `EmbeddingModel`.
pub struct FeatureExtractor {
    loader: ImageLoader,
    model: Arc<EmbeddingModel>,
}

impl FeatureExtractor {
    pub fn new(loader: ImageLoader, model: Arc<EmbeddingModel>) -> Self {
        Self { loader, model }
    }
}

impl FeatureSource for FeatureExtractor {
    async fn extract(&self, image: &ImageRef) -> Result<Vec<f32>, ExtractError> {
        let decoded = self.loader.load(image).await?;

        // Inference is CPU-bound; keep it off the async workers.
        let model = Arc::clone(&self.model);
        tokio::task::spawn_blocking(move || model.encode(&decoded))
            .await
            .map_err(|e| ExtractError::Extraction(format!("inference task failed: {e}")))?
            .map_err(|e| ExtractError::Extraction(e.to_string()))
    }
}
