//! Image embedding: loading, the frozen encoder, and feature extraction.

pub mod extractor;
pub mod loader;
pub mod model;

pub use extractor::{ExtractError, FeatureExtractor, FeatureSource};
pub use loader::{ImageLoader, ImageRef, LoadError};
pub use model::EmbeddingModel;
