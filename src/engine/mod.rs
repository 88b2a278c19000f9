//! Scoring and search orchestration.

pub mod search;
pub mod similarity;
pub mod threshold;

pub use search::{SearchEngine, SearchError, SearchOptions, SimilarityResult};
