//! Engine configuration.
//!
//! Every tunable the scoring pipeline depends on lives here rather than as a
//! hard-coded constant: the original values (pre-filter 0.1, std multiplier
//! 0.3, region boundaries, weights) are empirical defaults, not guaranteed
//! optima.

use crate::engine::similarity::RegionProfile;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_MODEL_PATH: &str = "models/vision.onnx";
const DEFAULT_MODEL_VERSION: &str = "clip-vit-b32-v1";
const DEFAULT_INPUT_NAME: &str = "pixel_values";
const DEFAULT_INPUT_SIZE: u32 = 224;
/// CLIP training distribution statistics (per RGB channel).
const DEFAULT_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const DEFAULT_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];
const DEFAULT_INTRA_THREADS: usize = 4;

const DEFAULT_FETCH_TIMEOUT_MS: u64 = 8_000;
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:124.0) Gecko/20100101 Firefox/124.0";
const DEFAULT_PROXY_PREFIX: &str = "https://corsproxy.io/?url=";

const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_ITEM_TIMEOUT_MS: u64 = 12_000;
const DEFAULT_LIMIT: usize = 8;
const DEFAULT_FLOOR: f32 = 0.2;
const DEFAULT_EPSILON: f32 = 1e-6;
const DEFAULT_PREFILTER: f32 = 0.1;
const DEFAULT_STD_MULTIPLIER: f32 = 0.3;

const DEFAULT_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_MAX_BODY_MB: usize = 25;
const DEFAULT_VECTORS_PATH: &str = "vectors.bin";

/// The frozen embedding model artifact and its expected input distribution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Path to the ONNX vision encoder.
    #[serde(default = "default_model_path")]
    pub path: PathBuf,

    /// Version identifier for the active model. Changing it invalidates
    /// every previously cached vector.
    #[serde(default = "default_model_version")]
    pub version: String,

    /// Name of the model's image input tensor.
    #[serde(default = "default_input_name")]
    pub input_name: String,

    /// Side length of the model's square input, in pixels.
    #[serde(default = "default_input_size")]
    pub input_size: u32,

    /// Per-channel normalization constants. Must match the model's training
    /// distribution exactly; a mismatch silently degrades every similarity
    /// score.
    #[serde(default = "default_mean")]
    pub mean: [f32; 3],
    #[serde(default = "default_std")]
    pub std: [f32; 3],

    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: default_model_path(),
            version: DEFAULT_MODEL_VERSION.to_string(),
            input_name: DEFAULT_INPUT_NAME.to_string(),
            input_size: DEFAULT_INPUT_SIZE,
            mean: DEFAULT_MEAN,
            std: DEFAULT_STD,
            intra_threads: DEFAULT_INTRA_THREADS,
        }
    }
}

/// Remote image fetching.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Budget for a single fetch attempt (direct or proxied).
    #[serde(default = "default_fetch_timeout_ms")]
    pub timeout_ms: u64,

    /// Relay prefix for the one fallback fetch after a failed direct fetch.
    /// The target URL is percent-encoded and appended. `null` disables the
    /// fallback transport.
    #[serde(default = "default_proxy_prefix")]
    pub proxy_prefix: Option<String>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            proxy_prefix: default_proxy_prefix(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Search orchestration and scoring tunables.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Catalog items vectorized concurrently per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Budget for vectorizing one catalog item (load + inference).
    #[serde(default = "default_item_timeout_ms")]
    pub item_timeout_ms: u64,

    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Lower bound for the adaptive threshold.
    #[serde(default = "default_floor")]
    pub default_floor: f32,

    /// Components within this distance of zero are treated as noise.
    #[serde(default = "default_epsilon")]
    pub epsilon: f32,

    /// Coarse pre-filter: scores at or below this never enter the
    /// threshold statistics.
    #[serde(default = "default_prefilter")]
    pub prefilter: f32,

    /// Multiplier on the standard deviation in the adaptive threshold.
    #[serde(default = "default_std_multiplier")]
    pub std_multiplier: f32,

    #[serde(default)]
    pub regions: RegionProfile,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            item_timeout_ms: DEFAULT_ITEM_TIMEOUT_MS,
            default_limit: DEFAULT_LIMIT,
            default_floor: DEFAULT_FLOOR,
            epsilon: DEFAULT_EPSILON,
            prefilter: DEFAULT_PREFILTER,
            std_multiplier: DEFAULT_STD_MULTIPLIER,
            regions: RegionProfile::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_addr")]
    pub addr: String,

    /// Upload size cap in megabytes.
    #[serde(default = "default_max_body_mb")]
    pub max_body_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            max_body_mb: DEFAULT_MAX_BODY_MB,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub server: ServerConfig,

    /// Sidecar file holding precomputed feature vectors.
    #[serde(default = "default_vectors_path")]
    pub vectors_path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_yml::Error),
}

impl Config {
    /// Load from a YAML file, or fall back to defaults when no path is
    /// given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_yml::from_str(&text)?)
    }

    /// Serialize the full config, defaults included, for `config init`.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yml::to_string(self)?)
    }
}

fn default_model_path() -> PathBuf {
    PathBuf::from(DEFAULT_MODEL_PATH)
}

fn default_model_version() -> String {
    DEFAULT_MODEL_VERSION.to_string()
}

fn default_input_name() -> String {
    DEFAULT_INPUT_NAME.to_string()
}

fn default_input_size() -> u32 {
    DEFAULT_INPUT_SIZE
}

fn default_mean() -> [f32; 3] {
    DEFAULT_MEAN
}

fn default_std() -> [f32; 3] {
    DEFAULT_STD
}

fn default_intra_threads() -> usize {
    DEFAULT_INTRA_THREADS
}

fn default_fetch_timeout_ms() -> u64 {
    DEFAULT_FETCH_TIMEOUT_MS
}

fn default_proxy_prefix() -> Option<String> {
    Some(DEFAULT_PROXY_PREFIX.to_string())
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_item_timeout_ms() -> u64 {
    DEFAULT_ITEM_TIMEOUT_MS
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_floor() -> f32 {
    DEFAULT_FLOOR
}

fn default_epsilon() -> f32 {
    DEFAULT_EPSILON
}

fn default_prefilter() -> f32 {
    DEFAULT_PREFILTER
}

fn default_std_multiplier() -> f32 {
    DEFAULT_STD_MULTIPLIER
}

fn default_addr() -> String {
    DEFAULT_ADDR.to_string()
}

fn default_max_body_mb() -> usize {
    DEFAULT_MAX_BODY_MB
}

fn default_vectors_path() -> PathBuf {
    PathBuf::from(DEFAULT_VECTORS_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.search.batch_size, 10);
        assert!((config.search.default_floor - 0.2).abs() < f32::EPSILON);
        assert!((config.search.prefilter - 0.1).abs() < f32::EPSILON);
        assert_eq!(config.model.input_size, 224);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let yaml = "search:\n  batch_size: 4\nmodel:\n  version: resnet-v2\n";
        let config: Config = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.search.batch_size, 4);
        assert_eq!(config.model.version, "resnet-v2");
        // Untouched fields keep their defaults.
        assert!((config.search.std_multiplier - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.server.addr, "0.0.0.0:8080");
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = Config::default();
        let yaml = config.to_yaml().unwrap();
        let back: Config = serde_yml::from_str(&yaml).unwrap();
        assert_eq!(back.model.version, config.model.version);
        assert_eq!(back.vectors_path, config.vectors_path);
    }

    #[test]
    fn test_proxy_can_be_disabled() {
        let yaml = "loader:\n  proxy_prefix: null\n";
        let config: Config = serde_yml::from_str(yaml).unwrap();
        assert!(config.loader.proxy_prefix.is_none());
    }
}
