//! Frozen ONNX vision encoder.
//!
//! The model is an externally supplied artifact loaded once at startup and
//! shared by reference; there is no lazy global. Inference needs `&mut
//! Session`, so calls are serialized behind a mutex — model weights are
//! read-only at inference time, the lock only guards the runtime handle.

use image::DynamicImage;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use std::sync::Mutex;

use crate::config::ModelConfig;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model initialization failed: {0}")]
    Init(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("model returned an empty embedding")]
    EmptyOutput,
}

/// Wrapper around the ONNX session plus the preprocessing contract the
/// model was trained with.
pub struct EmbeddingModel {
    session: Mutex<Session>,
    version: String,
    input_name: String,
    input_size: u32,
    mean: [f32; 3],
    std: [f32; 3],
    dimensions: usize,
}

impl EmbeddingModel {
    /// Load the encoder and probe its output dimensionality with a blank
    /// frame.
    pub fn load(config: &ModelConfig) -> Result<Self, ModelError> {
        let session = Session::builder()
            .map_err(|e| ModelError::Init(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| ModelError::Init(e.to_string()))?
            .with_intra_threads(config.intra_threads)
            .map_err(|e| ModelError::Init(e.to_string()))?
            .commit_from_file(&config.path)
            .map_err(|e| {
                ModelError::Init(format!("{}: {e}", config.path.display()))
            })?;

        let mut model = Self {
            session: Mutex::new(session),
            version: config.version.clone(),
            input_name: config.input_name.clone(),
            input_size: config.input_size,
            mean: config.mean,
            std: config.std,
            dimensions: 0,
        };

        let blank = DynamicImage::new_rgb8(model.input_size, model.input_size);
        model.dimensions = model.encode(&blank)?.len();
        if model.dimensions == 0 {
            return Err(ModelError::EmptyOutput);
        }

        log::info!(
            "loaded model version={} dimensions={} input={}x{}",
            model.version,
            model.dimensions,
            model.input_size,
            model.input_size
        );
        Ok(model)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// SHA-256 of the model version, used as the vector store cache key.
    pub fn model_id_hash(&self) -> [u8; 32] {
        hash_version(&self.version)
    }

    /// Compute the feature vector for a decoded image.
    pub fn encode(&self, img: &DynamicImage) -> Result<Vec<f32>, ModelError> {
        let (shape, data) = self.preprocess(img);
        let input =
            Value::from_array((shape, data)).map_err(|e| ModelError::Inference(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| ModelError::Inference(format!("model lock poisoned: {e}")))?;

        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let (_shape, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        if raw.is_empty() {
            return Err(ModelError::EmptyOutput);
        }

        Ok(l2_normalize(raw))
    }

    /// Resize, convert to RGB, lay out as NCHW, and apply the affine
    /// rescale `(px/255 - mean) / std` the model was trained with.
    fn preprocess(&self, img: &DynamicImage) -> (Vec<usize>, Vec<f32>) {
        let size = self.input_size as usize;
        let resized = img.resize_exact(
            self.input_size,
            self.input_size,
            image::imageops::FilterType::Triangle,
        );
        let rgb = resized.to_rgb8();

        let mut data = vec![0.0f32; 3 * size * size];
        for (x, y, pixel) in rgb.enumerate_pixels() {
            let idx = y as usize * size + x as usize;
            for c in 0..3 {
                data[c * size * size + idx] =
                    (pixel[c] as f32 / 255.0 - self.mean[c]) / self.std[c];
            }
        }

        (vec![1, 3, size, size], data)
    }
}

/// SHA-256 of a model version string.
pub fn hash_version(version: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(version.as_bytes());
    hasher.finalize().into()
}

fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}
