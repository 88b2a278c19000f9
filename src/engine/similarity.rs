//! Weighted multi-region cosine similarity for product imagery.
//!
//! Two scoring functions:
//! - `cosine`: plain cosine similarity with near-zero components treated as
//!   noise and excluded from the dot product and both magnitudes.
//! - `weighted`: blends the cosine of four vector regions (full, mid, early,
//!   late). Texture and material cues concentrate in the middle of a
//!   convolutional embedding, so the mid region carries the largest weight.

use serde::{Deserialize, Serialize};

/// Default fractional region boundaries.
const DEFAULT_EARLY_END: f32 = 0.25;
const DEFAULT_MID_START: f32 = 0.30;
const DEFAULT_MID_END: f32 = 0.70;
const DEFAULT_LATE_START: f32 = 0.75;

/// Default region weights. They sum to 1.0.
const DEFAULT_WEIGHT_FULL: f32 = 0.20;
const DEFAULT_WEIGHT_MID: f32 = 0.50;
const DEFAULT_WEIGHT_EARLY: f32 = 0.10;
const DEFAULT_WEIGHT_LATE: f32 = 0.20;

/// Region boundaries and weights for the blended score.
///
/// Boundaries are fractions of the vector length. These are tuned defaults,
/// not guaranteed optima, so they live in the config file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegionProfile {
    #[serde(default = "default_early_end")]
    pub early_end: f32,
    #[serde(default = "default_mid_start")]
    pub mid_start: f32,
    #[serde(default = "default_mid_end")]
    pub mid_end: f32,
    #[serde(default = "default_late_start")]
    pub late_start: f32,

    #[serde(default = "default_weight_full")]
    pub weight_full: f32,
    #[serde(default = "default_weight_mid")]
    pub weight_mid: f32,
    #[serde(default = "default_weight_early")]
    pub weight_early: f32,
    #[serde(default = "default_weight_late")]
    pub weight_late: f32,
}

impl Default for RegionProfile {
    fn default() -> Self {
        Self {
            early_end: DEFAULT_EARLY_END,
            mid_start: DEFAULT_MID_START,
            mid_end: DEFAULT_MID_END,
            late_start: DEFAULT_LATE_START,
            weight_full: DEFAULT_WEIGHT_FULL,
            weight_mid: DEFAULT_WEIGHT_MID,
            weight_early: DEFAULT_WEIGHT_EARLY,
            weight_late: DEFAULT_WEIGHT_LATE,
        }
    }
}

fn default_early_end() -> f32 {
    DEFAULT_EARLY_END
}

fn default_mid_start() -> f32 {
    DEFAULT_MID_START
}

fn default_mid_end() -> f32 {
    DEFAULT_MID_END
}

fn default_late_start() -> f32 {
    DEFAULT_LATE_START
}

fn default_weight_full() -> f32 {
    DEFAULT_WEIGHT_FULL
}

fn default_weight_mid() -> f32 {
    DEFAULT_WEIGHT_MID
}

fn default_weight_early() -> f32 {
    DEFAULT_WEIGHT_EARLY
}

fn default_weight_late() -> f32 {
    DEFAULT_WEIGHT_LATE
}

/// Cosine similarity with near-zero filtering.
///
/// An index is skipped when either vector's component is within `epsilon`
/// of zero. Returns 0.0 when filtering leaves either magnitude at zero.
pub fn cosine(a: &[f32], b: &[f32], epsilon: f32) -> f32 {
    filtered_cosine(a, b, epsilon).unwrap_or(0.0)
}

/// Region-weighted similarity.
///
/// Each region pair is scored independently with `cosine` semantics, then
/// blended by weight. Region pairs that are degenerate after filtering
/// (either side has zero effective magnitude) are dropped from the blend and
/// the remaining weights renormalized, so `weighted(v, v) == 1.0` holds for
/// every vector with at least one usable region. All regions degenerate
/// scores 0.0.
pub fn weighted(a: &[f32], b: &[f32], profile: &RegionProfile, epsilon: f32) -> f32 {
    let pairs = [
        (a, b, profile.weight_full),
        (
            region(a, profile.mid_start, profile.mid_end),
            region(b, profile.mid_start, profile.mid_end),
            profile.weight_mid,
        ),
        (
            region(a, 0.0, profile.early_end),
            region(b, 0.0, profile.early_end),
            profile.weight_early,
        ),
        (
            region(a, profile.late_start, 1.0),
            region(b, profile.late_start, 1.0),
            profile.weight_late,
        ),
    ];

    let mut blended = 0.0f32;
    let mut weight_sum = 0.0f32;
    for (ra, rb, weight) in pairs {
        if let Some(score) = filtered_cosine(ra, rb, epsilon) {
            blended += weight * score;
            weight_sum += weight;
        }
    }

    if weight_sum <= 0.0 {
        0.0
    } else {
        (blended / weight_sum).clamp(-1.0, 1.0)
    }
}

/// Slice a fractional region out of a vector. Empty when the bounds collapse
/// for short vectors.
fn region(v: &[f32], start: f32, end: f32) -> &[f32] {
    let len = v.len();
    let lo = ((len as f32 * start).floor() as usize).min(len);
    let hi = ((len as f32 * end).floor() as usize).min(len);
    if lo >= hi {
        &[]
    } else {
        &v[lo..hi]
    }
}

fn filtered_cosine(a: &[f32], b: &[f32], epsilon: f32) -> Option<f32> {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (&x, &y) in a.iter().zip(b.iter()) {
        if x.abs() <= epsilon || y.abs() <= epsilon {
            continue;
        }
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a <= 0.0 || norm_b <= 0.0 {
        return None;
    }

    Some((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0))
}
