//! Adaptive score threshold selection.
//!
//! Instead of a fixed cutoff, the threshold is derived from the distribution
//! of the current candidate scores: `mean + multiplier * std`, bounded below
//! by a floor so a uniformly poor catalog never produces low-quality matches.

/// No scores survived the coarse pre-filter.
///
/// Callers must report zero results rather than thresholding nothing.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("no candidate scores above the pre-filter bound")]
pub struct NoCandidates;

/// Derive the adaptive cutoff for a set of candidate scores.
///
/// Scores at or below `prefilter` are obvious non-matches (zero-vector
/// artifacts, failed extractions) and are excluded before the statistics
/// are computed. The returned threshold is always `>= floor`.
pub fn select_threshold(
    scores: &[f32],
    floor: f32,
    prefilter: f32,
    multiplier: f32,
) -> Result<f32, NoCandidates> {
    let kept: Vec<f32> = scores.iter().copied().filter(|s| *s > prefilter).collect();
    if kept.is_empty() {
        return Err(NoCandidates);
    }

    let mean = kept.iter().sum::<f32>() / kept.len() as f32;
    let variance = kept.iter().map(|s| (s - mean) * (s - mean)).sum::<f32>() / kept.len() as f32;

    Ok(floor.max(mean + multiplier * variance.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFILTER: f32 = 0.1;
    const MULTIPLIER: f32 = 0.3;

    #[test]
    fn test_empty_scores_signal_no_candidates() {
        assert_eq!(
            select_threshold(&[], 0.2, PREFILTER, MULTIPLIER),
            Err(NoCandidates)
        );
    }

    #[test]
    fn test_all_below_prefilter_signal_no_candidates() {
        let scores = vec![0.0, 0.05, 0.1, -0.3];
        assert_eq!(
            select_threshold(&scores, 0.2, PREFILTER, MULTIPLIER),
            Err(NoCandidates)
        );
    }

    #[test]
    fn test_threshold_never_below_floor() {
        // Distribution sits well under the floor.
        let scores = vec![0.12, 0.13, 0.14];
        let t = select_threshold(&scores, 0.2, PREFILTER, MULTIPLIER).unwrap();
        assert!((t - 0.2).abs() < 1e-6);

        // And with a spread distribution the invariant still holds.
        let scores = vec![0.3, 0.5, 0.9];
        let t = select_threshold(&scores, 0.2, PREFILTER, MULTIPLIER).unwrap();
        assert!(t >= 0.2);
    }

    #[test]
    fn test_known_distribution() {
        // kept = [0.4, 0.6], mean = 0.5, std = 0.1
        let scores = vec![0.4, 0.6, 0.05];
        let t = select_threshold(&scores, 0.2, PREFILTER, MULTIPLIER).unwrap();
        assert!((t - 0.53).abs() < 1e-6);
    }

    #[test]
    fn test_prefilter_excludes_low_scores_from_statistics() {
        let with_noise = vec![0.8, 0.9, 0.0, 0.0, 0.0];
        let clean = vec![0.8, 0.9];
        let a = select_threshold(&with_noise, 0.2, PREFILTER, MULTIPLIER).unwrap();
        let b = select_threshold(&clean, 0.2, PREFILTER, MULTIPLIER).unwrap();
        assert!((a - b).abs() < 1e-6);
    }

    #[test]
    fn test_uniform_scores_yield_mean() {
        let scores = vec![0.7, 0.7, 0.7];
        let t = select_threshold(&scores, 0.2, PREFILTER, MULTIPLIER).unwrap();
        assert!((t - 0.7).abs() < 1e-6);
    }
}
