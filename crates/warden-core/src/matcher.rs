use crate::gallery::Gallery;
use crate::types::Encoding;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum MatchError {
    #[error("gallery is empty, nothing to match against")]
    EmptyGallery,
    #[error("probe has dimension {actual}, gallery encodings have {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Nearest gallery entry for one probe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchResult {
    pub nearest_index: usize,
    /// Euclidean distance to the nearest entry. Lower = more alike.
    pub distance: f32,
    /// `1 - distance`. Not clamped: negative once distance exceeds 1.
    pub confidence: f32,
}

impl MatchResult {
    pub fn new(nearest_index: usize, distance: f32) -> Self {
        Self {
            nearest_index,
            distance,
            confidence: 1.0 - distance,
        }
    }
}

/// Strategy for locating the closest gallery entry to a probe encoding.
pub trait Matcher {
    fn nearest(&self, probe: &Encoding, gallery: &Gallery) -> Result<MatchResult, MatchError>;
}

impl<M: Matcher + ?Sized> Matcher for &M {
    fn nearest(&self, probe: &Encoding, gallery: &Gallery) -> Result<MatchResult, MatchError> {
        (**self).nearest(probe, gallery)
    }
}

/// Euclidean nearest-neighbour matcher.
///
/// Linear scan over every entry; on equal distances the lowest index wins,
/// so the result depends only on gallery order.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn nearest(&self, probe: &Encoding, gallery: &Gallery) -> Result<MatchResult, MatchError> {
        let expected = gallery.dimension().ok_or(MatchError::EmptyGallery)?;
        if probe.len() != expected {
            return Err(MatchError::DimensionMismatch {
                expected,
                actual: probe.len(),
            });
        }

        let mut best_idx = 0usize;
        let mut best_dist = f32::INFINITY;

        for (i, enc) in gallery.encodings().iter().enumerate() {
            let dist = probe.euclidean_distance(enc);
            // Strict: a later entry must be closer to displace an earlier one.
            if dist < best_dist {
                best_dist = dist;
                best_idx = i;
            }
        }

        Ok(MatchResult::new(best_idx, best_dist))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gallery(rows: &[(&[f32], &str)]) -> Gallery {
        Gallery::new(
            rows.iter().map(|(v, _)| Encoding::new(v.to_vec())).collect(),
            rows.iter().map(|(_, n)| n.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_nearest_scans_whole_gallery() {
        // Best match is the last entry.
        let g = gallery(&[
            (&[0.0, 1.0, 0.0], "decoy1"),
            (&[0.0, 0.0, 1.0], "decoy2"),
            (&[1.0, 0.0, 0.0], "match"),
        ]);
        let probe = Encoding::new(vec![1.0, 0.0, 0.0]);

        let result = EuclideanMatcher.nearest(&probe, &g).unwrap();
        assert_eq!(result.nearest_index, 2);
        assert_eq!(g.name(result.nearest_index), Some("match"));
        assert_eq!(result.distance, 0.0);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_tie_resolves_to_first_occurrence() {
        let g = gallery(&[
            (&[0.0, 1.0], "first"),
            (&[0.0, -1.0], "second"),
            (&[0.0, 1.0], "third"),
        ]);
        let probe = Encoding::new(vec![0.0, 0.0]);

        let result = EuclideanMatcher.nearest(&probe, &g).unwrap();
        assert_eq!(result.nearest_index, 0);
        assert!((result.distance - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_confidence_is_one_minus_distance() {
        let g = gallery(&[(&[0.0, 0.0], "alice")]);
        let probe = Encoding::new(vec![0.1, 0.0]);

        let result = EuclideanMatcher.nearest(&probe, &g).unwrap();
        assert_eq!(result.confidence, 1.0 - result.distance);
        assert!((result.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_confidence_not_clamped() {
        let g = gallery(&[(&[0.0, 0.0], "alice")]);
        let probe = Encoding::new(vec![3.0, 4.0]);

        let result = EuclideanMatcher.nearest(&probe, &g).unwrap();
        assert!((result.distance - 5.0).abs() < 1e-6);
        assert!((result.confidence + 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_gallery() {
        let g = Gallery::new(vec![], vec![]).unwrap();
        let probe = Encoding::new(vec![1.0, 0.0]);
        assert_eq!(
            EuclideanMatcher.nearest(&probe, &g).unwrap_err(),
            MatchError::EmptyGallery
        );
    }

    #[test]
    fn test_probe_dimension_mismatch() {
        let g = gallery(&[(&[0.0, 0.0, 0.0], "alice")]);
        let probe = Encoding::new(vec![1.0, 0.0]);
        assert_eq!(
            EuclideanMatcher.nearest(&probe, &g).unwrap_err(),
            MatchError::DimensionMismatch { expected: 3, actual: 2 }
        );
    }
}
