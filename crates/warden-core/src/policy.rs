//! Access decision policy.
//!
//! Maps one frame's face observations to an access outcome. Pure: no
//! decision depends on any earlier frame.

use crate::gallery::Gallery;
use crate::matcher::{MatchError, MatchResult, Matcher};
use crate::types::FaceObservation;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_GRANT_THRESHOLD: f32 = 0.45;
pub const DEFAULT_WARN_THRESHOLD: f32 = 0.60;

pub const UNCERTAIN_LABEL: &str = "Uncertain";
pub const UNKNOWN_LABEL: &str = "Unknown";

#[derive(Error, Debug, PartialEq)]
pub enum ThresholdError {
    #[error("thresholds must be finite (grant={grant}, warn={warn})")]
    NonFinite { grant: f32, warn: f32 },
    #[error("grant threshold {grant} exceeds warn threshold {warn}")]
    Inverted { grant: f32, warn: f32 },
}

/// Access outcome for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessStatus {
    NoFace,
    MultiFaceBlocked,
    Granted,
    WarningLowConfidence,
    Denied,
}

impl AccessStatus {
    /// Stable string form, as written to the audit log.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoFace => "NO_FACE",
            Self::MultiFaceBlocked => "MULTI_FACE_BLOCKED",
            Self::Granted => "GRANTED",
            Self::WarningLowConfidence => "WARNING",
            Self::Denied => "DENIED",
        }
    }

    /// True for the outcomes produced by matching a single face.
    pub fn is_match_outcome(&self) -> bool {
        matches!(
            self,
            Self::Granted | Self::WarningLowConfidence | Self::Denied
        )
    }

    /// Annotation colour (RGB) for match outcomes.
    pub fn color(&self) -> Option<[u8; 3]> {
        match self {
            Self::Granted => Some([0, 255, 0]),
            Self::WarningLowConfidence => Some([255, 255, 0]),
            Self::Denied => Some([255, 0, 0]),
            Self::NoFace | Self::MultiFaceBlocked => None,
        }
    }
}

impl fmt::Display for AccessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NO_FACE" => Ok(Self::NoFace),
            "MULTI_FACE_BLOCKED" => Ok(Self::MultiFaceBlocked),
            "GRANTED" => Ok(Self::Granted),
            "WARNING" | "WARNING_LOW_CONFIDENCE" => Ok(Self::WarningLowConfidence),
            "DENIED" => Ok(Self::Denied),
            other => Err(format!("unknown access status: {other}")),
        }
    }
}

/// Decision for one frame, with the display name and confidence when a
/// single face was matched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessDecision {
    pub status: AccessStatus,
    pub name: Option<String>,
    pub confidence: Option<f32>,
    /// Number of faces observed in the frame.
    pub faces: usize,
}

impl AccessDecision {
    pub fn no_face() -> Self {
        Self {
            status: AccessStatus::NoFace,
            name: None,
            confidence: None,
            faces: 0,
        }
    }

    pub fn multi_face(faces: usize) -> Self {
        Self {
            status: AccessStatus::MultiFaceBlocked,
            name: None,
            confidence: None,
            faces,
        }
    }

    /// Overlay label, e.g. `alice (0.87)`.
    pub fn label(&self) -> Option<String> {
        let name = self.name.as_deref()?;
        let confidence = self.confidence?;
        Some(format!("{name} ({confidence:.2})"))
    }
}

/// Distance bands. `grant == warn` collapses the warning band, giving a
/// plain grant/deny policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    grant: f32,
    warn: f32,
}

impl Thresholds {
    pub fn new(grant: f32, warn: f32) -> Result<Self, ThresholdError> {
        if !grant.is_finite() || !warn.is_finite() {
            return Err(ThresholdError::NonFinite { grant, warn });
        }
        if grant > warn {
            return Err(ThresholdError::Inverted { grant, warn });
        }
        Ok(Self { grant, warn })
    }

    pub fn grant(&self) -> f32 {
        self.grant
    }

    pub fn warn(&self) -> f32 {
        self.warn
    }

    /// Band for a match distance. Lower bounds are inclusive:
    /// exactly `grant` is a warning, exactly `warn` is a denial.
    pub fn band(&self, distance: f32) -> AccessStatus {
        if distance < self.grant {
            AccessStatus::Granted
        } else if distance < self.warn {
            AccessStatus::WarningLowConfidence
        } else {
            AccessStatus::Denied
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            grant: DEFAULT_GRANT_THRESHOLD,
            warn: DEFAULT_WARN_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DecisionPolicy {
    thresholds: Thresholds,
}

impl DecisionPolicy {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Decide a frame. The matcher runs only when exactly one face is present;
    /// a second face blocks regardless of who it is.
    pub fn decide<M: Matcher + ?Sized>(
        &self,
        observations: &[FaceObservation],
        gallery: &Gallery,
        matcher: &M,
    ) -> Result<AccessDecision, MatchError> {
        let face = match observations {
            [] => return Ok(AccessDecision::no_face()),
            [face] => face,
            many => return Ok(AccessDecision::multi_face(many.len())),
        };

        let result = matcher.nearest(&face.encoding, gallery)?;
        Ok(self.classify(&result, gallery))
    }

    /// Turn a single-face match into a decision.
    pub fn classify(&self, result: &MatchResult, gallery: &Gallery) -> AccessDecision {
        let status = self.thresholds.band(result.distance);
        let name = match status {
            AccessStatus::Granted => gallery
                .name(result.nearest_index)
                .unwrap_or(UNKNOWN_LABEL)
                .to_string(),
            AccessStatus::WarningLowConfidence => UNCERTAIN_LABEL.to_string(),
            _ => UNKNOWN_LABEL.to_string(),
        };

        AccessDecision {
            status,
            name: Some(name),
            confidence: Some(result.confidence),
            faces: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::EuclideanMatcher;
    use crate::types::{Encoding, FaceRegion};
    use std::cell::Cell;

    /// Returns a fixed distance and counts invocations.
    struct FixedMatcher {
        distance: f32,
        calls: Cell<usize>,
    }

    impl FixedMatcher {
        fn new(distance: f32) -> Self {
            Self {
                distance,
                calls: Cell::new(0),
            }
        }
    }

    impl Matcher for FixedMatcher {
        fn nearest(&self, _: &Encoding, _: &Gallery) -> Result<MatchResult, MatchError> {
            self.calls.set(self.calls.get() + 1);
            Ok(MatchResult::new(0, self.distance))
        }
    }

    fn alice_gallery() -> Gallery {
        Gallery::new(vec![Encoding::new(vec![0.0, 0.0])], vec!["Alice".into()]).unwrap()
    }

    fn face(x: f32) -> FaceObservation {
        FaceObservation {
            region: FaceRegion::new(10.0, 60.0, 60.0, 10.0),
            encoding: Encoding::new(vec![x, 0.0]),
        }
    }

    #[test]
    fn test_bands() {
        let t = Thresholds::default();
        assert_eq!(t.band(0.0), AccessStatus::Granted);
        assert_eq!(t.band(0.4499), AccessStatus::Granted);
        assert_eq!(t.band(0.45), AccessStatus::WarningLowConfidence);
        assert_eq!(t.band(0.5999), AccessStatus::WarningLowConfidence);
        assert_eq!(t.band(0.60), AccessStatus::Denied);
        assert_eq!(t.band(1.7), AccessStatus::Denied);
    }

    #[test]
    fn test_boundary_distances_through_policy() {
        let policy = DecisionPolicy::default();
        let gallery = alice_gallery();

        let at_grant = policy
            .decide(&[face(0.0)], &gallery, &FixedMatcher::new(0.45))
            .unwrap();
        assert_eq!(at_grant.status, AccessStatus::WarningLowConfidence);
        assert_eq!(at_grant.name.as_deref(), Some(UNCERTAIN_LABEL));

        let at_warn = policy
            .decide(&[face(0.0)], &gallery, &FixedMatcher::new(0.60))
            .unwrap();
        assert_eq!(at_warn.status, AccessStatus::Denied);
        assert_eq!(at_warn.name.as_deref(), Some(UNKNOWN_LABEL));
    }

    #[test]
    fn test_no_face_skips_matcher() {
        let matcher = FixedMatcher::new(0.1);
        let decision = DecisionPolicy::default()
            .decide(&[], &alice_gallery(), &matcher)
            .unwrap();

        assert_eq!(decision, AccessDecision::no_face());
        assert_eq!(matcher.calls.get(), 0);
    }

    #[test]
    fn test_multiple_faces_skip_matcher() {
        let matcher = FixedMatcher::new(0.1);
        let decision = DecisionPolicy::default()
            .decide(&[face(0.0), face(0.0)], &alice_gallery(), &matcher)
            .unwrap();

        assert_eq!(decision.status, AccessStatus::MultiFaceBlocked);
        assert_eq!(decision.faces, 2);
        assert!(decision.name.is_none());
        assert!(decision.confidence.is_none());
        assert_eq!(matcher.calls.get(), 0);
    }

    #[test]
    fn test_single_face_runs_matcher_once() {
        let matcher = FixedMatcher::new(0.7);
        let decision = DecisionPolicy::default()
            .decide(&[face(0.0)], &alice_gallery(), &matcher)
            .unwrap();

        assert_eq!(decision.status, AccessStatus::Denied);
        assert_eq!(matcher.calls.get(), 1);
    }

    #[test]
    fn test_alice_granted_at_distance_point_one() {
        let decision = DecisionPolicy::default()
            .decide(&[face(0.1)], &alice_gallery(), &EuclideanMatcher)
            .unwrap();

        assert_eq!(decision.status, AccessStatus::Granted);
        assert_eq!(decision.name.as_deref(), Some("Alice"));
        assert!((decision.confidence.unwrap() - 0.90).abs() < 1e-6);
        assert_eq!(decision.label().as_deref(), Some("Alice (0.90)"));
    }

    #[test]
    fn test_empty_gallery_propagates() {
        let empty = Gallery::new(vec![], vec![]).unwrap();
        let err = DecisionPolicy::default()
            .decide(&[face(0.1)], &empty, &EuclideanMatcher)
            .unwrap_err();
        assert_eq!(err, MatchError::EmptyGallery);
    }

    #[test]
    fn test_decide_is_idempotent() {
        let policy = DecisionPolicy::default();
        let gallery = alice_gallery();
        let frame = [face(0.5)];

        let first = policy.decide(&frame, &gallery, &EuclideanMatcher).unwrap();
        let second = policy.decide(&frame, &gallery, &EuclideanMatcher).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.status, AccessStatus::WarningLowConfidence);
    }

    #[test]
    fn test_two_band_policy_has_no_warning() {
        let policy = DecisionPolicy::new(Thresholds::new(0.45, 0.45).unwrap());
        let gallery = alice_gallery();
        let cases = [
            (0.44, AccessStatus::Granted),
            (0.45, AccessStatus::Denied),
            (0.5, AccessStatus::Denied),
        ];
        for (distance, expected) in cases {
            let decision = policy
                .decide(&[face(0.0)], &gallery, &FixedMatcher::new(distance))
                .unwrap();
            assert_eq!(decision.status, expected, "distance {distance}");
        }
    }

    #[test]
    fn test_thresholds_validation() {
        assert_eq!(
            Thresholds::new(0.7, 0.5).unwrap_err(),
            ThresholdError::Inverted { grant: 0.7, warn: 0.5 }
        );
        assert!(matches!(
            Thresholds::new(f32::NAN, 0.5),
            Err(ThresholdError::NonFinite { .. })
        ));
    }

    #[test]
    fn test_status_strings_round_trip_through_audit_form() {
        for status in [
            AccessStatus::NoFace,
            AccessStatus::MultiFaceBlocked,
            AccessStatus::Granted,
            AccessStatus::WarningLowConfidence,
            AccessStatus::Denied,
        ] {
            assert_eq!(status.as_str().parse::<AccessStatus>(), Ok(status));
        }
        assert!("MAYBE".parse::<AccessStatus>().is_err());
    }
}
