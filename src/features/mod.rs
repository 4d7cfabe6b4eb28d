//! Constellation features and point matching.
//!
//! This module turns detected peaks into constellation descriptors and
//! compares descriptors across two images:
//!
//! 1. **Extraction**: for each peak, a sorted radius search yields its
//!    neighbors; adjacent neighbor pairs, farthest first, become
//!    constellations (angle at the peak plus the two squared distances).
//! 2. **Matching**: descriptors from two images are compared either all
//!    against all, or only against descriptors whose centers lie within a
//!    search radius, and every similar pair becomes a [`PointMatch`].
//!
//! The parameter structs below fully determine both steps; their named
//! values double as the validity key of the on-disk cache.
//!
//! [`PointMatch`]: crate::PointMatch

pub mod constellation;
pub mod extract;
pub mod matching;

pub use constellation::{vector_angle, Constellation, CONSTELLATION_HEADER};
pub use extract::extract_constellations;
pub use matching::{point_matches_from_features, point_matches_from_nearby_features};

use crate::{Point, PointMatch};

/// Two parameter values are considered equal when they differ by at most this much.
pub const PARAM_EPSILON: f64 = 1e-5;

/// A fixed, named set of numeric parameters that fully determines how a
/// cached artifact was produced.
pub trait ParameterSet {
    /// Parameter names and values, in the order they are written to disk.
    fn named_values(&self) -> Vec<(&'static str, f64)>;
}

// ── Peak detection parameters ───────────────────────────────────────────────

/// Difference-of-Gaussian peak detection parameters, passed through to the
/// peak detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakParams {
    /// Sigma of the narrower Gaussian, in calibrated units.
    pub sigma_smaller: f64,
    /// Sigma of the wider Gaussian, in calibrated units.
    pub sigma_larger: f64,
    /// Minimum DoG response for a local maximum to count as a peak.
    pub min_peak_value: f64,
}

impl Default for PeakParams {
    fn default() -> Self {
        Self {
            sigma_smaller: 2.5,
            sigma_larger: 5.0,
            min_peak_value: 20.0,
        }
    }
}

// ── Descriptor parameters ───────────────────────────────────────────────────

/// Parameters that determine the constellation descriptors of one image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureParams {
    /// How peaks are detected.
    pub peaks: PeakParams,
    /// Neighbor search radius around each peak, in calibrated units.
    pub radius: f64,
    /// Constellations with a smaller angle (radians) are discarded.
    pub min_angle: f64,
    /// Maximum number of constellations kept per peak.
    pub max_per_peak: usize,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            peaks: PeakParams::default(),
            radius: 20.0,
            min_angle: 0.25,
            max_per_peak: 3,
        }
    }
}

impl FeatureParams {
    /// Extract constellations from `peaks` with these parameters.
    pub fn extract(&self, peaks: &[Point]) -> Vec<Constellation> {
        extract_constellations(peaks, self.radius, self.min_angle, self.max_per_peak)
    }
}

impl ParameterSet for FeatureParams {
    fn named_values(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("minPeakValue", self.peaks.min_peak_value),
            ("sigmaSmaller", self.peaks.sigma_smaller),
            ("sigmaLarger", self.peaks.sigma_larger),
            ("radius", self.radius),
            ("min_angle", self.min_angle),
            ("max_per_peak", self.max_per_peak as f64),
        ]
    }
}

// ── Point-match parameters ──────────────────────────────────────────────────

/// Parameters that determine the point matches between two images.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchParams {
    /// How each image's descriptors were built.
    pub features: FeatureParams,
    /// Maximum angle difference (radians) for two constellations to match.
    pub angle_epsilon: f64,
    /// Maximum summed squared-length difference for two constellations to match.
    pub len_epsilon_sq: f64,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            features: FeatureParams::default(),
            angle_epsilon: 0.02,
            len_epsilon_sq: 1.0,
        }
    }
}

impl MatchParams {
    /// Match two descriptor sets with these tolerances.
    ///
    /// `nearby` selects the spatially limited matcher with its own search
    /// radius; `None` compares all pairs.
    pub fn match_features(
        &self,
        features1: &[Constellation],
        features2: &[Constellation],
        nearby: Option<NearbySearch>,
    ) -> Vec<PointMatch> {
        match nearby {
            Some(n) => point_matches_from_nearby_features(
                n.search_radius,
                features1,
                features2,
                self.angle_epsilon,
                self.len_epsilon_sq,
            ),
            None => point_matches_from_features(
                features1,
                features2,
                self.angle_epsilon,
                self.len_epsilon_sq,
            ),
        }
    }
}

impl ParameterSet for MatchParams {
    fn named_values(&self) -> Vec<(&'static str, f64)> {
        let mut values = self.features.named_values();
        values.push(("angle_epsilon", self.angle_epsilon));
        values.push(("len_epsilon_sq", self.len_epsilon_sq));
        values
    }
}

/// Restrict matching to descriptors whose centers are close to each other.
///
/// `search_radius` is independent of [`FeatureParams::radius`]: one bounds
/// how far two images may be displaced, the other how large a constellation is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearbySearch {
    pub search_radius: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_params_are_a_subset_of_match_params() {
        let mp = MatchParams::default();
        let fv = mp.features.named_values();
        let mv = mp.named_values();
        assert_eq!(fv.len(), 6);
        assert_eq!(mv.len(), 8);
        assert_eq!(&mv[..6], &fv[..]);
        assert_eq!(mv[6].0, "angle_epsilon");
        assert_eq!(mv[7].0, "len_epsilon_sq");
    }

    #[test]
    fn max_per_peak_is_stored_as_number() {
        let fp = FeatureParams {
            max_per_peak: 7,
            ..Default::default()
        };
        let v = fp.named_values();
        let (_, val) = v.iter().find(|(n, _)| *n == "max_per_peak").copied().unwrap();
        assert_eq!(val, 7.0);
    }

    #[test]
    fn match_features_dispatches_on_nearby() {
        let c = Constellation {
            angle: 1.0,
            len1: 4.0,
            len2: 9.0,
            position: Point::new(0.0, 0.0, 0.0),
        };
        let far = Constellation {
            position: Point::new(100.0, 0.0, 0.0),
            ..c
        };
        let mp = MatchParams::default();
        assert_eq!(mp.match_features(&[c], &[far], None).len(), 1);
        let nearby = NearbySearch { search_radius: 10.0 };
        assert!(mp.match_features(&[c], &[far], Some(nearby)).is_empty());
    }
}
