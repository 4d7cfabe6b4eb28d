//! The constellation descriptor.
//!
//! A constellation is a peak ("center") plus two of its spatial neighbors.
//! Its signature is the angle at the center between the two neighbor vectors
//! and the two squared neighbor distances. The signature is unchanged by
//! rotating the image, which is what makes it comparable across views.

use nalgebra::Vector3;

use crate::Point;

/// Column names of a constellation row.
pub const CONSTELLATION_HEADER: [&str; 6] = ["angle", "len1", "len2", "x", "y", "z"];

/// A rotation-invariant local descriptor anchored at a peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constellation {
    /// Angle (radians, in `[0, π]`) between center→near and center→far.
    pub angle: f64,
    /// Squared distance from the center to the nearer neighbor.
    pub len1: f64,
    /// Squared distance from the center to the farther neighbor (`len1 <= len2`).
    pub len2: f64,
    /// The center peak.
    pub position: Point,
}

impl Constellation {
    /// Build a constellation from a center peak and two neighbors.
    ///
    /// `near_sq_dist <= far_sq_dist` is the caller's responsibility; the
    /// distances are passed in because the radius search already computed them.
    pub fn from_neighbors(
        center: &Point,
        near: &Point,
        near_sq_dist: f64,
        far: &Point,
        far_sq_dist: f64,
    ) -> Self {
        let v1 = near - center;
        let v2 = far - center;
        Self {
            angle: vector_angle(&v1, &v2),
            len1: near_sq_dist,
            len2: far_sq_dist,
            position: *center,
        }
    }

    /// Similarity test within measurement error brackets: the angles must
    /// differ by less than `angle_epsilon` and the summed absolute difference
    /// of the squared lengths must be less than `len_epsilon_sq`.
    pub fn matches(&self, other: &Constellation, angle_epsilon: f64, len_epsilon_sq: f64) -> bool {
        (self.angle - other.angle).abs() < angle_epsilon
            && (self.len1 - other.len1).abs() + (self.len2 - other.len2).abs() < len_epsilon_sq
    }

    /// Flatten into `[angle, len1, len2, x, y, z]`.
    pub fn to_row(&self) -> [f64; 6] {
        [
            self.angle,
            self.len1,
            self.len2,
            self.position.x,
            self.position.y,
            self.position.z,
        ]
    }

    /// Inverse of [`Constellation::to_row`]. Returns `None` for rows shorter than 6 fields.
    pub fn from_row(row: &[f64]) -> Option<Self> {
        if row.len() < 6 {
            return None;
        }
        Some(Self {
            angle: row[0],
            len1: row[1],
            len2: row[2],
            position: Point::new(row[3], row[4], row[5]),
        })
    }
}

/// Angle between two vectors via the inverse cosine of the normalized dot product.
///
/// The cosine is clamped to `[-1, 1]` so floating-point overshoot never
/// produces NaN. A zero-length vector has no direction; its angle is 0.
pub fn vector_angle(v1: &Vector3<f64>, v2: &Vector3<f64>) -> f64 {
    let norms = v1.norm() * v2.norm();
    if norms <= 0.0 || !norms.is_finite() {
        return 0.0;
    }
    (v1.dot(v2) / norms).clamp(-1.0, 1.0).acos()
}
