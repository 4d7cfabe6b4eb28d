//! Peak positions and point correspondences.
//!
//! Peaks are the output of the upstream blob detector and the input to
//! constellation extraction. A [`PointMatch`] pairs a position in one image
//! with the hypothesized same physical location in another image.

/// A peak position in the image's (calibrated) coordinate space.
pub type Point = nalgebra::Point3<f64>;

/// Column names of a point-match row: image-1 position, then image-2 position.
pub const POINT_MATCH_HEADER: [&str; 6] = ["x1", "y1", "z1", "x2", "y2", "z2"];

/// A hypothesized correspondence between a point in image 1 and a point in image 2.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointMatch {
    /// Position in the first image of the pair.
    pub p1: Point,
    /// Position in the second image of the pair.
    pub p2: Point,
}

impl PointMatch {
    pub fn new(p1: Point, p2: Point) -> Self {
        Self { p1, p2 }
    }

    /// Flatten into `[x1, y1, z1, x2, y2, z2]`.
    pub fn to_row(&self) -> [f64; 6] {
        [
            self.p1.x, self.p1.y, self.p1.z, self.p2.x, self.p2.y, self.p2.z,
        ]
    }

    /// Inverse of [`PointMatch::to_row`]. Returns `None` for rows shorter than 6 fields.
    pub fn from_row(row: &[f64]) -> Option<Self> {
        if row.len() < 6 {
            return None;
        }
        Some(Self {
            p1: Point::new(row[0], row[1], row[2]),
            p2: Point::new(row[3], row[4], row[5]),
        })
    }

    /// Displacement from `p1` to `p2`.
    pub fn offset(&self) -> nalgebra::Vector3<f64> {
        self.p2 - self.p1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_layout_is_p1_then_p2() {
        let pm = PointMatch::new(Point::new(1.0, 2.0, 3.0), Point::new(4.0, 5.0, 6.0));
        assert_eq!(pm.to_row(), [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(PointMatch::from_row(&pm.to_row()), Some(pm));
    }

    #[test]
    fn short_row_is_rejected() {
        assert!(PointMatch::from_row(&[1.0, 2.0, 3.0, 4.0, 5.0]).is_none());
    }

    #[test]
    fn offset_points_from_first_to_second() {
        let pm = PointMatch::new(Point::new(1.0, 1.0, 1.0), Point::new(2.0, 0.0, 4.0));
        assert_eq!(pm.offset(), nalgebra::Vector3::new(1.0, -1.0, 3.0));
    }
}
