//! KD-tree backed radius search over a fixed set of 3D points.
//!
//! `SpatialIndex` is built once (O(n log n)) and then queried repeatedly. It
//! supports both "index all peaks, query each peak" (constellation
//! extraction) and "index set B, query from set A" (nearby matching).
//!
//! The tree is balanced in one pass over the whole point set, so any number
//! of points may share a coordinate: peaks from one z-plane, peaks on a
//! voxel grid, or constellations repeated at the same center.
//!
//! Query flow:
//! 1. Convert the Euclidean radius to a squared radius.
//! 2. Ask the tree for every stored point within that squared distance.
//! 3. Map tree items back to the stored points, optionally in ascending
//!    distance order.

use kiddo::{ImmutableKdTree, SquaredEuclidean};

use crate::Point;

/// One result of a radius search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Index of the neighbor in the slice the index was built from.
    pub index: usize,
    /// Position of the neighbor.
    pub position: Point,
    /// Squared Euclidean distance from the query point.
    pub sq_distance: f64,
}

/// Immutable radius-search index over a point set.
///
/// Results refer back to the points by their position in the build order.
pub struct SpatialIndex {
    points: Vec<Point>,
    /// `None` for an empty point set.
    tree: Option<ImmutableKdTree<f64, 3>>,
}

impl SpatialIndex {
    /// Build an index over owned points.
    pub fn new(points: Vec<Point>) -> Self {
        let tree = if points.is_empty() {
            None
        } else {
            let coords: Vec<[f64; 3]> = points.iter().map(|p| [p.x, p.y, p.z]).collect();
            Some(ImmutableKdTree::new_from_slice(&coords))
        };
        Self { points, tree }
    }

    /// Build an index by cloning points from a slice.
    pub fn from_slice(points: &[Point]) -> Self {
        Self::new(points.to_vec())
    }

    /// Number of indexed points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Return `true` when nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// All indexed points, in build order.
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Find every indexed point within `radius` of `query`.
    ///
    /// With `sorted` the result is in ascending distance order; otherwise the
    /// order is whatever the tree traversal produced. A query far away from
    /// all data simply yields an empty vector.
    pub fn radius_search(&self, query: &Point, radius: f64, sorted: bool) -> Vec<Neighbor> {
        let Some(tree) = &self.tree else {
            return Vec::new();
        };
        if !(radius >= 0.0) {
            return Vec::new();
        }
        let q = [query.x, query.y, query.z];
        let sq_radius = radius * radius;
        let found = if sorted {
            tree.within::<SquaredEuclidean>(&q, sq_radius)
        } else {
            tree.within_unsorted::<SquaredEuclidean>(&q, sq_radius)
        };
        found
            .into_iter()
            .map(|nn| {
                let index = nn.item as usize;
                Neighbor {
                    index,
                    position: self.points[index],
                    sq_distance: nn.distance,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic, well-spread cloud with no repeated coordinates.
    fn cloud() -> Vec<Point> {
        (0..80)
            .map(|i| {
                let t = i as f64;
                Point::new(
                    (t * 0.618_034).fract() * 6.0,
                    (t * 0.414_214).fract() * 6.0,
                    (t * 0.732_051).fract() * 4.0,
                )
            })
            .collect()
    }

    #[test]
    fn sorted_search_is_ascending_and_starts_with_self() {
        let pts = cloud();
        let index = SpatialIndex::from_slice(&pts);
        let q = pts[37];
        let hits = index.radius_search(&q, 2.5, true);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].index, 37);
        assert_eq!(hits[0].sq_distance, 0.0);
        for w in hits.windows(2) {
            assert!(w[0].sq_distance <= w[1].sq_distance);
        }
    }

    #[test]
    fn radius_search_matches_brute_force() {
        let pts = cloud();
        let index = SpatialIndex::from_slice(&pts);
        let q = Point::new(2.2, 1.7, 1.1);
        let radius = 1.9;

        let mut expected: Vec<usize> = pts
            .iter()
            .enumerate()
            .filter(|(_, p)| (*p - q).norm_squared() < radius * radius - 1e-9)
            .map(|(i, _)| i)
            .collect();
        expected.sort_unstable();

        let mut got: Vec<usize> = index
            .radius_search(&q, radius, false)
            .iter()
            .map(|n| n.index)
            .collect();
        got.sort_unstable();
        assert_eq!(got, expected);
    }

    #[test]
    fn squared_distances_are_reported() {
        let index = SpatialIndex::new(vec![Point::new(0.0, 0.0, 0.0), Point::new(0.0, 3.0, 4.0)]);
        let hits = index.radius_search(&Point::origin(), 10.0, true);
        assert_eq!(hits.len(), 2);
        assert!((hits[1].sq_distance - 25.0).abs() < 1e-12);
        assert_eq!(hits[1].position, Point::new(0.0, 3.0, 4.0));
    }

    #[test]
    fn far_query_returns_empty() {
        let index = SpatialIndex::from_slice(&cloud());
        let hits = index.radius_search(&Point::new(1000.0, -1000.0, 50.0), 3.0, true);
        assert!(hits.is_empty());
    }

    #[test]
    fn coplanar_grid_is_searchable() {
        // 15x15 integer grid in one z-plane: every axis value repeats 15+ times.
        let pts: Vec<Point> = (0..225)
            .map(|i| Point::new((i % 15) as f64, (i / 15) as f64, 0.0))
            .collect();
        let index = SpatialIndex::from_slice(&pts);
        let hits = index.radius_search(&Point::new(7.0, 7.0, 0.0), 1.5, true);
        // The center, its 4 edge neighbors at 1 and 4 diagonal neighbors at sqrt(2).
        assert_eq!(hits.len(), 9);
        assert_eq!(hits[0].index, 7 * 15 + 7);
        assert!(hits[1..5].iter().all(|n| n.sq_distance == 1.0));
        assert!(hits[5..].iter().all(|n| n.sq_distance == 2.0));
    }

    #[test]
    fn many_identical_points_are_all_found() {
        let mut pts = vec![Point::new(1.0, 2.0, 3.0); 100];
        pts.push(Point::new(9.0, 9.0, 9.0));
        let index = SpatialIndex::from_slice(&pts);
        let hits = index.radius_search(&Point::new(1.0, 2.0, 3.0), 0.5, false);
        assert_eq!(hits.len(), 100);
        assert!(hits.iter().all(|n| n.index < 100 && n.sq_distance == 0.0));
    }

    #[test]
    fn empty_index_returns_empty() {
        let index = SpatialIndex::new(Vec::new());
        assert!(index.is_empty());
        assert!(index.radius_search(&Point::origin(), 5.0, false).is_empty());
    }
}
