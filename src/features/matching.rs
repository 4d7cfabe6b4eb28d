//! Point matches from two constellation sets.

use crate::spatial_index::SpatialIndex;
use crate::PointMatch;

use super::Constellation;

/// Compare every constellation of image 1 with every constellation of image 2.
///
/// Output order is image-1 major, image-2 minor. Cost is O(n·m).
pub fn point_matches_from_features(
    features1: &[Constellation],
    features2: &[Constellation],
    angle_epsilon: f64,
    len_epsilon_sq: f64,
) -> Vec<PointMatch> {
    features1
        .iter()
        .flat_map(|c1| {
            features2
                .iter()
                .filter(move |c2| c1.matches(c2, angle_epsilon, len_epsilon_sq))
                .map(move |c2| PointMatch::new(c1.position, c2.position))
        })
        .collect()
}

/// Compare each constellation of image 1 only with the constellations of
/// image 2 whose centers lie within `search_radius` of its own center.
///
/// Assumes the two images are already roughly co-located: a matching
/// descriptor farther away than `search_radius` is never found. Output order
/// follows image 1; matches for one image-1 constellation come in
/// index-search order.
pub fn point_matches_from_nearby_features(
    search_radius: f64,
    features1: &[Constellation],
    features2: &[Constellation],
    angle_epsilon: f64,
    len_epsilon_sq: f64,
) -> Vec<PointMatch> {
    if features1.is_empty() || features2.is_empty() {
        return Vec::new();
    }
    let index = SpatialIndex::new(features2.iter().map(|c| c.position).collect());
    let mut pointmatches = Vec::new();
    for c1 in features1 {
        pointmatches.extend(
            index
                .radius_search(&c1.position, search_radius, false)
                .into_iter()
                .map(|n| &features2[n.index])
                .filter(|c2| c1.matches(c2, angle_epsilon, len_epsilon_sq))
                .map(|c2| PointMatch::new(c1.position, c2.position)),
        );
    }
    pointmatches
}
