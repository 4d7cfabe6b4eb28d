//! Constellation extraction over all peaks of one image.
//!
//! For each peak, neighbors within the radius are sorted nearest-first and
//! paired as adjacent `(near, far)` pairs starting from the two farthest
//! neighbors and moving inward. Wide constellations are more distinctive
//! than tight ones, so they are taken first; once `max_per_peak` have been
//! kept, the remaining (closer) pairs of that peak are never considered.

use tracing::debug;

use crate::spatial_index::{Neighbor, SpatialIndex};
use crate::Point;

use super::Constellation;

/// Extract up to `max_per_peak` constellations per peak.
///
/// Peaks with fewer than two neighbors within `radius` contribute nothing.
/// Constellations whose angle is below `min_angle` are discarded, since
/// nearly collinear neighbors give unstable angles.
pub fn extract_constellations(
    peaks: &[Point],
    radius: f64,
    min_angle: f64,
    max_per_peak: usize,
) -> Vec<Constellation> {
    if peaks.is_empty() {
        return Vec::new();
    }
    let index = SpatialIndex::from_slice(peaks);
    extract_with_index(&index, radius, min_angle, max_per_peak)
}

/// Same as [`extract_constellations`], reusing an index already built over the peaks.
pub fn extract_with_index(
    index: &SpatialIndex,
    radius: f64,
    min_angle: f64,
    max_per_peak: usize,
) -> Vec<Constellation> {
    let mut constellations = Vec::new();
    for (peak_idx, peak) in index.points().iter().enumerate() {
        // The peak itself comes back at distance 0.
        let neighbors: Vec<Neighbor> = index
            .radius_search(peak, radius, true)
            .into_iter()
            .filter(|n| n.index != peak_idx)
            .collect();
        peak_constellations(peak, &neighbors, min_angle, max_per_peak, &mut constellations);
    }
    debug!(
        "Extracted {} constellations from {} peaks",
        constellations.len(),
        index.len()
    );
    constellations
}

/// Append the constellations of one peak, given its neighbors sorted nearest-first.
fn peak_constellations(
    peak: &Point,
    neighbors: &[Neighbor],
    min_angle: f64,
    max_per_peak: usize,
    out: &mut Vec<Constellation>,
) {
    let mut kept = 0usize;
    for j in (1..neighbors.len()).rev() {
        if kept >= max_per_peak {
            break;
        }
        let near = &neighbors[j - 1];
        let far = &neighbors[j];
        let cons = Constellation::from_neighbors(
            peak,
            &near.position,
            near.sq_distance,
            &far.position,
            far.sq_distance,
        );
        if cons.angle >= min_angle {
            kept += 1;
            out.push(cons);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn p(x: f64, y: f64, z: f64) -> Point {
        Point::new(x, y, z)
    }

    #[test]
    fn single_right_angle_constellation() {
        let peaks = vec![p(0.0, 0.0, 0.0), p(1.0, 0.0, 0.0), p(0.0, 1.0, 0.0), p(0.0, 0.0, 5.0)];
        // The two unit neighbors also see each other, forming 45 degree
        // constellations at (1,0,0) and (0,1,0). The z=5 outlier sees nobody.
        let cons = extract_constellations(&peaks, 2.0, 0.0, 5);
        assert_eq!(cons.len(), 3);
        let at_origin: Vec<&Constellation> = cons
            .iter()
            .filter(|c| c.position == p(0.0, 0.0, 0.0))
            .collect();
        assert_eq!(at_origin.len(), 1);
        let c = at_origin[0];
        assert!((c.len1 - 1.0).abs() < 1e-12);
        assert!((c.len2 - 1.0).abs() < 1e-12);
        assert!((c.angle - FRAC_PI_2).abs() < 1e-12);

        // Above 45 degrees only the right angle survives.
        let cons = extract_constellations(&peaks, 2.0, 1.0, 5);
        assert_eq!(cons.len(), 1);
        assert_eq!(cons[0].position, p(0.0, 0.0, 0.0));
    }

    #[test]
    fn no_peaks_no_constellations() {
        assert!(extract_constellations(&[], 10.0, 0.0, 5).is_empty());
    }

    #[test]
    fn one_neighbor_is_not_enough() {
        // Each peak sees exactly one other peak.
        let peaks = vec![p(0.0, 0.0, 0.0), p(1.0, 0.0, 0.0), p(50.0, 0.0, 0.0), p(51.0, 0.0, 0.0)];
        assert!(extract_constellations(&peaks, 2.0, 0.0, 5).is_empty());
    }

    #[test]
    fn two_neighbors_give_exactly_one_pair() {
        // The center sees two neighbors; each neighbor sees the center and the other
        // neighbor too (distance sqrt(2) < 2), so every peak forms one triangle.
        let peaks = vec![p(0.0, 0.0, 0.0), p(1.0, 0.0, 0.0), p(0.0, 1.0, 0.0)];
        let cons = extract_constellations(&peaks, 2.0, 0.0, 5);
        assert_eq!(cons.len(), 3);

        // Pull the neighbors apart so only the center sees both.
        let peaks = vec![p(0.0, 0.0, 0.0), p(1.5, 0.0, 0.0), p(-1.5, 0.0, 0.0)];
        let cons = extract_constellations(&peaks, 2.0, 0.0, 5);
        assert_eq!(cons.len(), 1);
        assert_eq!(cons[0].position, p(0.0, 0.0, 0.0));
    }

    #[test]
    fn pairs_are_taken_farthest_first_and_capped() {
        // Neighbors of the origin at increasing distances on different axes.
        let peaks = vec![
            p(0.0, 0.0, 0.0),
            p(1.0, 0.0, 0.0),
            p(0.0, 2.0, 0.0),
            p(0.0, 0.0, 3.0),
            p(-4.0, 0.0, 0.0),
        ];
        let neighbors: Vec<Neighbor> = SpatialIndex::from_slice(&peaks)
            .radius_search(&peaks[0], 10.0, true)
            .into_iter()
            .filter(|n| n.index != 0)
            .collect();
        assert_eq!(neighbors.len(), 4);

        let mut out = Vec::new();
        peak_constellations(&peaks[0], &neighbors, 0.0, 2, &mut out);
        assert_eq!(out.len(), 2);
        // (3, 4) pair first: len1 = 9, len2 = 16
        assert_eq!((out[0].len1, out[0].len2), (9.0, 16.0));
        // then (2, 3): len1 = 4, len2 = 9
        assert_eq!((out[1].len1, out[1].len2), (4.0, 9.0));

        let mut all = Vec::new();
        peak_constellations(&peaks[0], &neighbors, 0.0, 10, &mut all);
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn small_angles_are_skipped_without_counting() {
        // Collinear neighbors on the +x axis plus one off-axis.
        let peaks = vec![
            p(0.0, 0.0, 0.0),
            p(0.0, 1.0, 0.0),
            p(2.0, 0.0, 0.0),
            p(3.0, 0.0, 0.0),
        ];
        let cons: Vec<Constellation> = extract_constellations(&peaks, 3.5, 0.1, 1)
            .into_iter()
            .filter(|c| c.position == p(0.0, 0.0, 0.0))
            .collect();
        // (2,3) pair is collinear (angle 0) and skipped; (1,2) is kept.
        assert_eq!(cons.len(), 1);
        assert!((cons[0].angle - FRAC_PI_2).abs() < 1e-12);
        assert_eq!((cons[0].len1, cons[0].len2), (1.0, 4.0));
    }

    #[test]
    fn zero_max_per_peak_yields_nothing() {
        let peaks = vec![p(0.0, 0.0, 0.0), p(1.0, 0.0, 0.0), p(0.0, 1.0, 0.0)];
        assert!(extract_constellations(&peaks, 2.0, 0.0, 0).is_empty());
    }

    #[test]
    fn integer_grid_in_one_plane() {
        // 10x10 voxel grid at z = 0; distances tie everywhere.
        let peaks: Vec<Point> = (0..100)
            .map(|i| p((i % 10) as f64, (i / 10) as f64, 0.0))
            .collect();
        let cons = extract_constellations(&peaks, 1.5, 0.0, 5);
        // Interior peaks see 8 neighbors (7 pairs, capped at 5), edge peaks 5
        // (4 pairs), corners 3 (2 pairs).
        assert_eq!(cons.len(), 64 * 5 + 32 * 4 + 4 * 2);
        assert!(cons.iter().all(|c| c.position.z == 0.0 && c.len1 <= c.len2));
    }

    #[test]
    fn peaks_sharing_one_axis_value() {
        let peaks: Vec<Point> = (0..100)
            .map(|i| {
                let t = i as f64;
                p(5.0, (t * 0.414_214).fract() * 10.0, (t * 0.732_051).fract() * 10.0)
            })
            .collect();
        let cons = extract_constellations(&peaks, 3.0, 0.1, 3);
        assert!(!cons.is_empty());
        assert!(cons.len() <= 3 * peaks.len());
        assert!(cons.iter().all(|c| c.position.x == 5.0));
    }

    #[test]
    fn duplicate_peaks_give_no_degenerate_constellations() {
        let mut peaks = vec![p(0.0, 0.0, 0.0); 40];
        peaks.push(p(1.0, 0.0, 0.0));
        peaks.push(p(0.0, 1.0, 0.0));
        let cons = extract_constellations(&peaks, 2.0, 0.25, 3);
        // Pairs involving a copy of the center or two copies of the same
        // point have angle 0 and are dropped. Each origin copy keeps the right
        // angle; each unit peak keeps one 45 degree constellation.
        assert_eq!(cons.len(), 42);
        assert!(cons.iter().all(|c| c.angle >= 0.25));
        let right_angles = cons
            .iter()
            .filter(|c| (c.angle - FRAC_PI_2).abs() < 1e-12)
            .count();
        assert_eq!(right_angles, 40);
    }

    #[test]
    fn lengths_are_ordered_and_angles_bounded() {
        let peaks: Vec<Point> = (0..60)
            .map(|i| {
                let t = i as f64;
                p(
                    (t * 0.618_034).fract() * 20.0,
                    (t * 0.414_214).fract() * 20.0,
                    (t * 0.732_051).fract() * 10.0,
                )
            })
            .collect();
        let max_per_peak = 2;
        let cons = extract_constellations(&peaks, 6.0, 0.05, max_per_peak);
        assert!(!cons.is_empty());
        for c in &cons {
            assert!(c.len1 <= c.len2);
            assert!(c.angle >= 0.05 && c.angle <= std::f64::consts::PI);
        }
        for peak in &peaks {
            let n = cons.iter().filter(|c| c.position == *peak).count();
            assert!(n <= max_per_peak);
        }
    }
}
