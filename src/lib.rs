//! # constellation_match
//!
//! Landmark correspondences between pairs of 3D microscopy volumes, for
//! later registration.
//!
//! Given peak coordinates (blob centers) detected in two images, this crate
//! builds rotation-invariant **constellation** descriptors from each peak and
//! two of its neighbors, matches descriptors across the images to produce
//! candidate point correspondences, and keeps both in a parameter-tagged CSV
//! cache so that repeated runs with identical parameters skip the work.
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use constellation_match::{
//!     Calibration, CalibrationProvider, ImageLoader, PeakDetector, PeakParams, Pipeline,
//!     PipelineConfig, Point,
//! };
//!
//! struct Loader;
//! impl ImageLoader for Loader {
//!     type Image = Vec<u16>;
//!     fn load(&self, path: &Path) -> anyhow::Result<Vec<u16>> {
//!         unimplemented!("read {}", path.display())
//!     }
//! }
//!
//! struct Isotropic;
//! impl CalibrationProvider for Isotropic {
//!     fn calibration(&self, _path: &Path) -> anyhow::Result<Calibration> {
//!         Ok([1.0, 1.0, 1.0])
//!     }
//! }
//!
//! struct DoG;
//! impl PeakDetector<Vec<u16>> for DoG {
//!     fn detect(
//!         &self,
//!         _image: &Vec<u16>,
//!         _calibration: &Calibration,
//!         _params: &PeakParams,
//!     ) -> anyhow::Result<Vec<Point>> {
//!         Ok(Vec::new())
//!     }
//! }
//!
//! let config = PipelineConfig {
//!     cache_dir: "/tmp/csv".into(),
//!     ..Default::default()
//! };
//! let pipeline = Pipeline::new(Loader, Isotropic, DoG, config).unwrap();
//! if let Some(pointmatches) =
//!     pipeline.ensure_point_matches(Path::new("t0.klb"), Path::new("t1.klb"))
//! {
//!     println!("{} point matches", pointmatches.len());
//! }
//! ```
//!
//! ## Algorithm overview
//!
//! 1. **Neighbor search**: a KD-tree radius search around each peak returns
//!    its neighbors sorted by distance
//! 2. **Constellations**: adjacent neighbor pairs, farthest first, give the
//!    angle at the peak and both squared distances; small angles are dropped
//!    and at most `max_per_peak` are kept per peak
//! 3. **Matching**: constellations whose angles and lengths agree within
//!    tolerance become point matches, either over all pairs or only among
//!    descriptors whose centers are within a search radius
//! 4. **Caching**: constellations per image and point matches per ordered
//!    pair are written to CSV files headed by the parameters that produced them

pub mod cache;
pub mod features;
mod point;
pub mod pipeline;
pub mod spatial_index;

pub use cache::{CacheLookup, FileCache, MemoryCache};
pub use features::{
    extract_constellations, point_matches_from_features, point_matches_from_nearby_features,
    Constellation, FeatureParams, MatchParams, NearbySearch, ParameterSet, PeakParams,
};
pub use pipeline::{
    Calibration, CalibrationProvider, Ensured, ImageLoader, PeakDetector, Pipeline,
    PipelineConfig, WorkerPool,
};
pub use point::*;
pub use spatial_index::{Neighbor, SpatialIndex};
