//! Cache-aware orchestration of descriptor extraction and matching.
//!
//! For an ordered image pair the pipeline:
//!
//! 1. Returns stored point matches when their parameters still match.
//! 2. Otherwise looks up each image's stored constellations; images without
//!    a valid entry get a worker-pool task (load → calibrate → detect peaks →
//!    extract → store).
//! 3. Joins both descriptor sets, matches them, stores and returns the
//!    point matches.
//!
//! The cached path never touches the pool. If a worker fails or is
//! cancelled, the pair is abandoned rather than matched against stale data.

pub mod executor;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::{FileCache, MemoryCache};
use crate::features::{Constellation, FeatureParams, MatchParams, NearbySearch, PeakParams};
use crate::{Point, PointMatch};

pub use executor::{resolve_thread_count, Pending, TaskHandle, WorkerPool};

// ── Collaborators ───────────────────────────────────────────────────────────

/// Physical voxel spacing along x, y and z.
pub type Calibration = [f64; 3];

/// Loads an image from a file.
pub trait ImageLoader: Send + Sync {
    type Image;

    fn load(&self, path: &Path) -> anyhow::Result<Self::Image>;
}

/// Supplies the physical voxel spacing of an image file.
pub trait CalibrationProvider: Send + Sync {
    fn calibration(&self, path: &Path) -> anyhow::Result<Calibration>;
}

/// Difference-of-Gaussian blob detector, returning peak coordinates in
/// calibrated space.
pub trait PeakDetector<I>: Send + Sync {
    fn detect(
        &self,
        image: &I,
        calibration: &Calibration,
        params: &PeakParams,
    ) -> anyhow::Result<Vec<Point>>;
}

// ── Configuration ───────────────────────────────────────────────────────────

/// Parameters controlling a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Descriptor and matching parameters; also the cache validity key.
    pub match_params: MatchParams,
    /// `Some` selects radius-limited matching; `None` compares all pairs.
    pub nearby: Option<NearbySearch>,
    /// Directory holding the CSV cache files.
    pub cache_dir: PathBuf,
    /// Worker count: `0` = all CPUs, negative = all CPUs minus that many.
    pub num_threads: isize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            match_params: MatchParams::default(),
            nearby: None,
            cache_dir: PathBuf::from("."),
            num_threads: 0,
        }
    }
}

impl PipelineConfig {
    pub fn feature_params(&self) -> &FeatureParams {
        &self.match_params.features
    }
}

/// How [`Pipeline::ensure_descriptors`] satisfied a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensured {
    /// A valid cache entry already existed.
    Cached,
    /// Descriptors were recomputed and stored; holds their count.
    Computed(usize),
    /// Recomputation failed; the cache was left as it was.
    Failed,
}

// ── Pipeline ────────────────────────────────────────────────────────────────

/// State shared between the caller and worker tasks.
struct Shared<L, C, D> {
    loader: L,
    calibration: C,
    detector: D,
    params: FeatureParams,
    files: FileCache,
    memory: MemoryCache,
}

pub struct Pipeline<L, C, D> {
    shared: Arc<Shared<L, C, D>>,
    config: PipelineConfig,
    pool: WorkerPool,
}

impl<L, C, D> Pipeline<L, C, D>
where
    L: ImageLoader + 'static,
    C: CalibrationProvider + 'static,
    D: PeakDetector<L::Image> + 'static,
{
    /// Create a pipeline and its worker pool.
    pub fn new(
        loader: L,
        calibration: C,
        detector: D,
        config: PipelineConfig,
    ) -> anyhow::Result<Self> {
        let pool = WorkerPool::new(config.num_threads)?;
        let shared = Arc::new(Shared {
            loader,
            calibration,
            detector,
            params: config.match_params.features,
            files: FileCache::new(config.cache_dir.clone()),
            memory: MemoryCache::new(),
        });
        Ok(Self {
            shared,
            config,
            pool,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The on-disk cache this pipeline reads and writes.
    pub fn cache(&self) -> &FileCache {
        &self.shared.files
    }

    /// The worker pool; shut it down to abandon queued descriptor work.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Point matches for the ordered pair (`image1`, `image2`), from the cache
    /// when possible, otherwise computed and stored.
    ///
    /// Returns `None` when descriptors for either image could not be
    /// produced; nothing is matched or stored in that case.
    pub fn ensure_point_matches(&self, image1: &Path, image2: &Path) -> Option<Vec<PointMatch>> {
        let params = &self.config.match_params;
        let files = &self.shared.files;
        if let Some(pointmatches) = files.load_point_matches(image1, image2, params) {
            return Some(pointmatches);
        }

        let pending1 = self.descriptors_or_schedule(image1);
        let (features1, features2) = if image1 == image2 {
            let features = pending1.join()?;
            (features.clone(), features)
        } else {
            let pending2 = self.descriptors_or_schedule(image2);
            let features1 = pending1.join();
            let features2 = pending2.join();
            match (features1, features2) {
                (Some(f1), Some(f2)) => (f1, f2),
                _ => {
                    warn!(
                        "Abandoning pointmatches for {}, {}: missing features",
                        image1.display(),
                        image2.display()
                    );
                    return None;
                }
            }
        };

        for (image, features) in [(image1, &features1), (image2, &features2)] {
            info!(
                "Found {} constellation features in image {}",
                features.len(),
                image.display()
            );
        }

        let pointmatches = params.match_features(&features1, &features2, self.config.nearby);
        info!(
            "Found {} point matches between {} and {}",
            pointmatches.len(),
            image1.display(),
            image2.display()
        );
        files.save_point_matches(image1, image2, &pointmatches, params);
        Some(pointmatches)
    }

    /// Make sure `image` has a valid descriptor cache entry, recomputing and
    /// overwriting it otherwise.
    ///
    /// Point-match files involving `image` are deleted after a recompute,
    /// since they were derived from the replaced descriptors.
    pub fn ensure_descriptors(&self, image: &Path) -> Ensured {
        if self.shared.files.validate_features(image, &self.shared.params) {
            return Ensured::Cached;
        }
        self.shared.recompute(image)
    }

    /// [`Pipeline::ensure_descriptors`] for many images, recomputing on the pool.
    ///
    /// Results are in input order. A path listed twice is only computed once.
    pub fn ensure_descriptors_all(&self, images: &[PathBuf]) -> Vec<Ensured> {
        let mut scheduled: Vec<(PathBuf, TaskHandle<Ensured>)> = Vec::new();
        let mut outcomes: Vec<Option<Ensured>> = Vec::with_capacity(images.len());
        for image in images {
            if scheduled.iter().any(|(p, _)| p == image) {
                outcomes.push(None);
                continue;
            }
            if self.shared.files.validate_features(image, &self.shared.params) {
                outcomes.push(Some(Ensured::Cached));
                continue;
            }
            let shared = Arc::clone(&self.shared);
            let path = image.clone();
            let handle = self.pool.submit(move || Some(shared.recompute(&path)));
            scheduled.push((image.clone(), handle));
            outcomes.push(None);
        }

        let joined: Vec<(PathBuf, Ensured)> = scheduled
            .into_iter()
            .map(|(path, handle)| (path, handle.join().unwrap_or(Ensured::Failed)))
            .collect();
        images
            .iter()
            .zip(outcomes)
            .map(|(image, outcome)| {
                outcome.unwrap_or_else(|| {
                    joined
                        .iter()
                        .find(|(p, _)| p == image)
                        .map(|&(_, e)| e)
                        .unwrap_or(Ensured::Failed)
                })
            })
            .collect()
    }

    /// Compute descriptors for `image` on the calling thread and store them.
    pub fn make_descriptors(&self, image: &Path) -> Option<Vec<Constellation>> {
        self.shared.make_descriptors(image)
    }

    /// Cached descriptors of `image`, or a pool task computing them.
    fn descriptors_or_schedule(&self, image: &Path) -> Pending<Vec<Constellation>> {
        match self.shared.cached_descriptors(image) {
            Some(features) => Pending::Ready(features),
            None => {
                let shared = Arc::clone(&self.shared);
                let path = image.to_path_buf();
                Pending::Running(self.pool.submit(move || shared.make_descriptors(&path)))
            }
        }
    }
}

impl<L, C, D> Shared<L, C, D>
where
    L: ImageLoader,
    C: CalibrationProvider,
    D: PeakDetector<L::Image>,
{
    /// Descriptors from the in-process cache, then from disk.
    fn cached_descriptors(&self, image: &Path) -> Option<Vec<Constellation>> {
        let path = self.files.features_path(image);
        if let Some(features) = self.memory.get(&path, &self.params) {
            return Some(features);
        }
        let features = self.files.load_features(image, &self.params)?;
        self.memory.insert(&path, &self.params, &features);
        Some(features)
    }

    /// Load, detect, extract and store. `None` if a collaborator failed.
    fn make_descriptors(&self, image: &Path) -> Option<Vec<Constellation>> {
        let peaks = match self.detect_peaks(image) {
            Ok(peaks) => peaks,
            Err(e) => {
                warn!("Could not detect peaks for {}: {:#}", image.display(), e);
                return None;
            }
        };
        let features = if peaks.is_empty() {
            Vec::new()
        } else {
            self.params.extract(&peaks)
        };
        if features.is_empty() {
            info!("No peaks found for {}", image.display());
        }
        // Stored even when empty: zero features is a valid result.
        self.files.save_features(image, &features, &self.params);
        let path = self.files.features_path(image);
        self.memory.insert(&path, &self.params, &features);
        Some(features)
    }

    fn detect_peaks(&self, image: &Path) -> anyhow::Result<Vec<Point>> {
        let img = self.loader.load(image)?;
        let calibration = self.calibration.calibration(image)?;
        self.detector.detect(&img, &calibration, &self.params.peaks)
    }

    fn recompute(&self, image: &Path) -> Ensured {
        match self.make_descriptors(image) {
            Some(features) => {
                self.files.remove_point_matches_for(image);
                Ensured::Computed(features.len())
            }
            None => Ensured::Failed,
        }
    }
}
