//! Parameter-tagged CSV cache for constellations and point matches.
//!
//! Each artifact is a small comma-separated file:
//!
//! | row | content                                            |
//! |-----|----------------------------------------------------|
//! | 1   | parameter names (quoted)                           |
//! | 2   | parameter values (numeric)                         |
//! | 3   | column header (quoted)                             |
//! | 4+  | one item per row, six numeric fields               |
//!
//! Constellations of an image live in `<image basename>.features.csv`; point
//! matches of an ordered image pair in
//! `<basename 1>.<basename 2>.pointmatches.csv`, both inside the cache
//! directory.
//!
//! A stored artifact is only used when its parameters equal the requested
//! ones within [`PARAM_EPSILON`]. Absence, a parameter mismatch and an
//! unreadable file all mean "recompute"; none of them is an error for the
//! caller. Writes are atomic: rows go to a temporary file in the cache
//! directory, which is synced and then renamed over the destination.

pub mod memory;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use csv::{QuoteStyle, ReaderBuilder, StringRecord, WriterBuilder};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::features::{
    Constellation, FeatureParams, MatchParams, ParameterSet, CONSTELLATION_HEADER, PARAM_EPSILON,
};
use crate::point::{PointMatch, POINT_MATCH_HEADER};

pub use memory::MemoryCache;

/// File-name suffix of per-image constellation files.
pub const FEATURES_SUFFIX: &str = ".features.csv";
/// File-name suffix of per-pair point-match files.
pub const POINT_MATCHES_SUFFIX: &str = ".pointmatches.csv";

// ── Lookup outcome ──────────────────────────────────────────────────────────

/// Outcome of looking up a cached artifact.
#[derive(Debug)]
pub enum CacheLookup<T> {
    /// A valid artifact was found.
    Hit(T),
    /// No artifact exists at the derived path.
    Missing,
    /// The artifact was produced with different parameters. `requested` is
    /// `None` when the stored name is not a parameter of the request.
    Mismatch {
        name: String,
        requested: Option<f64>,
        stored: f64,
    },
    /// The artifact exists but could not be read or parsed.
    Unreadable(anyhow::Error),
}

impl<T> CacheLookup<T> {
    /// `Some` only on a hit.
    pub fn into_option(self) -> Option<T> {
        match self {
            CacheLookup::Hit(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }
}

// ── File cache ──────────────────────────────────────────────────────────────

/// The on-disk cache rooted at one directory.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the constellation file for `image`.
    pub fn features_path(&self, image: &Path) -> PathBuf {
        self.dir.join(format!("{}{}", basename(image), FEATURES_SUFFIX))
    }

    /// Path of the point-match file for the ordered pair (`image1`, `image2`).
    pub fn point_matches_path(&self, image1: &Path, image2: &Path) -> PathBuf {
        self.dir.join(format!(
            "{}.{}{}",
            basename(image1),
            basename(image2),
            POINT_MATCHES_SUFFIX
        ))
    }

    // ── Constellations ──

    /// Store the constellations of `image`. Failures are logged, never returned.
    pub fn save_features(&self, image: &Path, features: &[Constellation], params: &FeatureParams) {
        let path = self.features_path(image);
        let rows = features.iter().map(Constellation::to_row);
        match write_table(&path, &params.named_values(), &CONSTELLATION_HEADER, rows) {
            Ok(()) => debug!("Saved {} features at {}", features.len(), path.display()),
            Err(e) => warn!("Failed to save features at {}: {:#}", path.display(), e),
        }
    }

    /// Look up the constellations of `image`, distinguishing every kind of miss.
    pub fn lookup_features(
        &self,
        image: &Path,
        params: &FeatureParams,
    ) -> CacheLookup<Vec<Constellation>> {
        let path = self.features_path(image);
        read_table(&path, &params.named_values(), false).and_then_rows(Constellation::from_row)
    }

    /// Load the constellations of `image` if a valid artifact exists.
    pub fn load_features(
        &self,
        image: &Path,
        params: &FeatureParams,
    ) -> Option<Vec<Constellation>> {
        let path = self.features_path(image);
        let lookup = self.lookup_features(image, params);
        log_lookup(&lookup, &path, "features");
        if let CacheLookup::Hit(ref fs) = lookup {
            info!("Loaded {} features for {}", fs.len(), image.display());
        }
        lookup.into_option()
    }

    /// Check the parameter header of the constellation file of `image`
    /// without reading its rows.
    pub fn validate_features(&self, image: &Path, params: &FeatureParams) -> bool {
        let path = self.features_path(image);
        let lookup = read_table(&path, &params.named_values(), true);
        log_lookup(&lookup, &path, "features");
        lookup.is_hit()
    }

    // ── Point matches ──

    /// Store the point matches of the ordered pair. Failures are logged, never returned.
    pub fn save_point_matches(
        &self,
        image1: &Path,
        image2: &Path,
        pointmatches: &[PointMatch],
        params: &MatchParams,
    ) {
        let path = self.point_matches_path(image1, image2);
        let rows = pointmatches.iter().map(PointMatch::to_row);
        match write_table(&path, &params.named_values(), &POINT_MATCH_HEADER, rows) {
            Ok(()) => debug!(
                "Saved {} pointmatches at {}",
                pointmatches.len(),
                path.display()
            ),
            Err(e) => warn!("Failed to save pointmatches at {}: {:#}", path.display(), e),
        }
    }

    /// Look up the point matches of the ordered pair, distinguishing every kind of miss.
    pub fn lookup_point_matches(
        &self,
        image1: &Path,
        image2: &Path,
        params: &MatchParams,
    ) -> CacheLookup<Vec<PointMatch>> {
        let path = self.point_matches_path(image1, image2);
        read_table(&path, &params.named_values(), false).and_then_rows(PointMatch::from_row)
    }

    /// Load the point matches of the ordered pair if a valid artifact exists.
    pub fn load_point_matches(
        &self,
        image1: &Path,
        image2: &Path,
        params: &MatchParams,
    ) -> Option<Vec<PointMatch>> {
        let path = self.point_matches_path(image1, image2);
        let lookup = self.lookup_point_matches(image1, image2, params);
        log_lookup(&lookup, &path, "pointmatches");
        if let CacheLookup::Hit(ref pms) = lookup {
            info!(
                "Loaded {} pointmatches for {}, {}",
                pms.len(),
                image1.display(),
                image2.display()
            );
        }
        lookup.into_option()
    }

    /// Delete every point-match file pairing `image` with any other image.
    ///
    /// A pair file is recognized by splitting its name at a basename that has
    /// a constellation file in the cache directory, so `t1` never claims the
    /// pair files of `t1.klb`. Returns the number of files removed. Failures
    /// are logged.
    pub fn remove_point_matches_for(&self, image: &Path) -> usize {
        let name = basename(image);
        let file_names: Vec<String> = match fs::read_dir(&self.dir) {
            Ok(entries) => entries
                .flatten()
                .filter_map(|e| e.file_name().into_string().ok())
                .collect(),
            Err(e) => {
                debug!("Cannot list cache directory {}: {}", self.dir.display(), e);
                return 0;
            }
        };
        let mut known: HashSet<&str> = file_names
            .iter()
            .filter_map(|f| f.strip_suffix(FEATURES_SUFFIX))
            .collect();
        known.insert(name.as_str());

        let mut removed = 0;
        for file_name in &file_names {
            let Some(stem) = file_name.strip_suffix(POINT_MATCHES_SUFFIX) else {
                continue;
            };
            if !pairs_with(stem, &name, &known) {
                continue;
            }
            let path = self.dir.join(file_name);
            match fs::remove_file(&path) {
                Ok(()) => {
                    removed += 1;
                    info!("Removed stale pointmatches {}", path.display());
                }
                Err(e) => warn!(
                    "Failed to remove stale pointmatches {}: {}",
                    path.display(),
                    e
                ),
            }
        }
        removed
    }
}

/// Whether the pair-file stem `<b1>.<b2>` has `name` on one side and a known
/// basename on the other.
fn pairs_with(stem: &str, name: &str, known: &HashSet<&str>) -> bool {
    let as_first = stem
        .strip_prefix(name)
        .and_then(|rest| rest.strip_prefix('.'))
        .is_some_and(|other| known.contains(other));
    let as_second = stem
        .strip_suffix(name)
        .and_then(|rest| rest.strip_suffix('.'))
        .is_some_and(|other| known.contains(other));
    as_first || as_second
}

// ── Parameter comparison ────────────────────────────────────────────────────

/// Compare stored parameters against requested ones.
///
/// Every stored name must be requested with a value within [`PARAM_EPSILON`].
/// Requested names absent from the stored header are not checked, so an
/// artifact written with fewer parameters stays valid. Returns the first
/// offender.
pub fn compare_params(
    stored: &[(String, f64)],
    requested: &[(&str, f64)],
) -> Result<(), (String, Option<f64>, f64)> {
    for (name, stored_value) in stored {
        let requested_value = requested
            .iter()
            .find(|(n, _)| n == name)
            .map(|&(_, v)| v);
        match requested_value {
            Some(v) if (v - stored_value).abs() <= PARAM_EPSILON => {}
            other => return Err((name.clone(), other, *stored_value)),
        }
    }
    Ok(())
}

// ── CSV table I/O ───────────────────────────────────────────────────────────

fn basename(image: &Path) -> String {
    image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| image.to_string_lossy().into_owned())
}

/// Write parameters, header and rows to `path`, atomically.
fn write_table<I>(
    path: &Path,
    params: &[(&str, f64)],
    header: &[&str],
    rows: I,
) -> anyhow::Result<()>
where
    I: IntoIterator<Item = [f64; 6]>,
{
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("no parent directory for {}", path.display()))?;
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temporary file in {}", dir.display()))?;
    {
        let mut w = WriterBuilder::new()
            .quote_style(QuoteStyle::NonNumeric)
            .flexible(true)
            .from_writer(tmp.as_file());
        w.write_record(params.iter().map(|(name, _)| *name))?;
        w.write_record(params.iter().map(|(_, value)| value.to_string()))?;
        w.write_record(header)?;
        for row in rows {
            w.write_record(row.iter().map(|v| v.to_string()))?;
        }
        w.flush()?;
    }
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("syncing {}", tmp.path().display()))?;
    tmp.persist(path)
        .with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

/// Read `path`, validate its parameter header against `requested`, and
/// unless `validate_only`, parse the numeric rows that follow the column header.
fn read_table(
    path: &Path,
    requested: &[(&str, f64)],
    validate_only: bool,
) -> CacheLookup<Vec<Vec<f64>>> {
    if !path.exists() {
        return CacheLookup::Missing;
    }
    let mut reader = match ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
    {
        Ok(r) => r,
        Err(e) => return CacheLookup::Unreadable(e.into()),
    };
    let mut records = reader.records();

    let stored = match read_params(&mut records) {
        Ok(stored) => stored,
        Err(e) => return CacheLookup::Unreadable(e),
    };
    if let Err((name, requested, stored)) = compare_params(&stored, requested) {
        return CacheLookup::Mismatch {
            name,
            requested,
            stored,
        };
    }
    if validate_only {
        return CacheLookup::Hit(Vec::new());
    }

    // Column header
    match records.next() {
        Some(Ok(_)) => {}
        Some(Err(e)) => return CacheLookup::Unreadable(e.into()),
        None => return CacheLookup::Unreadable(anyhow!("missing column header")),
    }

    let rows: anyhow::Result<Vec<Vec<f64>>> = records
        .map(|record| parse_numbers(&record?))
        .collect();
    match rows {
        Ok(rows) => CacheLookup::Hit(rows),
        Err(e) => CacheLookup::Unreadable(e),
    }
}

fn read_params<R: std::io::Read>(
    records: &mut csv::StringRecordsIter<'_, R>,
) -> anyhow::Result<Vec<(String, f64)>> {
    let names = records
        .next()
        .ok_or_else(|| anyhow!("missing parameter names"))??;
    let values = records
        .next()
        .ok_or_else(|| anyhow!("missing parameter values"))??;
    if names.len() != values.len() {
        bail!(
            "{} parameter names but {} values",
            names.len(),
            values.len()
        );
    }
    let values = parse_numbers(&values)?;
    Ok(names.iter().map(str::to_string).zip(values).collect())
}

fn parse_numbers(record: &StringRecord) -> anyhow::Result<Vec<f64>> {
    record
        .iter()
        .map(|field| {
            field
                .trim()
                .parse::<f64>()
                .with_context(|| format!("not a number: {:?}", field))
        })
        .collect()
}

impl CacheLookup<Vec<Vec<f64>>> {
    /// Convert raw rows into items; any malformed row makes the artifact unreadable.
    fn and_then_rows<T>(self, parse: impl Fn(&[f64]) -> Option<T>) -> CacheLookup<Vec<T>> {
        match self {
            CacheLookup::Hit(rows) => {
                let items: Option<Vec<T>> = rows.iter().map(|r| parse(r)).collect();
                match items {
                    Some(items) => CacheLookup::Hit(items),
                    None => CacheLookup::Unreadable(anyhow!("row with fewer than 6 fields")),
                }
            }
            CacheLookup::Missing => CacheLookup::Missing,
            CacheLookup::Mismatch {
                name,
                requested,
                stored,
            } => CacheLookup::Mismatch {
                name,
                requested,
                stored,
            },
            CacheLookup::Unreadable(e) => CacheLookup::Unreadable(e),
        }
    }
}

fn log_lookup<T>(lookup: &CacheLookup<T>, path: &Path, what: &str) {
    match lookup {
        CacheLookup::Hit(_) => {}
        CacheLookup::Missing => info!("No stored {} found at {}", what, path.display()),
        CacheLookup::Mismatch {
            name,
            requested,
            stored,
        } => info!(
            "Mismatching parameters in {}: '{}' - requested {:?} != stored {}",
            path.display(),
            name,
            requested,
            stored
        ),
        CacheLookup::Unreadable(e) => {
            warn!("Could not load {} from {}: {:#}", what, path.display(), e)
        }
    }
}
