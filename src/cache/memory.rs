//! In-process read-through cache in front of the CSV files.
//!
//! Keyed by the artifact path; an entry is only returned when the parameters
//! it was stored with still match the request.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::features::{Constellation, ParameterSet};

use super::compare_params;

struct Entry {
    params: Vec<(String, f64)>,
    features: Vec<Constellation>,
}

/// Constellation lists already read or computed in this process, shared
/// between the caller and worker threads.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<PathBuf, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Constellations stored under `path`, if they were built with `params`.
    pub fn get<P: ParameterSet>(&self, path: &Path, params: &P) -> Option<Vec<Constellation>> {
        let entries = self.entries.lock();
        let entry = entries.get(path)?;
        compare_params(&entry.params, &params.named_values()).ok()?;
        Some(entry.features.clone())
    }

    /// Remember `features` for `path`, replacing any previous entry.
    pub fn insert<P: ParameterSet>(&self, path: &Path, params: &P, features: &[Constellation]) {
        let params = params
            .named_values()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        self.entries.lock().insert(
            path.to_path_buf(),
            Entry {
                params,
                features: features.to_vec(),
            },
        );
    }

    /// Forget the entry for `path`.
    pub fn remove(&self, path: &Path) {
        self.entries.lock().remove(path);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
