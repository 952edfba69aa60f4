// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File-level incremental compilation cache.
//!
//! Maps absolute source paths to content hashes so the build orchestrator
//! can skip recompilation of unchanged translation units. Persisted as JSON
//! and safe for concurrent use from compilation workers.

use crate::atomic::{load_json, save_json_atomic, AtomicIoError};
use crate::hash::hash_file;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Cache statistics returned by [`FileCache::get_statistics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub total_entries: usize,
}

/// Tracks source file changes for incremental compilation.
pub struct FileCache {
    cache_file: PathBuf,
    entries: Mutex<HashMap<PathBuf, String>>,
}

impl FileCache {
    /// Load the cache from `cache_file`, starting empty if it is absent or
    /// corrupt.
    pub fn load(cache_file: PathBuf) -> Self {
        let entries = match load_json::<HashMap<PathBuf, String>>(&cache_file) {
            Ok(Some(map)) => {
                debug!(entries = map.len(), path = %cache_file.display(), "loaded file cache");
                map
            }
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!(error = %e, path = %cache_file.display(), "failed to load file cache");
                HashMap::new()
            }
        };

        Self {
            cache_file,
            entries: Mutex::new(entries),
        }
    }

    /// True if `path` is missing from the cache or its content hash differs.
    ///
    /// Unreadable files are reported as changed so they reach the compiler,
    /// which produces the actionable diagnostic.
    pub fn has_changed(&self, path: &Path) -> bool {
        if !path.exists() {
            warn!(path = %path.display(), "file does not exist, treating as changed");
            return true;
        }

        let cached = self.entries.lock().get(path).cloned();
        let Some(cached) = cached else {
            return true;
        };

        match hash_file(path) {
            Ok(current) => current != cached,
            Err(_) => true,
        }
    }

    /// Record `path`'s current content hash and persist.
    pub fn update(&self, path: &Path) -> Result<(), AtomicIoError> {
        if !path.exists() {
            warn!(path = %path.display(), "cannot cache non-existent file");
            return Ok(());
        }

        let hash = hash_file(path)?;
        let snapshot = {
            let mut entries = self.entries.lock();
            entries.insert(path.to_path_buf(), hash);
            entries.clone()
        };
        save_json_atomic(&self.cache_file, &snapshot)
    }

    /// Record hashes for many files, persisting once at the end.
    pub fn update_batch(&self, paths: &[PathBuf]) -> Result<usize, AtomicIoError> {
        let mut updated = 0;
        for path in paths {
            if !path.exists() {
                continue;
            }
            match hash_file(path) {
                Ok(hash) => {
                    self.entries.lock().insert(path.clone(), hash);
                    updated += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to hash file for cache");
                }
            }
        }

        let snapshot = self.entries.lock().clone();
        save_json_atomic(&self.cache_file, &snapshot)?;
        debug!(updated, total = paths.len(), "updated file cache batch");
        Ok(updated)
    }

    /// Decide whether `source` must be recompiled into `object`.
    ///
    /// Recompilation is needed if the object is missing, the source content
    /// changed since the last cache update, or the object predates the
    /// source on disk.
    pub fn needs_recompilation(&self, source: &Path, object: &Path) -> bool {
        if !object.exists() {
            return true;
        }

        if self.has_changed(source) {
            return true;
        }

        let (Ok(source_meta), Ok(object_meta)) = (source.metadata(), object.metadata()) else {
            return true;
        };
        match (source_meta.modified(), object_meta.modified()) {
            (Ok(src_mtime), Ok(obj_mtime)) => obj_mtime < src_mtime,
            _ => true,
        }
    }

    /// Drop `path` from the cache, forcing recompilation on the next build.
    pub fn invalidate(&self, path: &Path) -> Result<(), AtomicIoError> {
        let removed = self.entries.lock().remove(path).is_some();
        if removed {
            let snapshot = self.entries.lock().clone();
            save_json_atomic(&self.cache_file, &snapshot)?;
        }
        Ok(())
    }

    /// Clear the entire cache.
    pub fn clear(&self) -> Result<(), AtomicIoError> {
        self.entries.lock().clear();
        save_json_atomic(&self.cache_file, &HashMap::<PathBuf, String>::new())
    }

    pub fn get_statistics(&self) -> CacheStatistics {
        CacheStatistics {
            total_entries: self.entries.lock().len(),
        }
    }
}

#[cfg(test)]
#[path = "file_cache_tests.rs"]
mod tests;
