// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Local Filesystem Persist Provider
//!
//! Filesystem-based implementation of [`PersistProvider`] backed by a
//! persistent volume mounted into the orchestrator.
//!
//! Writes go to a temporary file in the destination directory, are
//! fsynced, and are then renamed over the destination, so a concurrent
//! reader never observes a half-written record.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tempfile::Builder;
use tracing::debug;
use walkdir::WalkDir;

use crate::domain::persistence::{PersistProvider, PersistenceError, WalkEntry};

/// Prefix of files staged by `write_atomic` and of the writability probe.
/// `walk` never lists them.
const STAGING_PREFIX: &str = ".bro-staging-";
const STAGING_SUFFIX: &str = ".tmp";

/// Local filesystem persist provider
///
/// Relative paths are resolved against `base_path`; absolute paths are used
/// as given.
pub struct LocalPersistProvider {
    base_path: PathBuf,
}

impl LocalPersistProvider {
    /// Create new local persist provider
    ///
    /// Creates `base_path` if needed and verifies it is writable. Failure is
    /// a configuration error.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).map_err(|e| PersistenceError::BaseNotWritable {
            path: base_path.display().to_string(),
            reason: format!("Failed to create base directory: {}", e),
        })?;

        let probe = base_path.join(format!("{}probe", STAGING_PREFIX));
        fs::write(&probe, b"probe")
            .and_then(|_| fs::remove_file(&probe))
            .map_err(|e| PersistenceError::BaseNotWritable {
                path: base_path.display().to_string(),
                reason: format!("Base directory is not writable: {}", e),
            })?;

        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }

    fn not_found_or_io(path: &Path, err: std::io::Error) -> PersistenceError {
        if err.kind() == std::io::ErrorKind::NotFound {
            PersistenceError::NotFound(path.display().to_string())
        } else {
            PersistenceError::Io(format!("{}: {}", path.display(), err))
        }
    }
}

impl PersistProvider for LocalPersistProvider {
    fn write_atomic(&self, path: &Path, content: &[u8]) -> Result<(), PersistenceError> {
        let fs_path = self.resolve_path(path);
        let folder = fs_path
            .parent()
            .ok_or_else(|| PersistenceError::InvalidPath(path.display().to_string()))?;

        fs::create_dir_all(folder).map_err(|e| {
            PersistenceError::Io(format!("Failed to create directory {}: {}", folder.display(), e))
        })?;

        let mut staged = Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(STAGING_SUFFIX)
            .tempfile_in(folder)?;
        staged.write_all(content)?;
        staged.as_file().sync_all()?;
        staged.persist(&fs_path).map_err(|e| {
            PersistenceError::Io(format!("Failed to move record into {}: {}", fs_path.display(), e.error))
        })?;

        debug!(path = %fs_path.display(), bytes = content.len(), "Persisted file");
        Ok(())
    }

    fn read_to_string(&self, path: &Path) -> Result<String, PersistenceError> {
        let fs_path = self.resolve_path(path);
        debug!(path = %fs_path.display(), "Reading persisted file");
        fs::read_to_string(&fs_path).map_err(|e| Self::not_found_or_io(path, e))
    }

    fn walk(&self, root: &Path, max_depth: usize) -> Result<Vec<WalkEntry>, PersistenceError> {
        let fs_root = self.resolve_path(root);
        if !fs_root.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(&fs_root).max_depth(max_depth).follow_links(false) {
            let entry = entry.map_err(|e| {
                PersistenceError::Io(format!("Failed to walk {}: {}", fs_root.display(), e))
            })?;
            if !entry.file_type().is_file() || is_staged(entry.path()) {
                continue;
            }
            let relative = entry.path().strip_prefix(&fs_root).unwrap_or(entry.path());
            entries.push(WalkEntry {
                path: root.join(relative),
                depth: entry.depth(),
            });
        }

        entries.sort();
        Ok(entries)
    }

    fn exists(&self, path: &Path) -> bool {
        self.resolve_path(path).exists()
    }

    fn delete(&self, path: &Path) -> Result<(), PersistenceError> {
        let fs_path = self.resolve_path(path);
        fs::remove_file(&fs_path).map_err(|e| Self::not_found_or_io(path, e))
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>, PersistenceError> {
        let fs_path = self.resolve_path(path);
        let file = fs::File::open(&fs_path).map_err(|e| Self::not_found_or_io(path, e))?;
        Ok(Box::new(file))
    }
}

fn is_staged(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with(STAGING_PREFIX))
}
