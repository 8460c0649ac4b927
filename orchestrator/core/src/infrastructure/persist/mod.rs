// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Persist Infrastructure Module
//!
//! Provides concrete implementations of the [`PersistProvider`] trait.

pub mod local;

pub use local::LocalPersistProvider;
pub use memory::InMemoryPersistProvider;

use std::path::PathBuf;
use std::sync::Arc;

use crate::domain::config::PersistenceConfig;
use crate::domain::persistence::{PersistProvider, PersistenceError};

/// Persist backend configuration
#[derive(Debug, Clone)]
pub enum PersistBackend {
    /// Local filesystem (production, persistent volume)
    Local { base_path: PathBuf },

    /// In-memory map for unit testing
    Memory,
}

impl From<&PersistenceConfig> for PersistBackend {
    fn from(config: &PersistenceConfig) -> Self {
        PersistBackend::Local {
            base_path: config.base_path.clone(),
        }
    }
}

/// Factory function to create a persist provider from configuration
pub fn create_persist_provider(
    backend: PersistBackend,
) -> Result<Arc<dyn PersistProvider>, PersistenceError> {
    match backend {
        PersistBackend::Local { base_path } => Ok(Arc::new(LocalPersistProvider::new(base_path)?)),
        PersistBackend::Memory => Ok(Arc::new(InMemoryPersistProvider::new())),
    }
}

mod memory {
    use std::collections::BTreeMap;
    use std::io::{Cursor, Read};
    use std::path::{Path, PathBuf};

    use parking_lot::RwLock;

    use crate::domain::persistence::{PersistProvider, PersistenceError, WalkEntry};

    /// Keeps files in a sorted map keyed by path.
    #[derive(Debug, Default)]
    pub struct InMemoryPersistProvider {
        files: RwLock<BTreeMap<PathBuf, Vec<u8>>>,
    }

    impl InMemoryPersistProvider {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn file_count(&self) -> usize {
            self.files.read().len()
        }
    }

    impl PersistProvider for InMemoryPersistProvider {
        fn write_atomic(&self, path: &Path, content: &[u8]) -> Result<(), PersistenceError> {
            if path.file_name().is_none() {
                return Err(PersistenceError::InvalidPath(path.display().to_string()));
            }
            self.files.write().insert(path.to_path_buf(), content.to_vec());
            Ok(())
        }

        fn read_to_string(&self, path: &Path) -> Result<String, PersistenceError> {
            let files = self.files.read();
            let content = files
                .get(path)
                .ok_or_else(|| PersistenceError::NotFound(path.display().to_string()))?;
            String::from_utf8(content.clone())
                .map_err(|e| PersistenceError::Io(format!("{}: {}", path.display(), e)))
        }

        fn walk(&self, root: &Path, max_depth: usize) -> Result<Vec<WalkEntry>, PersistenceError> {
            let files = self.files.read();
            let entries = files
                .keys()
                .filter_map(|path| {
                    let depth = path.strip_prefix(root).ok()?.components().count();
                    (depth >= 1 && depth <= max_depth).then(|| WalkEntry {
                        path: path.clone(),
                        depth,
                    })
                })
                .collect();
            Ok(entries)
        }

        fn exists(&self, path: &Path) -> bool {
            self.files.read().contains_key(path)
        }

        fn delete(&self, path: &Path) -> Result<(), PersistenceError> {
            self.files
                .write()
                .remove(path)
                .map(|_| ())
                .ok_or_else(|| PersistenceError::NotFound(path.display().to_string()))
        }

        fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>, PersistenceError> {
            let content = self
                .files
                .read()
                .get(path)
                .cloned()
                .ok_or_else(|| PersistenceError::NotFound(path.display().to_string()))?;
            Ok(Box::new(Cursor::new(content)))
        }
    }
}
