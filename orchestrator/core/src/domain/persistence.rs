// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Persistence Contracts and Versioned Formats
//!
//! Defines the abstract persistence contract ([`PersistProvider`]) that
//! isolates record handling from the storage backend, and the description
//! of one historical on-disk shape of a persisted type
//! ([`VersionedFormat`]).
//!
//! A persisted type usually has several formats: the newest one is used
//! for every write, older ones stay registered so that files left behind
//! by a previous release can still be read during a rolling upgrade.

use std::collections::BTreeSet;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

/// Depth a directory search starts from when a format does not change it.
pub const DEFAULT_BASE_DEPTH: usize = 1;

/// A file discovered by [`PersistProvider::walk`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct WalkEntry {
    /// Path of the file, rooted at the walked directory.
    pub path: PathBuf,
    /// Number of components between the walked directory and the file.
    pub depth: usize,
}

/// Abstract persistence contract.
///
/// Implementations must make [`write_atomic`](Self::write_atomic) all or
/// nothing: a concurrent reader sees either the old content or the new
/// content, never a partial file.
pub trait PersistProvider: Send + Sync {
    /// Write `content` to `path`, creating parent directories as needed.
    fn write_atomic(&self, path: &Path, content: &[u8]) -> Result<(), PersistenceError>;

    /// Read a whole file as UTF-8 text.
    fn read_to_string(&self, path: &Path) -> Result<String, PersistenceError>;

    /// List the files under `root` at most `max_depth` levels deep, sorted
    /// by path. A missing root yields an empty list.
    fn walk(&self, root: &Path, max_depth: usize) -> Result<Vec<WalkEntry>, PersistenceError>;

    fn exists(&self, path: &Path) -> bool;

    fn delete(&self, path: &Path) -> Result<(), PersistenceError>;

    /// Open a file for sequential reading.
    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>, PersistenceError>;
}

/// Persistence errors
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Base path {path} is not usable: {reason}")]
    BaseNotWritable { path: String, reason: String },

    #[error("Duplicate format ordinal {0}")]
    DuplicateOrdinal(u32),

    #[error("No formats registered for {0}")]
    NoFormats(String),

    #[error("No format registered with ordinal {0}")]
    UnknownOrdinal(u32),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PersistenceError {
    /// Configuration errors are fatal and must not be retried.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            PersistenceError::BaseNotWritable { .. }
                | PersistenceError::DuplicateOrdinal(_)
                | PersistenceError::NoFormats(_)
        )
    }
}

impl From<std::io::Error> for PersistenceError {
    fn from(err: std::io::Error) -> Self {
        PersistenceError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        PersistenceError::Serialization(err.to_string())
    }
}

type PathMap = Arc<dyn Fn(&Path) -> PathBuf + Send + Sync>;
type Parser<T> = Arc<dyn Fn(&str) -> Option<T> + Send + Sync>;
type DepthMap = Arc<dyn Fn(usize) -> usize + Send + Sync>;
type FileFilter = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// One historical on-disk shape of a persisted type `T`.
///
/// Immutable once built. Formats of the same type are totally ordered by
/// [`ordinal`](Self::ordinal), higher being newer.
pub struct VersionedFormat<T> {
    ordinal: u32,
    path_map: PathMap,
    parse: Parser<T>,
    depth_map: DepthMap,
    file_filter: FileFilter,
}

impl<T> Clone for VersionedFormat<T> {
    fn clone(&self) -> Self {
        Self {
            ordinal: self.ordinal,
            path_map: Arc::clone(&self.path_map),
            parse: Arc::clone(&self.parse),
            depth_map: Arc::clone(&self.depth_map),
            file_filter: Arc::clone(&self.file_filter),
        }
    }
}

impl<T> fmt::Debug for VersionedFormat<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedFormat")
            .field("ordinal", &self.ordinal)
            .finish_non_exhaustive()
    }
}

impl<T> VersionedFormat<T> {
    /// Format with identity path and depth maps that accepts every file.
    pub fn new(ordinal: u32, parse: impl Fn(&str) -> Option<T> + Send + Sync + 'static) -> Self {
        Self {
            ordinal,
            path_map: Arc::new(Path::to_path_buf),
            parse: Arc::new(parse),
            depth_map: Arc::new(|depth: usize| depth),
            file_filter: Arc::new(|_: &Path| true),
        }
    }

    pub fn with_path_map(mut self, path_map: impl Fn(&Path) -> PathBuf + Send + Sync + 'static) -> Self {
        self.path_map = Arc::new(path_map);
        self
    }

    pub fn with_depth_map(mut self, depth_map: impl Fn(usize) -> usize + Send + Sync + 'static) -> Self {
        self.depth_map = Arc::new(depth_map);
        self
    }

    pub fn with_file_filter(mut self, file_filter: impl Fn(&Path) -> bool + Send + Sync + 'static) -> Self {
        self.file_filter = Arc::new(file_filter);
        self
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// Concrete location of a record whose logical path is `base`.
    pub fn path_for(&self, base: &Path) -> PathBuf {
        (self.path_map)(base)
    }

    pub fn parse(&self, content: &str) -> Option<T> {
        (self.parse)(content)
    }

    /// Maximum search depth for this format given the caller's base depth.
    pub fn depth(&self, base_depth: usize) -> usize {
        (self.depth_map)(base_depth)
    }

    pub fn accepts(&self, path: &Path) -> bool {
        (self.file_filter)(path)
    }
}

/// The registered formats of one persisted type, newest last.
pub struct VersionedFormats<T> {
    type_name: &'static str,
    formats: Vec<VersionedFormat<T>>,
}

impl<T> fmt::Debug for VersionedFormats<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedFormats")
            .field("type_name", &self.type_name)
            .field("formats", &self.formats)
            .finish()
    }
}

impl<T> Clone for VersionedFormats<T> {
    fn clone(&self) -> Self {
        Self {
            type_name: self.type_name,
            formats: self.formats.clone(),
        }
    }
}

impl<T> VersionedFormats<T> {
    /// Register the formats of `T`.
    ///
    /// Fails fast on an empty list or on two formats sharing an ordinal.
    pub fn new(formats: Vec<VersionedFormat<T>>) -> Result<Self, PersistenceError> {
        let type_name = std::any::type_name::<T>();
        if formats.is_empty() {
            return Err(PersistenceError::NoFormats(type_name.to_string()));
        }

        let mut seen = BTreeSet::new();
        for format in &formats {
            if !seen.insert(format.ordinal()) {
                return Err(PersistenceError::DuplicateOrdinal(format.ordinal()));
            }
        }

        let mut formats = formats;
        formats.sort_by_key(VersionedFormat::ordinal);
        Ok(Self { type_name, formats })
    }

    /// The current format, used for every new write.
    pub fn latest(&self) -> &VersionedFormat<T> {
        // `new` rejects empty lists
        &self.formats[self.formats.len() - 1]
    }

    pub fn get(&self, ordinal: u32) -> Option<&VersionedFormat<T>> {
        self.formats.iter().find(|format| format.ordinal() == ordinal)
    }

    /// Formats from newest to oldest.
    pub fn newest_first(&self) -> impl Iterator<Item = &VersionedFormat<T>> {
        self.formats.iter().rev()
    }

    /// Deepest search any registered format asks for.
    pub fn max_depth(&self, base_depth: usize) -> usize {
        self.formats
            .iter()
            .map(|format| format.depth(base_depth))
            .max()
            .unwrap_or(base_depth)
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }
}

/// A record together with the ordinal of the format it was read in or
/// will be written with. The ordinal is never part of the record's
/// serialized form.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub record: T,
    pub ordinal: u32,
}

impl<T> Versioned<T> {
    pub fn new(record: T, ordinal: u32) -> Self {
        Self { record, ordinal }
    }

    pub fn into_inner(self) -> T {
        self.record
    }
}
