// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Versioned Persistence Resolver
//!
//! Reads and writes records of one type `T` across all of its registered
//! [`VersionedFormat`]s. Writes use the newest format unless the record is
//! already tagged with another one; reads resolve every candidate file to
//! the newest format able to parse it, so files left behind by an older
//! release stay readable after an upgrade.
//!
//! # Path semantics
//!
//! - Writes take the record's *logical* file path (e.g.
//!   `manager/actions/42.json`); the chosen format's path map turns it into
//!   the concrete location (e.g. `manager/actions/v2/42.json`).
//! - Reads take the directory records live under. It is walked once, as
//!   deep as the deepest format asks for, and every format only considers
//!   candidates within its own depth that pass its file filter.
//!
//! Unparseable candidates are skipped and logged, never modified.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::persistence::{
    PersistProvider, PersistenceError, Versioned, VersionedFormat, VersionedFormats, WalkEntry,
    DEFAULT_BASE_DEPTH,
};

pub struct VersionedPersistenceResolver<T> {
    provider: Arc<dyn PersistProvider>,
    formats: VersionedFormats<T>,
    base_depth: usize,
}

impl<T> std::fmt::Debug for VersionedPersistenceResolver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedPersistenceResolver")
            .field("formats", &self.formats)
            .field("base_depth", &self.base_depth)
            .finish_non_exhaustive()
    }
}

impl<T: Serialize> VersionedPersistenceResolver<T> {
    pub fn new(provider: Arc<dyn PersistProvider>, formats: VersionedFormats<T>) -> Self {
        Self {
            provider,
            formats,
            base_depth: DEFAULT_BASE_DEPTH,
        }
    }

    pub fn with_base_depth(mut self, base_depth: usize) -> Self {
        self.base_depth = base_depth;
        self
    }

    pub fn base_depth(&self) -> usize {
        self.base_depth
    }

    pub fn formats(&self) -> &VersionedFormats<T> {
        &self.formats
    }

    pub fn latest_ordinal(&self) -> u32 {
        self.formats.latest().ordinal()
    }

    /// Writes `record` with the newest format. Returns the concrete path.
    pub fn write(&self, file: &Path, record: &T) -> Result<PathBuf, PersistenceError> {
        self.write_in(self.formats.latest(), file, record)
    }

    /// Writes `record` with the registered format `ordinal`.
    pub fn write_with(&self, ordinal: u32, file: &Path, record: &T) -> Result<PathBuf, PersistenceError> {
        let format = self
            .formats
            .get(ordinal)
            .ok_or(PersistenceError::UnknownOrdinal(ordinal))?;
        self.write_in(format, file, record)
    }

    /// Rewrites a record with the format it was read in or tagged with, so
    /// that it keeps its on-disk location.
    pub fn write_versioned(&self, file: &Path, versioned: &Versioned<T>) -> Result<PathBuf, PersistenceError> {
        self.write_with(versioned.ordinal, file, &versioned.record)
    }

    /// Removes the file the record's format maps `file` to.
    pub fn delete_versioned(&self, file: &Path, versioned: &Versioned<T>) -> Result<PathBuf, PersistenceError> {
        let format = self
            .formats
            .get(versioned.ordinal)
            .ok_or(PersistenceError::UnknownOrdinal(versioned.ordinal))?;
        let target = format.path_for(file);
        self.provider.delete(&target)?;
        debug!(path = %target.display(), ordinal = versioned.ordinal, "Deleted versioned record");
        Ok(target)
    }

    fn write_in(&self, format: &VersionedFormat<T>, file: &Path, record: &T) -> Result<PathBuf, PersistenceError> {
        let target = format.path_for(file);
        let content = serde_json::to_string_pretty(record)?;
        self.provider.write_atomic(&target, content.as_bytes())?;

        metrics::counter!("bro_persist_writes_total", "type" => self.formats.type_name()).increment(1);
        debug!(
            path = %target.display(),
            ordinal = format.ordinal(),
            "Wrote versioned record"
        );
        Ok(target)
    }
}

impl<T> VersionedPersistenceResolver<T> {
    /// Format-major resolution: tries formats from newest to oldest and
    /// returns the first successful parse of any candidate under `root`.
    pub fn read(&self, root: &Path) -> Result<Option<Versioned<T>>, PersistenceError> {
        let mut candidates = self.candidates(root)?;

        for format in self.formats.newest_first() {
            let depth = format.depth(self.base_depth);
            for candidate in candidates.iter_mut() {
                if candidate.entry.depth > depth || !format.accepts(&candidate.entry.path) {
                    continue;
                }
                let Some(content) = candidate.content(self.provider.as_ref())? else {
                    continue;
                };
                if let Some(record) = format.parse(content) {
                    return Ok(Some(Versioned::new(record, format.ordinal())));
                }
                self.skipped(&candidate.entry.path, format.ordinal());
            }
        }

        Ok(None)
    }

    /// File-major resolution: every candidate under `root` resolves to the
    /// newest format that parses it. Candidates no format can parse are
    /// skipped.
    pub fn read_all(&self, root: &Path) -> Result<Vec<Versioned<T>>, PersistenceError> {
        self.read_all_with(root, |_| None)
    }

    /// Like [`read_all`](Self::read_all), but a candidate that passed some
    /// format's filter and failed every parser is replaced by `default`,
    /// tagged with the newest format.
    pub fn read_all_or_default(
        &self,
        root: &Path,
        default: impl Fn(&Path) -> Option<T>,
    ) -> Result<Vec<Versioned<T>>, PersistenceError> {
        self.read_all_with(root, default)
    }

    fn read_all_with(
        &self,
        root: &Path,
        default: impl Fn(&Path) -> Option<T>,
    ) -> Result<Vec<Versioned<T>>, PersistenceError> {
        let mut records = Vec::new();

        for mut candidate in self.candidates(root)? {
            let mut passed_filter = false;
            let mut resolved = None;

            for format in self.formats.newest_first() {
                if candidate.entry.depth > format.depth(self.base_depth)
                    || !format.accepts(&candidate.entry.path)
                {
                    continue;
                }
                passed_filter = true;
                let Some(content) = candidate.content(self.provider.as_ref())? else {
                    break;
                };
                if let Some(record) = format.parse(content) {
                    resolved = Some(Versioned::new(record, format.ordinal()));
                    break;
                }
                self.skipped(&candidate.entry.path, format.ordinal());
            }

            match resolved {
                Some(record) => records.push(record),
                None if passed_filter => {
                    if let Some(record) = default(&candidate.entry.path) {
                        records.push(Versioned::new(record, self.formats.latest().ordinal()));
                    }
                }
                None => {}
            }
        }

        Ok(records)
    }

    fn candidates(&self, root: &Path) -> Result<Vec<Candidate>, PersistenceError> {
        let depth = self.formats.max_depth(self.base_depth);
        let entries = self.provider.walk(root, depth)?;
        debug!(root = %root.display(), depth, candidates = entries.len(), "Resolving versioned records");
        Ok(entries.into_iter().map(Candidate::new).collect())
    }

    fn skipped(&self, path: &Path, ordinal: u32) {
        metrics::counter!("bro_persist_parse_skipped_total", "type" => self.formats.type_name()).increment(1);
        warn!(path = %path.display(), ordinal, "Candidate did not parse with format, skipping");
    }
}

/// A walked file whose content is read at most once.
struct Candidate {
    entry: WalkEntry,
    content: Option<Option<String>>,
}

impl Candidate {
    fn new(entry: WalkEntry) -> Self {
        Self { entry, content: None }
    }

    /// `None` when the file vanished between the walk and the read.
    fn content(&mut self, provider: &dyn PersistProvider) -> Result<Option<&str>, PersistenceError> {
        if self.content.is_none() {
            let loaded = match provider.read_to_string(&self.entry.path) {
                Ok(content) => Some(content),
                Err(PersistenceError::NotFound(_)) => None,
                Err(e) => return Err(e),
            };
            self.content = Some(loaded);
        }
        Ok(self.content.as_ref().and_then(|c| c.as_deref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persist::InMemoryPersistProvider;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        title: String,
    }

    fn v2_path(file: &Path) -> PathBuf {
        let parent = file.parent().unwrap_or(Path::new(""));
        parent.join("v2").join(file.file_name().unwrap_or_default())
    }

    fn formats() -> VersionedFormats<Note> {
        VersionedFormats::new(vec![
            VersionedFormat::new(0, |s| serde_json::from_str(s).ok())
                .with_file_filter(|p| p.extension().is_some_and(|e| e == "json")),
            VersionedFormat::new(2, |s| serde_json::from_str(s).ok())
                .with_path_map(v2_path)
                .with_depth_map(|d| d + 1)
                .with_file_filter(|p| p.to_string_lossy().contains("/v2/")),
        ])
        .unwrap()
    }

    fn resolver() -> (VersionedPersistenceResolver<Note>, Arc<InMemoryPersistProvider>) {
        let provider = Arc::new(InMemoryPersistProvider::new());
        let resolver = VersionedPersistenceResolver::new(provider.clone(), formats());
        (resolver, provider)
    }

    fn note(title: &str) -> Note {
        Note { title: title.to_string() }
    }

    #[test]
    fn test_write_uses_newest_format_path() {
        let (resolver, provider) = resolver();
        let path = resolver.write(Path::new("notes/a.json"), &note("a")).unwrap();
        assert_eq!(path, PathBuf::from("notes/v2/a.json"));
        assert!(provider.exists(&path));
        assert_eq!(resolver.latest_ordinal(), 2);
    }

    #[test]
    fn test_read_prefers_newest_format() {
        let (resolver, _) = resolver();
        resolver.write_with(0, Path::new("notes/old.json"), &note("old")).unwrap();
        resolver.write(Path::new("notes/new.json"), &note("new")).unwrap();

        let found = resolver.read(Path::new("notes")).unwrap().unwrap();
        assert_eq!(found, Versioned::new(note("new"), 2));
    }

    #[test]
    fn test_read_empty_directory_is_none() {
        let (resolver, _) = resolver();
        assert!(resolver.read(Path::new("notes")).unwrap().is_none());
        assert!(resolver.read_all(Path::new("notes")).unwrap().is_empty());
    }

    #[test]
    fn test_unparseable_candidate_is_skipped_and_kept() {
        let (resolver, provider) = resolver();
        provider.write_atomic(Path::new("notes/broken.json"), b"{not json").unwrap();
        resolver.write_with(0, Path::new("notes/ok.json"), &note("ok")).unwrap();

        let all = resolver.read_all(Path::new("notes")).unwrap();
        assert_eq!(all, vec![Versioned::new(note("ok"), 0)]);
        assert!(provider.exists(Path::new("notes/broken.json")));
    }

    #[test]
    fn test_read_all_or_default_replaces_unparseable() {
        let (resolver, provider) = resolver();
        provider.write_atomic(Path::new("notes/broken.json"), b"{not json").unwrap();
        provider.write_atomic(Path::new("notes/readme.txt"), b"ignored").unwrap();

        let all = resolver
            .read_all_or_default(Path::new("notes"), |path| {
                Some(note(&path.file_stem()?.to_string_lossy()))
            })
            .unwrap();
        assert_eq!(all, vec![Versioned::new(note("broken"), 2)]);
    }

    #[test]
    fn test_versioned_round_trip_keeps_location() {
        let (resolver, provider) = resolver();
        resolver.write_with(0, Path::new("notes/a.json"), &note("first")).unwrap();

        let mut found = resolver.read(Path::new("notes")).unwrap().unwrap();
        found.record.title = "second".to_string();
        let path = resolver.write_versioned(Path::new("notes/a.json"), &found).unwrap();

        assert_eq!(path, PathBuf::from("notes/a.json"));
        assert!(!provider.exists(Path::new("notes/v2/a.json")));
        let reread = resolver.read(Path::new("notes")).unwrap().unwrap();
        assert_eq!(reread, Versioned::new(note("second"), 0));
    }

    #[test]
    fn test_base_depth_widens_the_search() {
        let (resolver, provider) = resolver();
        provider
            .write_atomic(Path::new("notes/archive/a.json"), br#"{"title":"archived"}"#)
            .unwrap();
        assert!(resolver.read(Path::new("notes")).unwrap().is_none());

        let deeper = resolver.with_base_depth(2);
        assert_eq!(deeper.base_depth(), 2);
        let found = deeper.read(Path::new("notes")).unwrap().unwrap();
        assert_eq!(found, Versioned::new(note("archived"), 0));
    }

    #[test]
    fn test_unknown_ordinal() {
        let (resolver, _) = resolver();
        let result = resolver.write_with(1, Path::new("notes/a.json"), &note("a"));
        assert!(matches!(result, Err(PersistenceError::UnknownOrdinal(1))));
    }

    #[test]
    fn test_delete_versioned_removes_mapped_file() {
        let (resolver, provider) = resolver();
        let file = Path::new("notes/a.json");
        resolver.write(file, &note("a")).unwrap();

        let removed = resolver
            .delete_versioned(file, &Versioned::new(note("a"), 2))
            .unwrap();
        assert_eq!(removed, PathBuf::from("notes/v2/a.json"));
        assert_eq!(provider.file_count(), 0);
    }

    #[test]
    fn test_ordinal_is_not_serialized() {
        let (resolver, provider) = resolver();
        let path = resolver.write(Path::new("notes/a.json"), &note("a")).unwrap();
        let content = provider.read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value, serde_json::json!({ "title": "a" }));
    }
}
