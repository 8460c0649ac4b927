// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Action Record Store
//!
//! Persists [`ActionRecord`]s under `<root>/<backup manager>/actions/`.
//! Two on-disk formats are registered:
//!
//! | Ordinal | Location                       | Times                                    |
//! |---------|--------------------------------|------------------------------------------|
//! | 0       | `actions/<id>.json`            | offset-less, optional `"timezone"` field |
//! | 2       | `actions/v2/<id>.json`         | RFC 3339 with offset                     |
//!
//! A record read from disk keeps its format when written back; new records
//! use the newest one. Every successful write or delete invalidates the
//! caches registered with the store's [`Invalidator`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::application::versioned_persistence::VersionedPersistenceResolver;
use crate::domain::config::PersistenceConfig;
use crate::domain::persistence::{
    PersistProvider, PersistenceError, Versioned, VersionedFormat, VersionedFormats,
};
use crate::infrastructure::cache::Invalidator;
use crate::infrastructure::persist::{create_persist_provider, PersistBackend};

pub const ACTIONS_FOLDER: &str = "actions";
const JSON_EXTENSION: &str = "json";
const LEGACY_TIME_FIELDS: [&str; 3] = ["startTime", "lastUpdateTime", "completionTime"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    CreateBackup,
    DeleteBackup,
    Restore,
    Import,
    Export,
    HousekeepingDeleteBackup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionResult {
    #[default]
    NotAvailable,
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionState {
    #[default]
    Running,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub action_id: String,
    pub backup_manager_id: String,
    pub name: ActionType,
    #[serde(default)]
    pub result: ActionResult,
    #[serde(default)]
    pub state: ActionState,
    #[serde(default)]
    pub progress_percentage: f64,
    pub start_time: DateTime<FixedOffset>,
    pub last_update_time: DateTime<FixedOffset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<FixedOffset>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
}

impl ActionRecord {
    pub fn new(
        action_id: impl Into<String>,
        backup_manager_id: impl Into<String>,
        name: ActionType,
        start_time: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            action_id: action_id.into(),
            backup_manager_id: backup_manager_id.into(),
            name,
            result: ActionResult::NotAvailable,
            state: ActionState::Running,
            progress_percentage: 0.0,
            start_time,
            last_update_time: start_time,
            completion_time: None,
            messages: Vec::new(),
        }
    }
}

pub struct ActionStore {
    root: PathBuf,
    resolver: VersionedPersistenceResolver<ActionRecord>,
    invalidator: Invalidator,
}

impl ActionStore {
    pub fn new(provider: Arc<dyn PersistProvider>, root: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        Ok(Self {
            root: root.into(),
            resolver: VersionedPersistenceResolver::new(provider, action_formats()?),
            invalidator: Invalidator::new(),
        })
    }

    /// Store on the local filesystem under `config.base_path`, searching
    /// `config.max_depth` levels below each actions folder.
    pub fn from_config(config: &PersistenceConfig, root: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let provider = create_persist_provider(PersistBackend::from(config))?;
        Ok(Self::new(provider, root)?.with_base_depth(config.max_depth))
    }

    pub fn with_base_depth(mut self, base_depth: usize) -> Self {
        self.resolver = self.resolver.with_base_depth(base_depth);
        self
    }

    /// Caches deriving from persisted actions register here.
    pub fn invalidator(&self) -> &Invalidator {
        &self.invalidator
    }

    pub fn actions_folder(&self, backup_manager_id: &str) -> PathBuf {
        self.root.join(backup_manager_id).join(ACTIONS_FOLDER)
    }

    /// Logical file of an action, before any format's path map.
    pub fn action_file(&self, backup_manager_id: &str, action_id: &str) -> PathBuf {
        self.actions_folder(backup_manager_id)
            .join(format!("{}.{}", action_id, JSON_EXTENSION))
    }

    /// Persists an action for the first time, with the newest format.
    pub fn create(&self, record: ActionRecord) -> Result<Versioned<ActionRecord>, PersistenceError> {
        let versioned = Versioned::new(record, self.resolver.latest_ordinal());
        self.write(&versioned)?;
        Ok(versioned)
    }

    /// Writes an action back with the format it is tagged with.
    pub fn write(&self, action: &Versioned<ActionRecord>) -> Result<PathBuf, PersistenceError> {
        let file = self.action_file(&action.record.backup_manager_id, &action.record.action_id);
        let path = self.resolver.write_versioned(&file, action)?;
        self.invalidator.invalidate_all();
        Ok(path)
    }

    pub fn delete(&self, action: &Versioned<ActionRecord>) -> Result<PathBuf, PersistenceError> {
        let file = self.action_file(&action.record.backup_manager_id, &action.record.action_id);
        let path = self.resolver.delete_versioned(&file, action)?;
        info!(action_id = %action.record.action_id, path = %path.display(), "Deleted action record");
        self.invalidator.invalidate_all();
        Ok(path)
    }

    /// Every readable action of a backup manager, in path order.
    pub fn actions(&self, backup_manager_id: &str) -> Result<Vec<Versioned<ActionRecord>>, PersistenceError> {
        self.resolver.read_all(&self.actions_folder(backup_manager_id))
    }
}

fn action_formats() -> Result<VersionedFormats<ActionRecord>, PersistenceError> {
    VersionedFormats::new(vec![
        VersionedFormat::new(0, parse_legacy).with_file_filter(is_json),
        VersionedFormat::new(2, |content| serde_json::from_str(content).ok())
            .with_path_map(v2_path)
            .with_depth_map(|depth| depth + 1)
            .with_file_filter(|path| is_json(path) && in_v2_folder(path)),
    ])
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == JSON_EXTENSION)
}

fn in_v2_folder(path: &Path) -> bool {
    path.parent()
        .and_then(Path::file_name)
        .is_some_and(|name| name == "v2")
}

fn v2_path(file: &Path) -> PathBuf {
    let folder = file.parent().unwrap_or_else(|| Path::new(""));
    match file.file_name() {
        Some(name) => folder.join("v2").join(name),
        None => folder.join("v2"),
    }
}

/// Legacy records carry offset-less times; a top-level `"timezone"` names
/// the offset they were taken in, UTC otherwise.
fn parse_legacy(content: &str) -> Option<ActionRecord> {
    let mut value: Value = serde_json::from_str(content).ok()?;
    let object = value.as_object_mut()?;

    let offset = match object.remove("timezone") {
        Some(Value::String(zone)) => Some(parse_offset(&zone)?),
        Some(_) => return None,
        None => None,
    };

    for field in LEGACY_TIME_FIELDS {
        let Some(Value::String(raw)) = object.get(field).cloned() else {
            continue;
        };
        let time = legacy_time(&raw, offset)?;
        object.insert(field.to_string(), Value::String(time.to_rfc3339()));
    }

    serde_json::from_value(value).ok()
}

fn parse_offset(zone: &str) -> Option<FixedOffset> {
    if zone == "Z" {
        return FixedOffset::east_opt(0);
    }
    zone.parse().ok()
}

/// An explicit offset replaces the one on the timestamp, keeping its local
/// time.
fn legacy_time(raw: &str, offset: Option<FixedOffset>) -> Option<DateTime<FixedOffset>> {
    let naive = match DateTime::parse_from_rfc3339(raw) {
        Ok(time) => match offset {
            None => return Some(time),
            Some(_) => time.naive_local(),
        },
        Err(_) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?,
    };
    let offset = match offset {
        Some(offset) => offset,
        None => FixedOffset::east_opt(0)?,
    };
    offset.from_local_datetime(&naive).single()
}
