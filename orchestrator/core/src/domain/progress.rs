// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent and Fragment Progress Tracking
//!
//! Tracks one agent's participation in one job stage: the agent's own
//! progress plus the progress of every fragment it announced. The job
//! stage polls [`AgentProgress::did_finish`] and
//! [`AgentProgress::did_succeed`] to reach a verdict.
//!
//! Fragment state lives in a concurrent map so that every inbound agent
//! message can be applied from its own task without external locking.
//! The predicates are snapshot reads and may race with in-flight updates;
//! a `false` answer is only final once the agent is known disconnected.

use std::fmt;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Status of one unit of work (an agent's own action, or one fragment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Progress {
    #[default]
    WaitingResult,
    Successful,
    Failed,
    Disconnected,
}

impl Progress {
    /// True for every value other than [`Progress::WaitingResult`].
    pub fn is_terminal(self) -> bool {
        self != Progress::WaitingResult
    }

    /// Maps a stage-complete style success flag to a terminal progress.
    pub fn from_success(success: bool) -> Self {
        if success {
            Progress::Successful
        } else {
            Progress::Failed
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Progress::WaitingResult => "WAITING_RESULT",
            Progress::Successful => "SUCCESSFUL",
            Progress::Failed => "FAILED",
            Progress::Disconnected => "DISCONNECTED",
        };
        f.write_str(name)
    }
}

/// Progress of a single fragment announced by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentProgress {
    pub fragment_id: String,
    pub progress: Progress,
}

impl FragmentProgress {
    pub fn new(fragment_id: impl Into<String>) -> Self {
        Self {
            fragment_id: fragment_id.into(),
            progress: Progress::WaitingResult,
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.progress == Progress::WaitingResult
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProgressError {
    #[error("Unknown fragment: {0}")]
    UnknownFragment(String),
}

/// Progress of one agent within one job stage.
///
/// Every value moves one way, from `WaitingResult` to a terminal value.
/// The setters are plain idempotent writes: callers must not set
/// `WaitingResult` again once a terminal value was reported.
#[derive(Debug, Default)]
pub struct AgentProgress {
    progress: RwLock<Progress>,
    fragments: DashMap<String, FragmentProgress>,
    strict: bool,
}

impl AgentProgress {
    /// Permissive tracker: progress for an unknown fragment id creates it.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker whose [`try_set_fragment_progress`](Self::try_set_fragment_progress)
    /// rejects fragments that were never announced.
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Registers a fragment at `WaitingResult`. Re-announcing an id resets it.
    pub fn handle_new_fragment(&self, fragment_id: &str) {
        debug!(fragment_id, "New fragment announced");
        self.fragments
            .insert(fragment_id.to_string(), FragmentProgress::new(fragment_id));
    }

    /// Sets a fragment's progress, creating the fragment if it is unknown.
    pub fn set_fragment_progress(&self, fragment_id: &str, progress: Progress) {
        info!(fragment_id, %progress, "Updating fragment progress");
        self.fragments
            .entry(fragment_id.to_string())
            .and_modify(|fragment| fragment.progress = progress)
            .or_insert_with(|| FragmentProgress {
                fragment_id: fragment_id.to_string(),
                progress,
            });
    }

    /// Like [`set_fragment_progress`](Self::set_fragment_progress), but a
    /// strict tracker refuses fragment ids that were never announced.
    pub fn try_set_fragment_progress(
        &self,
        fragment_id: &str,
        progress: Progress,
    ) -> Result<(), ProgressError> {
        if self.strict {
            let mut fragment = self
                .fragments
                .get_mut(fragment_id)
                .ok_or_else(|| ProgressError::UnknownFragment(fragment_id.to_string()))?;
            info!(fragment_id, %progress, "Updating fragment progress");
            fragment.progress = progress;
            return Ok(());
        }
        self.set_fragment_progress(fragment_id, progress);
        Ok(())
    }

    pub fn set_progress(&self, progress: Progress) {
        debug!(%progress, "Updating agent progress");
        *self.progress.write() = progress;
    }

    pub fn progress(&self) -> Progress {
        *self.progress.read()
    }

    pub fn fragment_progress(&self, fragment_id: &str) -> Option<Progress> {
        self.fragments.get(fragment_id).map(|fragment| fragment.progress)
    }

    /// Snapshot of every fragment, sorted by id.
    pub fn fragments(&self) -> Vec<FragmentProgress> {
        let mut fragments: Vec<FragmentProgress> = self
            .fragments
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        fragments.sort_by(|a, b| a.fragment_id.cmp(&b.fragment_id));
        fragments
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    /// Moves every fragment still waiting for a result to `Failed`.
    ///
    /// Returns how many fragments were failed. Terminal fragments are left
    /// untouched.
    pub fn fail_waiting_fragments(&self) -> usize {
        let mut failed = 0;
        for mut fragment in self.fragments.iter_mut() {
            if fragment.is_waiting() {
                fragment.progress = Progress::Failed;
                failed += 1;
            }
        }
        if failed > 0 {
            info!(failed, "Failed fragments still waiting for a result");
        }
        failed
    }

    /// Own progress and every fragment are terminal. Does not imply success.
    pub fn did_finish(&self) -> bool {
        self.progress().is_terminal()
            && self.fragments.iter().all(|fragment| !fragment.is_waiting())
    }

    /// Own progress and every fragment are `Successful`.
    pub fn did_succeed(&self) -> bool {
        self.progress() == Progress::Successful
            && self
                .fragments
                .iter()
                .all(|fragment| fragment.progress == Progress::Successful)
    }

    pub fn is_connected(&self) -> bool {
        self.progress() != Progress::Disconnected
    }
}

impl fmt::Display for AgentProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgentProgress[{}", self.progress())?;
        for fragment in self.fragments() {
            write!(f, ", {}={}", fragment.fragment_id, fragment.progress)?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tracker_is_waiting_and_connected() {
        let tracker = AgentProgress::new();
        assert_eq!(tracker.progress(), Progress::WaitingResult);
        assert!(!tracker.did_finish());
        assert!(!tracker.did_succeed());
        assert!(tracker.is_connected());
    }

    #[test]
    fn test_finish_requires_own_progress_and_all_fragments() {
        let tracker = AgentProgress::new();
        tracker.handle_new_fragment("F1");
        tracker.set_progress(Progress::Successful);
        assert!(!tracker.did_finish());

        tracker.set_fragment_progress("F1", Progress::Successful);
        assert!(tracker.did_finish());
        assert!(tracker.did_succeed());
    }

    #[test]
    fn test_single_failure_prevents_success() {
        let tracker = AgentProgress::new();
        tracker.handle_new_fragment("F1");
        tracker.handle_new_fragment("F2");
        tracker.set_fragment_progress("F1", Progress::Successful);
        tracker.set_fragment_progress("F2", Progress::Failed);
        tracker.set_progress(Progress::Successful);

        assert!(tracker.did_finish());
        assert!(!tracker.did_succeed());
    }

    #[test]
    fn test_agent_failure_prevents_success() {
        let tracker = AgentProgress::new();
        tracker.handle_new_fragment("F1");
        tracker.set_fragment_progress("F1", Progress::Successful);
        tracker.set_progress(Progress::Failed);

        assert!(tracker.did_finish());
        assert!(!tracker.did_succeed());
    }

    #[test]
    fn test_unknown_fragment_is_created() {
        let tracker = AgentProgress::new();
        tracker.set_fragment_progress("late", Progress::Failed);
        assert_eq!(tracker.fragment_progress("late"), Some(Progress::Failed));
        assert_eq!(tracker.fragment_count(), 1);
    }

    #[test]
    fn test_reannouncing_fragment_resets_it() {
        let tracker = AgentProgress::new();
        tracker.handle_new_fragment("F1");
        tracker.set_fragment_progress("F1", Progress::Successful);
        tracker.handle_new_fragment("F1");
        assert_eq!(tracker.fragment_progress("F1"), Some(Progress::WaitingResult));
    }

    #[test]
    fn test_fail_waiting_fragments_leaves_terminal_fragments() {
        let tracker = AgentProgress::new();
        tracker.handle_new_fragment("F1");
        tracker.handle_new_fragment("F2");
        tracker.handle_new_fragment("F3");
        tracker.set_fragment_progress("F1", Progress::Successful);
        tracker.set_fragment_progress("F3", Progress::Disconnected);

        assert_eq!(tracker.fail_waiting_fragments(), 1);
        assert_eq!(tracker.fragment_progress("F1"), Some(Progress::Successful));
        assert_eq!(tracker.fragment_progress("F2"), Some(Progress::Failed));
        assert_eq!(tracker.fragment_progress("F3"), Some(Progress::Disconnected));
        assert!(tracker.fragments().iter().all(|f| !f.is_waiting()));
    }

    #[test]
    fn test_disconnect_scenario() {
        let tracker = AgentProgress::new();
        tracker.handle_new_fragment("F1");
        tracker.handle_new_fragment("F2");
        tracker.set_fragment_progress("F1", Progress::Successful);

        tracker.fail_waiting_fragments();
        tracker.set_progress(Progress::Disconnected);

        assert!(tracker.did_finish());
        assert!(!tracker.did_succeed());
        assert!(!tracker.is_connected());
    }

    #[test]
    fn test_agent_without_fragments() {
        let tracker = AgentProgress::new();
        tracker.set_progress(Progress::Successful);
        assert!(tracker.did_finish());
        assert!(tracker.did_succeed());
    }

    #[test]
    fn test_strict_mode_rejects_unknown_fragment() {
        let tracker = AgentProgress::strict();
        let result = tracker.try_set_fragment_progress("ghost", Progress::Successful);
        assert_eq!(result, Err(ProgressError::UnknownFragment("ghost".to_string())));
        assert_eq!(tracker.fragment_count(), 0);

        tracker.handle_new_fragment("F1");
        tracker
            .try_set_fragment_progress("F1", Progress::Successful)
            .unwrap();
        assert_eq!(tracker.fragment_progress("F1"), Some(Progress::Successful));
    }

    #[test]
    fn test_permissive_try_set_creates_fragment() {
        let tracker = AgentProgress::new();
        tracker
            .try_set_fragment_progress("ghost", Progress::Successful)
            .unwrap();
        assert_eq!(tracker.fragment_progress("ghost"), Some(Progress::Successful));
    }

    #[test]
    fn test_progress_serializes_in_protocol_spelling() {
        let json = serde_json::to_string(&Progress::WaitingResult).unwrap();
        assert_eq!(json, "\"WAITING_RESULT\"");
        assert_eq!(Progress::Disconnected.to_string(), "DISCONNECTED");
    }
}
