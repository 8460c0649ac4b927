// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Job Stage Aggregate
//!
//! - [`JobStage`]: progress of every participating agent within one stage.
//! - [`StageName`]: the stages a job moves through, with their order.
//!
//! Agent messages are applied concurrently, one task per agent connection,
//! so the agent map is a concurrent map and every verdict is a snapshot.

use std::fmt;
use std::sync::Arc;

use bro_orchestrator_core::domain::progress::{AgentProgress, Progress};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

const DECIMAL_PLACES: usize = 2;

/// Stages before a job reaches a final stage.
pub const NON_FINAL_STAGES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageName {
    Preparation,
    Execution,
    PostActions,
    Completed,
    Failed,
}

impl StageName {
    /// 1-based position of the stage; both final stages share the last one.
    pub fn order(self) -> u32 {
        match self {
            StageName::Preparation => 1,
            StageName::Execution => 2,
            StageName::PostActions => 3,
            StageName::Completed | StageName::Failed => 4,
        }
    }

    pub fn is_final(self) -> bool {
        matches!(self, StageName::Completed | StageName::Failed)
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageName::Preparation => "PREPARATION",
            StageName::Execution => "EXECUTION",
            StageName::PostActions => "POST_ACTIONS",
            StageName::Completed => "COMPLETED",
            StageName::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StageError {
    #[error("Agent {0} is not part of this stage")]
    UnknownAgent(String),
}

/// Progress of every agent participating in one job stage.
///
/// The set of agents is fixed at construction. Messages from any other
/// agent are rejected with [`StageError::UnknownAgent`].
#[derive(Debug)]
pub struct JobStage {
    name: StageName,
    agents: DashMap<String, Arc<AgentProgress>>,
    started_at: RwLock<Option<DateTime<Utc>>>,
}

impl JobStage {
    pub fn new<I, S>(name: StageName, agent_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let agents = DashMap::new();
        for agent_id in agent_ids {
            agents.insert(agent_id.into(), Arc::new(AgentProgress::new()));
        }
        Self {
            name,
            agents,
            started_at: RwLock::new(None),
        }
    }

    pub fn name(&self) -> StageName {
        self.name
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Marks the stage as started. Only the first call has an effect.
    pub fn trigger(&self) -> bool {
        let mut started_at = self.started_at.write();
        if started_at.is_some() {
            return false;
        }
        info!(stage = %self.name, agents = self.agents.len(), "Starting job stage");
        *started_at = Some(Utc::now());
        true
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.started_at.read()
    }

    /// The tracker of one agent, shared with whoever handles its messages.
    pub fn agent_progress(&self, agent_id: &str) -> Result<Arc<AgentProgress>, StageError> {
        self.agents
            .get(agent_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StageError::UnknownAgent(agent_id.to_string()))
    }

    /// Applies a stage-complete message from an agent.
    pub fn update_agent_progress(&self, agent_id: &str, success: bool) -> Result<(), StageError> {
        let progress = Progress::from_success(success);
        info!(stage = %self.name, agent_id, %progress, "Agent completed stage");
        self.agent_progress(agent_id)?.set_progress(progress);
        Ok(())
    }

    pub fn handle_agent_disconnecting(&self, agent_id: &str) -> Result<(), StageError> {
        let agent = self.agent_progress(agent_id)?;
        let failed = agent.fail_waiting_fragments();
        agent.set_progress(Progress::Disconnected);
        warn!(stage = %self.name, agent_id, failed_fragments = failed, "Agent disconnected during stage");
        Ok(())
    }

    pub fn handle_unexpected_data_channel(&self, agent_id: &str) -> Result<(), StageError> {
        let agent = self.agent_progress(agent_id)?;
        let failed = agent.fail_waiting_fragments();
        agent.set_progress(Progress::Failed);
        warn!(stage = %self.name, agent_id, failed_fragments = failed, "Unexpected data channel from agent");
        Ok(())
    }

    pub fn receive_new_fragment(&self, agent_id: &str, fragment_id: &str) -> Result<(), StageError> {
        self.agent_progress(agent_id)?.handle_new_fragment(fragment_id);
        Ok(())
    }

    pub fn update_fragment(&self, agent_id: &str, fragment_id: &str, progress: Progress) -> Result<(), StageError> {
        info!(
            "Updating status of fragment {} from agent {} to {}",
            fragment_id, agent_id, progress
        );
        self.agent_progress(agent_id)?
            .set_fragment_progress(fragment_id, progress);
        Ok(())
    }

    /// Every agent finished. A stage without agents is finished.
    pub fn is_stage_finished(&self) -> bool {
        self.agents.iter().all(|entry| entry.value().did_finish())
    }

    pub fn is_stage_successful(&self) -> bool {
        self.agents.iter().all(|entry| entry.value().did_succeed())
    }

    /// Ids of agents that did not finish yet, sorted.
    pub fn ids_of_agents_in_progress(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .agents
            .iter()
            .filter(|entry| !entry.value().did_finish())
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Fraction of the whole job done, as a value in `[0, 1]` rounded half up
    /// to two decimals: earlier stages count in full, this stage by its share
    /// of successful agents.
    pub fn progress_percentage(&self, stage_order: u32, non_final_stages: u32) -> f64 {
        if non_final_stages == 0 {
            return 0.0;
        }
        let stages = f64::from(non_final_stages);
        let previous = f64::from(stage_order.saturating_sub(1)) / stages;
        let current = self.current_stage_progress() / stages;
        round_half_up(previous + current, DECIMAL_PLACES)
    }

    /// [`progress_percentage`](Self::progress_percentage) for this stage's
    /// own position in a standard job.
    pub fn job_progress(&self) -> f64 {
        self.progress_percentage(self.name.order(), NON_FINAL_STAGES)
    }

    fn current_stage_progress(&self) -> f64 {
        if self.agents.is_empty() {
            return 0.0;
        }
        let successful = self
            .agents
            .iter()
            .filter(|entry| entry.value().did_succeed())
            .count();
        successful as f64 / self.agents.len() as f64
    }
}

/// Rounds the shortest decimal form of `value`, the digits `Display`
/// prints. Scaling in binary first would turn `0.145` into `14.4999..`.
fn round_half_up(value: f64, places: usize) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let text = value.abs().to_string();
    let (whole, fraction) = text.split_once('.').unwrap_or((text.as_str(), ""));
    if fraction.len() <= places {
        return value;
    }
    let Ok(mut scaled) = format!("{}{}", whole, &fraction[..places]).parse::<u64>() else {
        return value;
    };
    if fraction.as_bytes()[places] >= b'5' {
        scaled += 1;
    }
    let rounded = scaled as f64 / 10f64.powi(places as i32);
    if value.is_sign_negative() {
        -rounded
    } else {
        rounded
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<String> = self.agents.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        write!(f, "{} - {{", self.name)?;
        for (i, id) in ids.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match self.agents.get(id) {
                Some(agent) => write!(f, "{}={}", id, agent.value())?,
                None => write!(f, "{}=?", id)?,
            }
        }
        f.write_str("}")
    }
}
