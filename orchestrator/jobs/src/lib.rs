// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `bro-orchestrator-jobs`: Job Stage Aggregation
//!
//! Aggregates the [`AgentProgress`](bro_orchestrator_core::domain::progress::AgentProgress)
//! of every agent taking part in one stage of a backup or restore job into a
//! stage verdict.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `JobStage`, `StageName`, `StageError` |
//!
//! ## Key Concepts
//!
//! - **Stage**: one step of a job (preparation, execution, post actions)
//!   that every participating agent must complete.
//! - **Verdict**: a stage is finished once every agent finished, and
//!   successful once every agent succeeded.
//! - **Forced resolution**: a disconnecting agent has its waiting fragments
//!   failed and is marked `DISCONNECTED`, so the stage cannot hang on it.
//!
//! Timeouts are owned by the caller; this crate only offers the mutation
//! primitives.

pub mod domain;

pub use domain::*;
