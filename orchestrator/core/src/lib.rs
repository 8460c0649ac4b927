// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Backup and Restore Orchestrator Core
//!
//! Job-progress coordination and versioned persistence primitives shared by
//! the orchestrator's job layer.
//!
//! # Architecture
//!
//! | Layer | Module | Purpose |
//! |-------|--------|---------|
//! | Domain | [`domain::progress`] | Per-agent and per-fragment progress verdicts |
//! | Domain | [`domain::persistence`] | Persistence contract, versioned formats |
//! | Domain | [`domain::config`] | `OrchestratorConfig` manifest |
//! | Application | [`application::versioned_persistence`] | Version resolution on read, newest format on write |
//! | Application | [`application::action_store`] | Action records across format generations |
//! | Application | [`application::fragment_transfer`] | File name, chunks, checksum to a sink |
//! | Infrastructure | [`infrastructure::persist`] | Local and in-memory persist providers |
//! | Infrastructure | [`infrastructure::cache`] | Invalidating cache and invalidation registry |
//! | Infrastructure | [`infrastructure::transfer`] | Bounded-memory chunked streaming |
//! | Infrastructure | [`infrastructure::telemetry`] | Tracing subscriber setup |

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
