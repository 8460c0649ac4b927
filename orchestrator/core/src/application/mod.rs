// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod action_store;
pub mod fragment_transfer;
pub mod versioned_persistence;

pub use action_store::{ActionRecord, ActionStore};
pub use fragment_transfer::{FragmentSink, FragmentTransfer};
pub use versioned_persistence::VersionedPersistenceResolver;
