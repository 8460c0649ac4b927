// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod cache;
pub mod persist;
pub mod telemetry;
pub mod transfer;

pub use cache::{Cached, Invalidator};
pub use transfer::{ChecksumCalculator, ChunkedStreamer};
