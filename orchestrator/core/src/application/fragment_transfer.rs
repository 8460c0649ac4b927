// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Fragment Transfer
//!
//! Sends one fragment file to a peer as: file name, one data message per
//! chunk, then the SHA-256 checksum of everything sent. Message framing
//! belongs to the [`FragmentSink`] implementation.

use std::path::Path;

use tracing::info;

use crate::infrastructure::transfer::{ChecksumCalculator, ChunkedStreamer, ConsumerError, StreamError};

pub trait FragmentSink {
    fn send_file_name(&mut self, file_name: &str) -> Result<(), ConsumerError>;

    /// `chunk` is only valid for the duration of the call.
    fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), ConsumerError>;

    fn send_checksum(&mut self, checksum: &str) -> Result<(), ConsumerError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSummary {
    pub file_name: String,
    pub bytes: u64,
    pub checksum: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FragmentTransfer {
    streamer: ChunkedStreamer,
}

impl FragmentTransfer {
    pub fn new(streamer: ChunkedStreamer) -> Self {
        Self { streamer }
    }

    pub fn send_file(&self, path: &Path, sink: &mut dyn FragmentSink) -> Result<TransferSummary, StreamError> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| StreamError::Open {
                path: path.display().to_string(),
                reason: "path has no file name".to_string(),
            })?;

        sink.send_file_name(&file_name).map_err(StreamError::Consumer)?;

        let mut calculator = ChecksumCalculator::new();
        let bytes = self.streamer.stream(path, |chunk| {
            calculator.update(chunk);
            sink.send_chunk(chunk)
        })?;

        let checksum = calculator.finalize();
        sink.send_checksum(&checksum).map_err(StreamError::Consumer)?;

        info!(file_name = %file_name, bytes, checksum = %checksum, "Sent fragment file");
        Ok(TransferSummary {
            file_name,
            bytes,
            checksum,
        })
    }
}
