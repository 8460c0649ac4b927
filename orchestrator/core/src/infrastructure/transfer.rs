// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Chunked Streaming
//!
//! Moves backup payloads in bounded memory. [`ChunkedStreamer`] reads a
//! file through one reusable buffer and hands each filled slice to a
//! consumer; the consumer must copy out whatever it keeps, because the
//! next read overwrites the buffer.

use std::error::Error as StdError;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::domain::config::TransferConfig;
use crate::domain::persistence::PersistProvider;

/// 512 KiB: bounds peak memory while amortizing read syscalls.
pub const DEFAULT_CHUNK_SIZE: usize = 512 * 1024;

pub type ConsumerError = Box<dyn StdError + Send + Sync>;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Failed to open {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Chunk consumer failed: {0}")]
    Consumer(#[source] ConsumerError),

    #[error("Chunk size must be greater than zero")]
    InvalidChunkSize,
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkedStreamer {
    chunk_size: usize,
}

impl Default for ChunkedStreamer {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ChunkedStreamer {
    pub fn new(chunk_size: usize) -> Result<Self, StreamError> {
        if chunk_size == 0 {
            return Err(StreamError::InvalidChunkSize);
        }
        Ok(Self { chunk_size })
    }

    pub fn from_config(config: &TransferConfig) -> Result<Self, StreamError> {
        Self::new(config.chunk_size_bytes)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Streams the file at `path`, returning the total number of bytes
    /// delivered. The file handle is released on every exit path.
    pub fn stream<F, E>(&self, path: &Path, on_chunk: F) -> Result<u64, StreamError>
    where
        F: FnMut(&[u8]) -> Result<(), E>,
        E: Into<ConsumerError>,
    {
        let file = File::open(path).map_err(|e| StreamError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        self.stream_reader(file, &path.display().to_string(), on_chunk)
    }

    /// Same as [`stream`](Self::stream) but opens the file through a
    /// persist provider.
    pub fn stream_from<F, E>(
        &self,
        provider: &dyn PersistProvider,
        path: &Path,
        on_chunk: F,
    ) -> Result<u64, StreamError>
    where
        F: FnMut(&[u8]) -> Result<(), E>,
        E: Into<ConsumerError>,
    {
        let reader = provider.open_read(path).map_err(|e| StreamError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        self.stream_reader(reader, &path.display().to_string(), on_chunk)
    }

    pub fn stream_reader<R, F, E>(&self, mut reader: R, label: &str, mut on_chunk: F) -> Result<u64, StreamError>
    where
        R: Read,
        F: FnMut(&[u8]) -> Result<(), E>,
        E: Into<ConsumerError>,
    {
        let mut buffer = vec![0u8; self.chunk_size];
        let mut total: u64 = 0;
        let mut chunks: u64 = 0;

        loop {
            let filled = fill_buffer(&mut reader, &mut buffer).map_err(|source| StreamError::Read {
                path: label.to_string(),
                source,
            })?;
            if filled == 0 {
                break;
            }

            on_chunk(&buffer[..filled]).map_err(|e| StreamError::Consumer(e.into()))?;
            total += filled as u64;
            chunks += 1;
            metrics::counter!("bro_transfer_chunks_total").increment(1);
            metrics::counter!("bro_transfer_bytes_total").increment(filled as u64);

            if filled < buffer.len() {
                break;
            }
        }

        debug!(path = label, chunks, bytes = total, "Finished streaming");
        Ok(total)
    }
}

/// Reads until the buffer is full or the reader is exhausted, so that
/// only the final chunk can be short.
fn fill_buffer<R: Read>(reader: &mut R, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Incremental SHA-256 over streamed chunks, rendered as lowercase hex.
#[derive(Debug, Clone, Default)]
pub struct ChecksumCalculator {
    hasher: Sha256,
}

impl ChecksumCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    pub fn finalize(self) -> String {
        hex::encode(self.hasher.finalize())
    }

    pub fn of_bytes(bytes: &[u8]) -> String {
        let mut calculator = Self::new();
        calculator.update(bytes);
        calculator.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_five_and_a_half_chunks() {
        let chunk_size = 1024;
        let data = payload(chunk_size * 11 / 2);
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();

        let streamer = ChunkedStreamer::new(chunk_size).unwrap();
        let mut sizes = Vec::new();
        let mut reassembled = Vec::new();
        let total = streamer
            .stream(file.path(), |chunk| {
                sizes.push(chunk.len());
                reassembled.extend_from_slice(chunk);
                Ok::<_, std::io::Error>(())
            })
            .unwrap();

        assert_eq!(sizes, vec![1024, 1024, 1024, 1024, 1024, 512]);
        assert_eq!(reassembled, data);
        assert_eq!(total, data.len() as u64);
    }

    #[test]
    fn test_exact_multiple_has_no_empty_chunk() {
        let streamer = ChunkedStreamer::new(4).unwrap();
        let mut sizes = Vec::new();
        streamer
            .stream_reader(&b"abcdefgh"[..], "memory", |chunk| {
                sizes.push(chunk.len());
                Ok::<_, std::io::Error>(())
            })
            .unwrap();
        assert_eq!(sizes, vec![4, 4]);
    }

    #[test]
    fn test_empty_file_delivers_nothing() {
        let file = NamedTempFile::new().unwrap();
        let mut calls = 0;
        let total = ChunkedStreamer::default()
            .stream(file.path(), |_| {
                calls += 1;
                Ok::<_, std::io::Error>(())
            })
            .unwrap();
        assert_eq!(calls, 0);
        assert_eq!(total, 0);
    }

    #[test]
    fn test_missing_file_fails_to_open() {
        let result = ChunkedStreamer::default().stream(Path::new("/nonexistent/payload.bin"), |_| {
            Ok::<_, std::io::Error>(())
        });
        assert!(matches!(result, Err(StreamError::Open { .. })));
    }

    #[test]
    fn test_consumer_error_aborts_stream() {
        let streamer = ChunkedStreamer::new(2).unwrap();
        let mut calls = 0;
        let result = streamer.stream_reader(&b"aabbcc"[..], "memory", |_| {
            calls += 1;
            if calls == 2 {
                Err("sink closed")
            } else {
                Ok(())
            }
        });
        assert!(matches!(result, Err(StreamError::Consumer(_))));
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(matches!(ChunkedStreamer::new(0), Err(StreamError::InvalidChunkSize)));
        assert_eq!(ChunkedStreamer::default().chunk_size(), DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_configured_chunk_size_drives_streaming() {
        let data = payload(DEFAULT_CHUNK_SIZE / 2);
        let count_chunks = |streamer: ChunkedStreamer| {
            let mut calls = 0;
            streamer
                .stream_reader(&data[..], "memory", |_| {
                    calls += 1;
                    Ok::<_, std::io::Error>(())
                })
                .unwrap();
            calls
        };

        let configured = ChunkedStreamer::from_config(&TransferConfig { chunk_size_bytes: 4096 }).unwrap();
        assert_eq!(configured.chunk_size(), 4096);
        assert_eq!(count_chunks(configured), 64);

        let defaults = ChunkedStreamer::from_config(&TransferConfig::default()).unwrap();
        assert_eq!(count_chunks(defaults), 1);

        assert!(matches!(
            ChunkedStreamer::from_config(&TransferConfig { chunk_size_bytes: 0 }),
            Err(StreamError::InvalidChunkSize)
        ));
    }

    #[test]
    fn test_checksum_is_independent_of_chunking() {
        let data = payload(10_000);
        let mut calculator = ChecksumCalculator::new();
        ChunkedStreamer::new(333)
            .unwrap()
            .stream_reader(&data[..], "memory", |chunk| {
                calculator.update(chunk);
                Ok::<_, std::io::Error>(())
            })
            .unwrap();
        assert_eq!(calculator.finalize(), ChecksumCalculator::of_bytes(&data));
        assert_eq!(
            ChecksumCalculator::of_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
