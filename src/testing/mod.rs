//! Testing utilities for CrabCCTV
//!
//! Synthetic frames with controlled timestamps, and an in-memory chunk sink
//! that records what the writer did without touching the disk.

mod memory_sink;

pub use memory_sink::{MemoryChunk, MemoryChunkSink};

use std::time::Duration;

use crate::source::SyntheticSource;
use crate::types::Frame;

/// Frame `sequence` of the synthetic pattern, stamped with `timestamp`
pub fn synthetic_frame(sequence: u64, timestamp: Duration, width: u32, height: u32) -> Frame {
    Frame::new(SyntheticSource::render(sequence, width, height), width, height)
        .stamped(sequence, timestamp)
}

/// `count` frames at `fps`, sequences from 1 and timestamps from zero.
///
/// Timestamps are computed in integer nanoseconds, so frame `n * fps + 1`
/// lands exactly on second `n`.
pub fn frame_run(count: u64, fps: u64, width: u32, height: u32) -> Vec<Frame> {
    (0..count)
        .map(|i| {
            let timestamp = Duration::from_nanos(i * 1_000_000_000 / fps.max(1));
            Frame::new(vec![(i % 256) as u8; Frame::expected_len(width, height)], width, height)
                .stamped(i + 1, timestamp)
        })
        .collect()
}
