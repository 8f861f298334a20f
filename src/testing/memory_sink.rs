use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::errors::CctvError;
use crate::recording::{ChunkSink, ChunkStats, ChunkWriter, RecordingConfig};
use crate::types::Frame;

/// What one in-memory chunk received
#[derive(Debug, Clone, Default)]
pub struct MemoryChunk {
    pub path: PathBuf,
    /// (sequence, timestamp) of every frame written, in write order
    pub frames: Vec<(u64, Duration)>,
    pub finalized: bool,
}

impl MemoryChunk {
    pub fn sequences(&self) -> Vec<u64> {
        self.frames.iter().map(|(seq, _)| *seq).collect()
    }

    /// Time between the first and last frame of the chunk
    pub fn span(&self) -> Duration {
        match (self.frames.first(), self.frames.last()) {
            (Some((_, first)), Some((_, last))) => last.saturating_sub(*first),
            _ => Duration::ZERO,
        }
    }
}

#[derive(Debug, Default)]
struct SinkState {
    chunks: Vec<MemoryChunk>,
    open_writers: usize,
    fail_opens: u32,
    fail_writes: u32,
    write_delay: Duration,
}

/// Chunk sink keeping everything in memory, with failure injection
#[derive(Debug, Clone, Default)]
pub struct MemoryChunkSink {
    state: Arc<Mutex<SinkState>>,
}

fn lock(state: &Mutex<SinkState>) -> MutexGuard<'_, SinkState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryChunkSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every chunk opened so far
    pub fn chunks(&self) -> Vec<MemoryChunk> {
        lock(&self.state).chunks.clone()
    }

    /// Writers opened and not yet finished or dropped
    pub fn open_writers(&self) -> usize {
        lock(&self.state).open_writers
    }

    /// Make the next `count` opens fail
    pub fn fail_next_opens(&self, count: u32) {
        lock(&self.state).fail_opens = count;
    }

    /// Make the next `count` frame writes fail
    pub fn fail_next_writes(&self, count: u32) {
        lock(&self.state).fail_writes = count;
    }

    /// Sleep this long on every write, to simulate a slow disk
    pub fn set_write_delay(&self, delay: Duration) {
        lock(&self.state).write_delay = delay;
    }
}

impl ChunkSink for MemoryChunkSink {
    fn open(
        &self,
        path: &Path,
        _config: &RecordingConfig,
    ) -> Result<Box<dyn ChunkWriter>, CctvError> {
        let mut state = lock(&self.state);
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(CctvError::StorageError(format!(
                "injected open failure for {}",
                path.display()
            )));
        }

        state.chunks.push(MemoryChunk {
            path: path.to_path_buf(),
            ..MemoryChunk::default()
        });
        state.open_writers += 1;

        Ok(Box::new(MemoryChunkWriter {
            state: self.state.clone(),
            index: state.chunks.len() - 1,
            closed: false,
        }))
    }

    fn extension(&self) -> &str {
        "mem"
    }
}

struct MemoryChunkWriter {
    state: Arc<Mutex<SinkState>>,
    index: usize,
    closed: bool,
}

impl ChunkWriter for MemoryChunkWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), CctvError> {
        let delay = {
            let mut state = lock(&self.state);
            if state.fail_writes > 0 {
                state.fail_writes -= 1;
                return Err(CctvError::StorageError("injected write failure".to_string()));
            }
            state.chunks[self.index]
                .frames
                .push((frame.sequence, frame.timestamp));
            state.write_delay
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<ChunkStats, CctvError> {
        let mut state = lock(&self.state);
        state.open_writers -= 1;
        let chunk = &mut state.chunks[self.index];
        chunk.finalized = true;
        let stats = ChunkStats {
            path: chunk.path.to_string_lossy().to_string(),
            frames: chunk.frames.len() as u64,
            duration_secs: chunk.span().as_secs_f64(),
            bytes_written: 0,
        };
        drop(state);
        self.closed = true;
        Ok(stats)
    }
}

impl Drop for MemoryChunkWriter {
    fn drop(&mut self) {
        if !self.closed {
            lock(&self.state).open_writers -= 1;
        }
    }
}
