//! Recorder: bounded ingress queue, writer thread and chunk rotation

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use chrono::Local;
use crossbeam_channel::{Receiver, Sender, TrySendError};

use super::chunk::{chunk_path, ChunkSink, ChunkWriter, Mp4ChunkSink};
use super::config::{ChunkStats, RecorderStatus, RecordingConfig};
use crate::errors::CctvError;
use crate::types::Frame;

/// Persists frames into time-bounded chunk files while recording is active.
///
/// Cloning is cheap; all clones control the same recording session. The
/// chunk writer is owned by the writer thread alone, so nothing else can
/// touch the open file.
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<RecorderInner>,
}

struct RecorderInner {
    config: RecordingConfig,
    sink: Arc<dyn ChunkSink>,
    /// Serializes start/stop so a draining writer never overlaps a new one
    lifecycle: Mutex<()>,
    /// Held only for O(1) work; the capture path takes it on every frame
    state: Mutex<RecorderState>,
    counters: Arc<Counters>,
}

enum RecorderState {
    Idle,
    Active {
        queue: Sender<Frame>,
        writer: JoinHandle<WriterReport>,
    },
}

#[derive(Default)]
struct Counters {
    sessions: AtomicU64,
    enqueued: AtomicU64,
    dropped: AtomicU64,
    written: AtomicU64,
    chunks_finalized: AtomicU64,
    storage_failures: AtomicU64,
    current_chunk: Mutex<Option<PathBuf>>,
}

impl Counters {
    fn set_current_chunk(&self, path: Option<PathBuf>) {
        *lock(&self.current_chunk) = path;
    }
}

/// What a writer thread leaves behind
#[derive(Debug, Default)]
struct WriterReport {
    chunks: Vec<ChunkStats>,
    gave_up: Option<String>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Recorder {
    /// Recorder writing H.264/MP4 chunks
    pub fn new(config: RecordingConfig) -> Self {
        Self::with_sink(config, Arc::new(Mp4ChunkSink))
    }

    pub fn with_sink(config: RecordingConfig, sink: Arc<dyn ChunkSink>) -> Self {
        Self {
            inner: Arc::new(RecorderInner {
                config,
                sink,
                lifecycle: Mutex::new(()),
                state: Mutex::new(RecorderState::Idle),
                counters: Arc::new(Counters::default()),
            }),
        }
    }

    pub fn config(&self) -> &RecordingConfig {
        &self.inner.config
    }

    /// Begin recording. A no-op when already active.
    pub fn start(&self) -> Result<(), CctvError> {
        let _lifecycle = lock(&self.inner.lifecycle);
        let mut state = lock(&self.inner.state);

        if let RecorderState::Active { writer, .. } = &*state {
            if !writer.is_finished() {
                log::debug!("Recording already active");
                return Ok(());
            }
        }
        // A writer that gave up on storage leaves a stale Active entry
        if let RecorderState::Active { writer, .. } =
            std::mem::replace(&mut *state, RecorderState::Idle)
        {
            reap(writer);
        }

        let (tx, rx) = crossbeam_channel::bounded(self.inner.config.queue_capacity);
        let session = self.inner.counters.sessions.fetch_add(1, Ordering::Relaxed) + 1;
        let writer = ChunkWriterLoop {
            config: self.inner.config.clone(),
            sink: self.inner.sink.clone(),
            counters: self.inner.counters.clone(),
        };

        let handle = std::thread::Builder::new()
            .name("crabcctv-recorder".to_string())
            .spawn(move || writer.run(rx))
            .map_err(|e| CctvError::StorageError(format!("Failed to spawn recorder: {}", e)))?;

        *state = RecorderState::Active {
            queue: tx,
            writer: handle,
        };

        log::info!(
            "Recording started (session {}, chunk length {:?}, queue {})",
            session,
            self.inner.config.chunk_duration,
            self.inner.config.queue_capacity
        );
        Ok(())
    }

    /// Stop recording. Frames already queued are written, the open chunk is
    /// finalized, and the chunks of this session are returned. A no-op
    /// returning no chunks when idle.
    pub fn stop(&self) -> Result<Vec<ChunkStats>, CctvError> {
        self.inner.stop()
    }

    /// Offer a frame to the ingress queue without blocking.
    ///
    /// Returns `false` when the frame was not queued: recording is idle, the
    /// queue is full (the new frame is dropped, queued frames are kept), or
    /// the writer has given up after repeated storage failures.
    pub fn enqueue(&self, frame: Frame) -> bool {
        let mut state = lock(&self.inner.state);
        let queue = match &*state {
            RecorderState::Idle => return false,
            RecorderState::Active { queue, .. } => queue,
        };

        match queue.try_send(frame) {
            Ok(()) => {
                self.inner.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(frame)) => {
                let dropped = self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::debug!(
                    "Recorder queue full, dropping frame {} ({} dropped so far)",
                    frame.sequence,
                    dropped
                );
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                log::warn!("Recording writer has stopped; recording is now idle");
                if let RecorderState::Active { writer, .. } =
                    std::mem::replace(&mut *state, RecorderState::Idle)
                {
                    // the receiver is gone, so the thread is exiting
                    drop(writer);
                }
                false
            }
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(
            &*lock(&self.inner.state),
            RecorderState::Active { writer, .. } if !writer.is_finished()
        )
    }

    /// Frames currently waiting for the writer
    pub fn queue_len(&self) -> usize {
        match &*lock(&self.inner.state) {
            RecorderState::Active { queue, .. } => queue.len(),
            RecorderState::Idle => 0,
        }
    }

    pub fn status(&self) -> RecorderStatus {
        let counters = &self.inner.counters;
        RecorderStatus {
            active: self.is_active(),
            queued: self.queue_len(),
            frames_enqueued: counters.enqueued.load(Ordering::Relaxed),
            frames_dropped: counters.dropped.load(Ordering::Relaxed),
            frames_written: counters.written.load(Ordering::Relaxed),
            chunks_finalized: counters.chunks_finalized.load(Ordering::Relaxed),
            storage_failures: counters.storage_failures.load(Ordering::Relaxed),
            current_chunk: lock(&counters.current_chunk)
                .as_ref()
                .map(|p| p.to_string_lossy().to_string()),
        }
    }
}

impl RecorderInner {
    fn stop(&self) -> Result<Vec<ChunkStats>, CctvError> {
        let _lifecycle = lock(&self.lifecycle);

        // Release the state lock before joining so the capture path never
        // waits on a draining writer.
        let previous = std::mem::replace(&mut *lock(&self.state), RecorderState::Idle);
        let writer = match previous {
            RecorderState::Idle => return Ok(Vec::new()),
            RecorderState::Active { queue, writer } => {
                drop(queue);
                writer
            }
        };

        let report = writer
            .join()
            .map_err(|_| CctvError::StorageError("recording writer panicked".to_string()))?;
        self.counters.set_current_chunk(None);

        log::info!("Recording stopped ({} chunk(s) finalized)", report.chunks.len());
        Ok(report.chunks)
    }
}

impl Drop for RecorderInner {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("Error stopping recorder on drop: {}", e);
        }
    }
}

fn reap(writer: JoinHandle<WriterReport>) {
    match writer.join() {
        Ok(report) => {
            if let Some(reason) = report.gave_up {
                log::info!("Previous recording session ended early: {}", reason);
            }
        }
        Err(_) => log::warn!("Previous recording writer panicked"),
    }
}

/// An open chunk and the capture time its coverage starts at
struct OpenChunk {
    writer: Box<dyn ChunkWriter>,
    path: PathBuf,
    start: std::time::Duration,
    frames: u64,
}

/// Body of the writer thread: the single consumer of the ingress queue
struct ChunkWriterLoop {
    config: RecordingConfig,
    sink: Arc<dyn ChunkSink>,
    counters: Arc<Counters>,
}

impl ChunkWriterLoop {
    fn run(self, queue: Receiver<Frame>) -> WriterReport {
        let mut report = WriterReport::default();
        let mut current: Option<OpenChunk> = None;
        let mut consecutive_failures = 0u32;

        // Ends once the sender is dropped and every queued frame is consumed
        for frame in queue.iter() {
            match self.handle_frame(&mut current, &frame, &mut report) {
                Ok(()) => consecutive_failures = 0,
                Err(e) => {
                    consecutive_failures += 1;
                    self.counters.storage_failures.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "Failed to record frame {} ({}/{}): {}",
                        frame.sequence,
                        consecutive_failures,
                        self.config.max_storage_failures,
                        e
                    );
                    if consecutive_failures >= self.config.max_storage_failures {
                        log::error!("Giving up on recording after repeated storage failures");
                        report.gave_up = Some(e.to_string());
                        break;
                    }
                }
            }
        }

        if let Some(chunk) = current.take() {
            self.finalize(chunk, &mut report);
        }
        self.counters.set_current_chunk(None);
        report
    }

    fn handle_frame(
        &self,
        current: &mut Option<OpenChunk>,
        frame: &Frame,
        report: &mut WriterReport,
    ) -> Result<(), CctvError> {
        let expired = current.as_ref().is_some_and(|chunk| {
            frame.timestamp.saturating_sub(chunk.start) >= self.config.chunk_duration
        });
        if expired {
            if let Some(chunk) = current.take() {
                self.finalize(chunk, report);
            }
        }

        let mut chunk = match current.take() {
            Some(chunk) => chunk,
            None => self.open_chunk(frame)?,
        };

        if let Err(e) = chunk.writer.write_frame(frame) {
            // Salvage what this chunk already holds; the next frame opens a
            // fresh one.
            self.finalize(chunk, report);
            return Err(e);
        }

        chunk.frames += 1;
        *current = Some(chunk);
        self.counters.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn open_chunk(&self, frame: &Frame) -> Result<OpenChunk, CctvError> {
        let path = chunk_path(&self.config.output_dir, Local::now(), self.sink.extension());
        let writer = self.sink.open(&path, &self.config)?;
        log::info!("Recording chunk started: {}", path.display());
        self.counters.set_current_chunk(Some(path.clone()));
        Ok(OpenChunk {
            writer,
            path,
            start: frame.timestamp,
            frames: 0,
        })
    }

    fn finalize(&self, chunk: OpenChunk, report: &mut WriterReport) {
        let OpenChunk {
            writer,
            path,
            frames,
            ..
        } = chunk;
        self.counters.set_current_chunk(None);

        match writer.finish() {
            Ok(stats) => {
                log::info!(
                    "Recording chunk finalized: {} ({} frames, {:.1}s, {} bytes)",
                    path.display(),
                    frames,
                    stats.duration_secs,
                    stats.bytes_written
                );
                self.counters.chunks_finalized.fetch_add(1, Ordering::Relaxed);
                report.chunks.push(stats);
            }
            Err(e) => {
                self.counters.storage_failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("Failed to finalize chunk {}: {}", path.display(), e);
            }
        }
    }
}
