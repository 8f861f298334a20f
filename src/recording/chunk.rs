//! Chunk files: naming, the sink abstraction, and the MP4 implementation

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use muxide::api::{Metadata, MuxerBuilder, VideoCodec};

use super::config::{ChunkStats, RecordingConfig};
use super::encoder::H264Encoder;
use crate::errors::CctvError;
use crate::types::Frame;

/// One open chunk file.
///
/// `finish` consumes the writer, so a chunk can be finalized at most once.
/// Dropping a writer without finishing releases its file handle but may
/// leave a truncated file.
pub trait ChunkWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), CctvError>;
    fn finish(self: Box<Self>) -> Result<ChunkStats, CctvError>;
}

/// Factory for chunk writers, shared with the recorder's writer thread.
pub trait ChunkSink: Send + Sync {
    fn open(&self, path: &Path, config: &RecordingConfig)
        -> Result<Box<dyn ChunkWriter>, CctvError>;

    /// File extension of the chunks this sink produces
    fn extension(&self) -> &str {
        "mp4"
    }
}

/// Path for a chunk created at `created`: `<dir>/YYYYmmdd_HHMMSS.<ext>`.
///
/// Chunks opened within the same second get a `_1`, `_2`, ... suffix
/// instead of overwriting each other.
pub fn chunk_path(dir: &Path, created: DateTime<Local>, extension: &str) -> PathBuf {
    let stem = created.format("%Y%m%d_%H%M%S").to_string();
    let mut candidate = dir.join(format!("{}.{}", stem, extension));
    let mut suffix = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{}_{}.{}", stem, suffix, extension));
        suffix += 1;
    }
    candidate
}

/// Sink writing H.264 in MP4 containers
#[derive(Debug, Default, Clone, Copy)]
pub struct Mp4ChunkSink;

impl ChunkSink for Mp4ChunkSink {
    fn open(
        &self,
        path: &Path,
        config: &RecordingConfig,
    ) -> Result<Box<dyn ChunkWriter>, CctvError> {
        Ok(Box::new(Mp4ChunkWriter::create(path, config)?))
    }
}

/// H.264 encoder feeding an MP4 muxer for a single chunk
pub struct Mp4ChunkWriter {
    encoder: H264Encoder,
    muxer: muxide::api::Muxer<BufWriter<File>>,
    path: PathBuf,
    first_timestamp: Option<Duration>,
    last_pts: Option<f64>,
    frame_duration_secs: f64,
    frames: u64,
}

impl Mp4ChunkWriter {
    pub fn create(path: &Path, config: &RecordingConfig) -> Result<Self, CctvError> {
        let file = File::create(path).map_err(|e| {
            CctvError::StorageError(format!("Failed to create chunk {:?}: {}", path, e))
        })?;
        let writer = BufWriter::new(file);

        let encoder = H264Encoder::new(config.width, config.height, config.fps, config.bitrate)?;

        let mut metadata = Metadata::new().with_current_time();
        if let Some(ref title) = config.title {
            metadata = metadata.with_title(title);
        }

        let muxer = MuxerBuilder::new(writer)
            .video(VideoCodec::H264, config.width, config.height, config.fps)
            .with_fast_start(config.fast_start)
            .with_metadata(metadata)
            .build()
            .map_err(|e| CctvError::MuxingError(format!("Failed to create muxer: {}", e)))?;

        Ok(Self {
            encoder,
            muxer,
            path: path.to_path_buf(),
            first_timestamp: None,
            last_pts: None,
            frame_duration_secs: if config.fps > 0.0 { 1.0 / config.fps } else { 1.0 / 30.0 },
            frames: 0,
        })
    }

    /// Presentation time relative to the chunk's first frame. The muxer
    /// needs strictly increasing timestamps; a capture timestamp that fails
    /// to advance is nudged forward by one nominal frame.
    fn pts_for(&mut self, frame: &Frame) -> f64 {
        let first = *self.first_timestamp.get_or_insert(frame.timestamp);
        let pts = frame.timestamp.saturating_sub(first).as_secs_f64();
        match self.last_pts {
            Some(last) if pts <= last => last + self.frame_duration_secs,
            _ => pts,
        }
    }
}

impl ChunkWriter for Mp4ChunkWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), CctvError> {
        let encoded = self.encoder.encode(frame)?;

        // the encoder may skip a frame under rate control
        if encoded.data.is_empty() {
            return Ok(());
        }

        let pts = self.pts_for(frame);
        self.muxer
            .write_video(pts, &encoded.data, encoded.is_keyframe)
            .map_err(|e| CctvError::MuxingError(format!("Failed to write frame: {}", e)))?;

        self.last_pts = Some(pts);
        self.frames += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<ChunkStats, CctvError> {
        let this = *self;
        let stats = this
            .muxer
            .finish_with_stats()
            .map_err(|e| CctvError::MuxingError(format!("Failed to finalize chunk: {}", e)))?;

        Ok(ChunkStats {
            path: this.path.to_string_lossy().to_string(),
            frames: stats.video_frames,
            duration_secs: stats.duration_secs,
            bytes_written: stats.bytes_written,
        })
    }
}
