//! Recording configuration and reporting types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::CctvConfig;

/// Configuration for chunked video recording
#[derive(Debug, Clone)]
pub struct RecordingConfig {
    /// Directory receiving the chunk files
    pub output_dir: PathBuf,
    /// Video width in pixels
    pub width: u32,
    /// Video height in pixels
    pub height: u32,
    /// Nominal frames per second written into the container
    pub fps: f64,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    /// Enable fast-start for web playback (moov before mdat)
    pub fast_start: bool,
    /// Optional title metadata
    pub title: Option<String>,
    /// Maximum time span covered by one chunk
    pub chunk_duration: Duration,
    /// Capacity of the ingress queue between the bus and the writer
    pub queue_capacity: usize,
    /// Consecutive storage failures before the writer gives up
    pub max_storage_failures: u32,
}

impl RecordingConfig {
    pub fn new(output_dir: impl Into<PathBuf>, width: u32, height: u32, fps: f64) -> Self {
        Self {
            output_dir: output_dir.into(),
            width,
            height,
            fps,
            bitrate: 2_000_000,
            fast_start: true,
            title: None,
            chunk_duration: Duration::from_secs(600),
            queue_capacity: 30,
            max_storage_failures: 5,
        }
    }

    /// Derive the recording configuration from the application config
    pub fn from_settings(config: &CctvConfig) -> Self {
        let format = config.frame_format();
        Self::new(config.output_directory(), format.width, format.height, format.fps)
            .with_bitrate(config.recording.bitrate)
            .with_fast_start(config.recording.fast_start)
            .with_chunk_duration(config.chunk_duration())
            .with_queue_capacity(config.recording.queue_capacity)
            .with_max_storage_failures(config.recording.max_storage_failures)
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_fast_start(mut self, enabled: bool) -> Self {
        self.fast_start = enabled;
        self
    }

    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn with_chunk_duration(mut self, duration: Duration) -> Self {
        self.chunk_duration = duration;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_max_storage_failures(mut self, failures: u32) -> Self {
        self.max_storage_failures = failures.max(1);
        self
    }
}

/// Statistics returned after finalizing one chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkStats {
    /// Chunk file path
    pub path: String,
    /// Video frames written
    pub frames: u64,
    /// Media duration in seconds
    pub duration_secs: f64,
    /// Bytes written to the file
    pub bytes_written: u64,
}

impl ChunkStats {
    /// Average bitrate achieved
    pub fn avg_bitrate(&self) -> f64 {
        if self.duration_secs > 0.0 {
            (self.bytes_written as f64 * 8.0) / self.duration_secs
        } else {
            0.0
        }
    }
}

/// Snapshot of the recorder for status reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecorderStatus {
    pub active: bool,
    /// Frames currently waiting in the ingress queue
    pub queued: usize,
    pub frames_enqueued: u64,
    /// Frames dropped because the ingress queue was full
    pub frames_dropped: u64,
    pub frames_written: u64,
    pub chunks_finalized: u64,
    pub storage_failures: u64,
    pub current_chunk: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings() {
        let mut app = CctvConfig::default();
        app.recording.chunk_duration_secs = 10;
        app.recording.queue_capacity = 12;
        app.camera.resolution = [320, 240];

        let config = RecordingConfig::from_settings(&app);
        assert_eq!(config.width, 320);
        assert_eq!(config.height, 240);
        assert_eq!(config.fps, 30.0);
        assert_eq!(config.chunk_duration, Duration::from_secs(10));
        assert_eq!(config.queue_capacity, 12);
    }

    #[test]
    fn test_builder_clamps() {
        let config = RecordingConfig::new("/tmp", 16, 16, 30.0)
            .with_queue_capacity(0)
            .with_max_storage_failures(0);
        assert_eq!(config.queue_capacity, 1);
        assert_eq!(config.max_storage_failures, 1);
    }

    #[test]
    fn test_avg_bitrate() {
        let stats = ChunkStats {
            path: "a.mp4".to_string(),
            frames: 30,
            duration_secs: 2.0,
            bytes_written: 1000,
        };
        assert_eq!(stats.avg_bitrate(), 4000.0);
    }
}
