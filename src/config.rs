//! Configuration management for CrabCCTV
//!
//! Everything is fixed at startup: the TOML file is read once, validated, and
//! handed to each component at construction.

use crate::errors::CctvError;
use crate::types::FrameFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CctvConfig {
    pub camera: CameraConfig,
    pub recording: RecordingSettings,
    pub stream: StreamSettings,
}

/// Capture source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Frame resolution [width, height]
    pub resolution: [u32; 2],
    /// Target capture rate
    pub fps: u32,
    /// Camera index; ignored by the synthetic source
    pub device_index: u32,
    /// Use the synthetic test pattern instead of a camera
    pub synthetic: bool,
    /// Consecutive capture failures tolerated before the capture loop gives up
    pub max_capture_failures: u32,
}

/// Chunked recording configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    /// Directory receiving the chunk files
    pub output_directory: String,
    /// Length of one chunk in seconds
    pub chunk_duration_secs: u64,
    /// Capacity of the recorder ingress queue
    pub queue_capacity: usize,
    /// Target H.264 bitrate in bits per second
    pub bitrate: u32,
    /// Write the moov atom first so chunks play while downloading
    pub fast_start: bool,
    /// Consecutive storage failures before recording stops itself
    pub max_storage_failures: u32,
}

/// Live stream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Address the HTTP server binds to
    pub bind_address: String,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
    /// Frames buffered per viewer before it is considered stalled
    pub subscriber_buffer: usize,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            resolution: [640, 480],
            fps: 30,
            device_index: 0,
            synthetic: false,
            max_capture_failures: 30,
        }
    }
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            output_directory: "./cctv_recordings".to_string(),
            chunk_duration_secs: 600,
            queue_capacity: 30,
            bitrate: 2_000_000,
            fast_start: true,
            max_storage_failures: 5,
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5000".to_string(),
            jpeg_quality: 80,
            subscriber_buffer: 8,
        }
    }
}

impl Default for CctvConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            recording: RecordingSettings::default(),
            stream: StreamSettings::default(),
        }
    }
}

impl CctvConfig {
    /// Load configuration from TOML file, falling back to defaults when the
    /// file does not exist
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CctvError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| CctvError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: CctvConfig = toml::from_str(&contents)
            .map_err(|e| CctvError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CctvError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    CctvError::ConfigError(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| CctvError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| CctvError::ConfigError(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from("crabcctv.toml")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), CctvError> {
        let invalid =
            |msg: &str| -> Result<(), CctvError> { Err(CctvError::ConfigError(msg.to_string())) };

        if self.camera.resolution[0] == 0 || self.camera.resolution[1] == 0 {
            return invalid("Invalid resolution");
        }
        // 4:2:0 chroma subsampling needs even dimensions
        if self.camera.resolution[0] % 2 != 0 || self.camera.resolution[1] % 2 != 0 {
            return invalid("Resolution must have even width and height");
        }
        if self.camera.fps == 0 || self.camera.fps > 240 {
            return invalid("Invalid FPS (must be 1-240)");
        }

        if self.recording.output_directory.trim().is_empty() {
            return invalid("Output directory must not be empty");
        }
        if self.recording.chunk_duration_secs == 0 {
            return invalid("Chunk duration must be at least one second");
        }
        if self.recording.queue_capacity == 0 {
            return invalid("Recorder queue capacity must be at least 1");
        }
        if self.recording.bitrate == 0 {
            return invalid("Bitrate must be positive");
        }
        if self.recording.max_storage_failures == 0 {
            return invalid("max_storage_failures must be at least 1");
        }

        if self.stream.jpeg_quality == 0 || self.stream.jpeg_quality > 100 {
            return invalid("JPEG quality must be between 1 and 100");
        }
        if self.stream.subscriber_buffer == 0 {
            return invalid("Subscriber buffer must be at least 1");
        }
        self.bind_address()?;

        Ok(())
    }

    pub fn bind_address(&self) -> Result<SocketAddr, CctvError> {
        self.stream.bind_address.parse().map_err(|e| {
            CctvError::ConfigError(format!(
                "Invalid bind address {:?}: {}",
                self.stream.bind_address, e
            ))
        })
    }

    pub fn frame_format(&self) -> FrameFormat {
        FrameFormat::new(
            self.camera.resolution[0],
            self.camera.resolution[1],
            self.camera.fps as f64,
        )
    }

    pub fn chunk_duration(&self) -> Duration {
        Duration::from_secs(self.recording.chunk_duration_secs)
    }

    pub fn output_directory(&self) -> PathBuf {
        PathBuf::from(&self.recording.output_directory)
    }

    /// Create the recording directory if needed and check it is a directory
    pub fn prepare_output_dir(&self) -> Result<PathBuf, CctvError> {
        let dir = self.output_directory();
        fs::create_dir_all(&dir).map_err(|e| {
            CctvError::ConfigError(format!("Failed to create output directory {:?}: {}", dir, e))
        })?;
        if !dir.is_dir() {
            return Err(CctvError::ConfigError(format!(
                "Output path {:?} is not a directory",
                dir
            )));
        }
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = CctvConfig::default();
        assert_eq!(config.camera.resolution, [640, 480]);
        assert_eq!(config.camera.fps, 30);
        assert_eq!(config.recording.chunk_duration_secs, 600);
        assert_eq!(config.recording.queue_capacity, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut bad = CctvConfig::default();
        bad.camera.resolution = [0, 480];
        assert!(bad.validate().is_err());

        let mut odd = CctvConfig::default();
        odd.camera.resolution = [641, 480];
        assert!(odd.validate().is_err());

        let mut no_chunk = CctvConfig::default();
        no_chunk.recording.chunk_duration_secs = 0;
        assert!(matches!(no_chunk.validate(), Err(CctvError::ConfigError(_))));

        let mut no_queue = CctvConfig::default();
        no_queue.recording.queue_capacity = 0;
        assert!(no_queue.validate().is_err());

        let mut bad_bind = CctvConfig::default();
        bad_bind.stream.bind_address = "not-an-address".to_string();
        assert!(bad_bind.validate().is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("crabcctv.toml");

        let mut config = CctvConfig::default();
        config.recording.chunk_duration_secs = 10;
        config.save_to_file(&config_path).unwrap();

        let loaded = CctvConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.recording.chunk_duration_secs, 10);
        assert_eq!(loaded.stream.jpeg_quality, config.stream.jpeg_quality);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("partial.toml");
        fs::write(&config_path, "[recording]\nchunk_duration_secs = 60\n").unwrap();

        let loaded = CctvConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.recording.chunk_duration_secs, 60);
        assert_eq!(loaded.recording.queue_capacity, 30);
        assert_eq!(loaded.camera.fps, 30);
    }

    #[test]
    fn test_config_toml_format() {
        let toml_string = toml::to_string_pretty(&CctvConfig::default()).unwrap();
        assert!(toml_string.contains("[camera]"));
        assert!(toml_string.contains("[recording]"));
        assert!(toml_string.contains("[stream]"));
        assert!(toml_string.contains("chunk_duration_secs"));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = CctvConfig::load_from_file("nonexistent_crabcctv.toml");
        assert_eq!(result.unwrap().camera.fps, 30);
    }

    #[test]
    fn test_prepare_output_dir() {
        let dir = tempdir().unwrap();
        let mut config = CctvConfig::default();
        config.recording.output_directory =
            dir.path().join("nested/recordings").to_string_lossy().to_string();
        let created = config.prepare_output_dir().unwrap();
        assert!(created.is_dir());

        let file_path = dir.path().join("plain_file");
        fs::write(&file_path, b"x").unwrap();
        config.recording.output_directory = file_path.to_string_lossy().to_string();
        assert!(config.prepare_output_dir().is_err());
    }
}
