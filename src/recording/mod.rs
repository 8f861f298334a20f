//! Chunked video recording
//!
//! Frames offered by the [`FrameBus`](crate::bus::FrameBus) land in a bounded
//! queue; a single writer thread drains it into time-bounded chunk files,
//! encoding with openh264 and muxing to MP4 with muxide.
//!
//! # Example
//! ```rust,ignore
//! use crabcctv::recording::{Recorder, RecordingConfig};
//! use std::time::Duration;
//!
//! let config = RecordingConfig::new("/var/cctv", 640, 480, 30.0)
//!     .with_chunk_duration(Duration::from_secs(600));
//! let recorder = Recorder::new(config);
//!
//! recorder.start()?;
//! // ... the capture loop publishes frames ...
//! let chunks = recorder.stop()?;
//! ```

mod chunk;
mod config;
mod encoder;
mod recorder;

pub use chunk::{chunk_path, ChunkSink, ChunkWriter, Mp4ChunkSink, Mp4ChunkWriter};
pub use config::{ChunkStats, RecorderStatus, RecordingConfig};
pub use encoder::{EncodedFrame, H264Encoder};
pub use recorder::Recorder;
