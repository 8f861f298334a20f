//! CrabCCTV: single-camera CCTV server
//!
//! Frames from one capture source are fanned out to any number of live MJPEG
//! viewers and, while recording is on, persisted as time-bounded MP4 chunks.
//!
//! # Features
//! - Live `multipart/x-mixed-replace` MJPEG stream per viewer
//! - Chunked H.264/MP4 recording with time-based rotation
//! - Bounded queues everywhere: a slow viewer or a slow disk never stalls capture
//! - Synthetic test pattern source, camera capture behind the `camera` feature
//!
//! # Usage
//! ```rust,ignore
//! use crabcctv::{CaptureHandle, CctvConfig, FrameBus, Recorder, RecordingConfig};
//! use crabcctv::source::SyntheticSource;
//!
//! let config = CctvConfig::default();
//! let recorder = Recorder::new(RecordingConfig::from_settings(&config));
//! let bus = FrameBus::new(config.stream.subscriber_buffer, Some(recorder.clone()));
//! let format = config.frame_format();
//! let capture = CaptureHandle::spawn(
//!     move || Ok(SyntheticSource::new(format.width, format.height)),
//!     format,
//!     config.camera.max_capture_failures,
//!     bus.clone(),
//! )?;
//! ```
pub mod bus;
pub mod capture;
pub mod config;
pub mod errors;
pub mod recording;
pub mod server;
pub mod source;
pub mod stream;
pub mod timing;
pub mod types;

// Testing utilities - synthetic frames and an in-memory chunk sink
pub mod testing;

// Re-exports for convenience
pub use bus::{FrameBus, PublishReport, Subscription};
pub use capture::CaptureHandle;
pub use config::CctvConfig;
pub use errors::CctvError;
pub use recording::{ChunkStats, Recorder, RecorderStatus, RecordingConfig};
pub use server::{router, serve, AppState, StatusReport};
pub use source::FrameSource;
pub use stream::StreamSession;
pub use types::{Frame, FrameFormat};

/// Initialize logging for the server
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabcctv=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
