//! Frame sources feeding the capture loop
//!
//! A source only produces pixels; sequence numbers and timestamps are stamped
//! by the capture loop so that every source shares the same timebase.

#[cfg(feature = "camera")]
mod camera;
mod synthetic;

#[cfg(feature = "camera")]
pub use camera::CameraSource;
pub use synthetic::SyntheticSource;

use crate::errors::CctvError;
use crate::types::Frame;

/// Something that can be asked for one frame at a time.
///
/// `capture` may block briefly (waiting on the device) but must not block
/// indefinitely. Errors are treated as retryable by the capture loop up to
/// its configured failure limit.
pub trait FrameSource {
    fn capture(&mut self) -> Result<Frame, CctvError>;

    /// Resolution of the frames this source produces
    fn resolution(&self) -> (u32, u32);

    /// Human readable name used in logs
    fn name(&self) -> &str {
        "source"
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn capture(&mut self) -> Result<Frame, CctvError> {
        (**self).capture()
    }

    fn resolution(&self) -> (u32, u32) {
        (**self).resolution()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
