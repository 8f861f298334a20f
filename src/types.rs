//! Core frame type shared by the capture, streaming and recording paths

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::CctvError;

/// Bytes per pixel of the RGB24 layout every frame uses.
pub const RGB_BYTES_PER_PIXEL: usize = 3;

/// One captured RGB24 image.
///
/// Pixel data lives in an immutable `Bytes` buffer, so handing a frame to
/// several consumers clones a reference count rather than the pixels, and no
/// consumer can mutate what another one sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Capture order, starting at 1
    pub sequence: u64,
    /// Time since the capture clock started
    pub timestamp: Duration,
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

impl Frame {
    /// Wrap raw RGB24 pixels. Sequence and timestamp are assigned by the
    /// capture loop through [`Frame::stamped`].
    pub fn new(data: impl Into<Bytes>, width: u32, height: u32) -> Self {
        Self {
            sequence: 0,
            timestamp: Duration::ZERO,
            width,
            height,
            data: data.into(),
        }
    }

    pub fn stamped(mut self, sequence: u64, timestamp: Duration) -> Self {
        self.sequence = sequence;
        self.timestamp = timestamp;
        self
    }

    /// Number of bytes an RGB24 frame of this size must carry.
    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * RGB_BYTES_PER_PIXEL
    }

    pub fn validate(&self) -> Result<(), CctvError> {
        if self.width == 0 || self.height == 0 {
            return Err(CctvError::CaptureError(format!(
                "frame {} has empty dimensions {}x{}",
                self.sequence, self.width, self.height
            )));
        }
        let expected = Self::expected_len(self.width, self.height);
        if self.data.len() != expected {
            return Err(CctvError::CaptureError(format!(
                "frame {} carries {} bytes, expected {} for {}x{} RGB",
                self.sequence,
                self.data.len(),
                expected,
                self.width,
                self.height
            )));
        }
        Ok(())
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Frame dimensions and rate requested from a source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameFormat {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl FrameFormat {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self { width, height, fps }
    }

    /// 640x480 at 30fps, the classic single-board camera setup.
    pub fn vga() -> Self {
        Self::new(640, 480, 30.0)
    }

    /// Interval between frames at the target rate.
    pub fn frame_interval(&self) -> Duration {
        if self.fps > 0.0 {
            Duration::from_secs_f64(1.0 / self.fps)
        } else {
            Duration::ZERO
        }
    }
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self::vga()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_validation() {
        let frame = Frame::new(vec![0u8; 4 * 2 * 3], 4, 2);
        assert!(frame.validate().is_ok());

        let short = Frame::new(vec![0u8; 10], 4, 2);
        assert!(short.validate().is_err());

        let empty = Frame::new(Vec::new(), 0, 0);
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_stamped_keeps_pixels() {
        let frame = Frame::new(vec![7u8; 12], 2, 2).stamped(5, Duration::from_millis(166));
        assert_eq!(frame.sequence, 5);
        assert_eq!(frame.timestamp, Duration::from_millis(166));
        assert_eq!(frame.data.len(), 12);
    }

    #[test]
    fn test_clone_shares_buffer() {
        let frame = Frame::new(vec![1u8; 12], 2, 2);
        let copy = frame.clone();
        assert_eq!(frame.data.as_ptr(), copy.data.as_ptr());
    }

    #[test]
    fn test_frame_interval() {
        let format = FrameFormat::vga();
        let interval = format.frame_interval();
        assert!(interval > Duration::from_millis(33) && interval < Duration::from_millis(34));
        assert_eq!(FrameFormat::new(1, 1, 0.0).frame_interval(), Duration::ZERO);
    }
}
