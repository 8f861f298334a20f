//! Moving test pattern source, usable without camera hardware

use super::FrameSource;
use crate::errors::CctvError;
use crate::types::{Frame, RGB_BYTES_PER_PIXEL};

/// Generates a diagonal gradient that shifts every frame, plus a bright bar
/// sweeping left to right, so both the JPEG stream and the H.264 encoder see
/// temporal change.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    frame_number: u64,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_number: 0,
        }
    }

    /// Render frame `frame_number` of the pattern without advancing the source
    pub fn render(frame_number: u64, width: u32, height: u32) -> Vec<u8> {
        let w = width as usize;
        let h = height as usize;
        let mut data = vec![0u8; w * h * RGB_BYTES_PER_PIXEL];

        let base = (frame_number % 256) as u8;
        let bar_x = if w > 0 { (frame_number as usize * 4) % w } else { 0 };

        for y in 0..h {
            for x in 0..w {
                let idx = (y * w + x) * RGB_BYTES_PER_PIXEL;
                if x.abs_diff(bar_x) < 4 {
                    data[idx..idx + 3].copy_from_slice(&[255, 255, 255]);
                    continue;
                }
                data[idx] = base.wrapping_add((x % 256) as u8);
                data[idx + 1] = base.wrapping_add((y % 256) as u8);
                data[idx + 2] = base.wrapping_add(((x + y) % 256) as u8);
            }
        }

        data
    }
}

impl FrameSource for SyntheticSource {
    fn capture(&mut self) -> Result<Frame, CctvError> {
        let data = Self::render(self.frame_number, self.width, self.height);
        self.frame_number += 1;
        Ok(Frame::new(data, self.width, self.height))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}
