//! H.264 encoding of RGB frames using openh264

use openh264::encoder::{BitRate, Encoder, EncoderConfig, FrameRate, FrameType, RateControlMode};
use openh264::formats::YUVBuffer;
use openh264::OpenH264API;

use crate::errors::CctvError;
use crate::types::Frame;

/// H.264 encoder for one chunk.
///
/// A fresh encoder is created per chunk so that every chunk starts with an
/// IDR frame and plays on its own.
pub struct H264Encoder {
    encoder: Encoder,
    width: u32,
    height: u32,
    frames_encoded: u64,
}

impl H264Encoder {
    /// openh264 infers dimensions from the YUV source at encode time; the
    /// configured size is enforced on input instead.
    ///
    /// Rate control targets `bitrate` bits per second at `fps`. Frame
    /// skipping is off so every frame handed in reaches the chunk.
    pub fn new(width: u32, height: u32, fps: f64, bitrate: u32) -> Result<Self, CctvError> {
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(CctvError::EncodingError(format!(
                "H.264 needs non-zero even dimensions, got {}x{}",
                width, height
            )));
        }

        if bitrate == 0 || !fps.is_finite() || fps <= 0.0 {
            return Err(CctvError::EncodingError(format!(
                "H.264 needs a positive bitrate and frame rate, got {} bps at {} fps",
                bitrate, fps
            )));
        }

        let encoder_config = EncoderConfig::new()
            .bitrate(BitRate::from_bps(bitrate))
            .max_frame_rate(FrameRate::from_hz(fps as f32))
            .rate_control_mode(RateControlMode::Bitrate)
            .skip_frames(false);

        let encoder = Encoder::with_api_config(OpenH264API::from_source(), encoder_config)
            .map_err(|e| CctvError::EncodingError(format!("Failed to create encoder: {}", e)))?;

        Ok(Self {
            encoder,
            width,
            height,
            frames_encoded: 0,
        })
    }

    pub fn encode(&mut self, frame: &Frame) -> Result<EncodedFrame, CctvError> {
        if frame.width != self.width || frame.height != self.height {
            return Err(CctvError::EncodingError(format!(
                "Frame {} is {}x{}, encoder expects {}x{}",
                frame.sequence, frame.width, frame.height, self.width, self.height
            )));
        }
        frame.validate()?;

        let yuv = rgb_to_yuv420(&frame.data, self.width, self.height);
        let yuv_buffer = YUVBuffer::from_vec(yuv, self.width as usize, self.height as usize);

        let bitstream = self
            .encoder
            .encode(&yuv_buffer)
            .map_err(|e| CctvError::EncodingError(format!("Encoding failed: {}", e)))?;

        self.frames_encoded += 1;

        Ok(EncodedFrame {
            is_keyframe: matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I),
            data: bitstream.to_vec(),
        })
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }
}

/// Annex B H.264 access unit
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Vec<u8>,
    pub is_keyframe: bool,
}

/// Convert RGB24 to planar YUV 4:2:0 (BT.601, studio range)
fn rgb_to_yuv420(rgb: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;

    let y_size = w * h;
    let uv_size = (w / 2) * (h / 2);
    let mut yuv = vec![0u8; y_size + uv_size * 2];

    let (y_plane, uv_planes) = yuv.split_at_mut(y_size);
    let (u_plane, v_plane) = uv_planes.split_at_mut(uv_size);

    for (row, line) in rgb.chunks_exact(w * 3).enumerate().take(h) {
        for (col, px) in line.chunks_exact(3).enumerate() {
            let (r, g, b) = (px[0] as i32, px[1] as i32, px[2] as i32);

            let y_val = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
            y_plane[row * w + col] = y_val.clamp(0, 255) as u8;

            // chroma sampled from the top-left pixel of each 2x2 block
            if row % 2 == 0 && col % 2 == 0 {
                let uv_idx = (row / 2) * (w / 2) + (col / 2);
                let u_val = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
                let v_val = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
                u_plane[uv_idx] = u_val.clamp(0, 255) as u8;
                v_plane[uv_idx] = v_val.clamp(0, 255) as u8;
            }
        }
    }

    yuv
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_to_yuv420_size() {
        let rgb = vec![128u8; 64 * 48 * 3];
        let yuv = rgb_to_yuv420(&rgb, 64, 48);
        assert_eq!(yuv.len(), 64 * 48 * 3 / 2);
    }

    #[test]
    fn test_black_and_white_luma() {
        let black = rgb_to_yuv420(&[0u8; 2 * 2 * 3], 2, 2);
        assert_eq!(black[0], 16);
        let white = rgb_to_yuv420(&[255u8; 2 * 2 * 3], 2, 2);
        assert_eq!(white[0], 235);
    }

    #[test]
    fn test_rejects_odd_dimensions() {
        assert!(H264Encoder::new(641, 480, 30.0, 2_000_000).is_err());
        assert!(H264Encoder::new(0, 480, 30.0, 2_000_000).is_err());
    }

    #[test]
    fn test_rejects_zero_rate() {
        assert!(H264Encoder::new(320, 240, 30.0, 0).is_err());
        assert!(H264Encoder::new(320, 240, 0.0, 2_000_000).is_err());
    }

    #[test]
    fn test_first_frame_is_keyframe() {
        let mut encoder = H264Encoder::new(320, 240, 30.0, 2_000_000).expect("encoder");
        let frame = Frame::new(vec![128u8; 320 * 240 * 3], 320, 240);
        let encoded = encoder.encode(&frame).expect("encode");
        assert!(!encoded.data.is_empty());
        assert!(
            encoded.data.starts_with(&[0, 0, 0, 1]) || encoded.data.starts_with(&[0, 0, 1]),
            "should start with an Annex B start code"
        );
        assert!(encoded.is_keyframe);
        assert_eq!(encoder.frames_encoded(), 1);
    }

    #[test]
    fn test_rejects_mismatched_frame() {
        let mut encoder = H264Encoder::new(320, 240, 30.0, 2_000_000).expect("encoder");
        let frame = Frame::new(vec![0u8; 16 * 16 * 3], 16, 16);
        assert!(encoder.encode(&frame).is_err());
    }
}
