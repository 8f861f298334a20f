//! JPEG compression of frames for the live stream

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::errors::CctvError;
use crate::types::Frame;

pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Compress an RGB frame to a baseline JPEG
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, CctvError> {
    frame.validate()?;

    let quality = quality.clamp(1, 100);
    // typical camera frames compress 10-20x
    let mut out = Vec::with_capacity(frame.data.len() / 10);
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .encode(&frame.data, frame.width, frame.height, ExtendedColorType::Rgb8)
        .map_err(|e| CctvError::StreamError(format!("JPEG encoding failed: {}", e)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::synthetic_frame;
    use std::time::Duration;

    #[test]
    fn test_encode_produces_jpeg_markers() {
        let frame = synthetic_frame(1, Duration::ZERO, 64, 48);
        let jpeg = encode_jpeg(&frame, 80).unwrap();
        assert!(jpeg.starts_with(&[0xFF, 0xD8]), "missing SOI marker");
        assert!(jpeg.ends_with(&[0xFF, 0xD9]), "missing EOI marker");
    }

    #[test]
    fn test_quality_affects_size() {
        let frame = synthetic_frame(3, Duration::ZERO, 128, 96);
        let low = encode_jpeg(&frame, 10).unwrap();
        let high = encode_jpeg(&frame, 95).unwrap();
        assert!(low.len() < high.len());
    }

    #[test]
    fn test_decodes_back_to_same_size() {
        let frame = synthetic_frame(2, Duration::ZERO, 40, 30);
        let jpeg = encode_jpeg(&frame, 90).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 30));
    }

    #[test]
    fn test_rejects_malformed_frame() {
        let frame = Frame::new(vec![0u8; 5], 4, 4);
        assert!(encode_jpeg(&frame, 80).is_err());
    }
}
