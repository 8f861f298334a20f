//! Camera source backed by nokhwa (V4L2 on Linux)

use nokhwa::{
    pixel_format::RgbFormat,
    utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution},
    Camera,
};

use super::FrameSource;
use crate::errors::CctvError;
use crate::types::{Frame, FrameFormat as TargetFormat};

/// Physical camera opened through nokhwa.
///
/// The camera handle is not `Send` on every backend, so this source must be
/// created on the thread that captures from it; see
/// [`CaptureHandle::spawn`](crate::capture::CaptureHandle::spawn).
pub struct CameraSource {
    camera: Camera,
    target: TargetFormat,
    name: String,
}

impl CameraSource {
    pub fn open(device_index: u32, target: TargetFormat) -> Result<Self, CctvError> {
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
            CameraFormat::new(
                Resolution::new(target.width, target.height),
                FrameFormat::MJPEG,
                target.fps.round() as u32,
            ),
        ));

        let mut camera = Camera::new(CameraIndex::Index(device_index), requested).map_err(|e| {
            CctvError::CaptureError(format!("Failed to initialize camera {}: {}", device_index, e))
        })?;

        camera
            .open_stream()
            .map_err(|e| CctvError::CaptureError(format!("Failed to start stream: {}", e)))?;

        let name = camera.info().human_name();
        log::info!(
            "Opened camera {} ({}) at {:?}",
            device_index,
            name,
            camera.camera_format()
        );

        Ok(Self {
            camera,
            target,
            name,
        })
    }
}

impl FrameSource for CameraSource {
    fn capture(&mut self) -> Result<Frame, CctvError> {
        let buffer = self
            .camera
            .frame()
            .map_err(|e| CctvError::CaptureError(format!("Failed to capture frame: {}", e)))?;

        let decoded = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| CctvError::CaptureError(format!("Failed to decode frame: {}", e)))?;
        let (width, height) = (decoded.width(), decoded.height());
        let raw = decoded.into_raw();

        if (width, height) == (self.target.width, self.target.height) {
            return Ok(Frame::new(raw, width, height));
        }

        // Devices may ignore the requested resolution; the recorder needs a
        // fixed frame size, so rescale here.
        let img = image::RgbImage::from_raw(width, height, raw).ok_or_else(|| {
            CctvError::CaptureError("Camera buffer does not match its resolution".to_string())
        })?;
        let resized = image::imageops::resize(
            &img,
            self.target.width,
            self.target.height,
            image::imageops::FilterType::Triangle,
        );
        Ok(Frame::new(
            resized.into_raw(),
            self.target.width,
            self.target.height,
        ))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.target.width, self.target.height)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            log::warn!("Error stopping camera stream: {}", e);
        }
    }
}
