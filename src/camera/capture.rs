use opencv::core::Mat;
use opencv::prelude::*;
use opencv::videoio;
use thiserror::Error;

use crate::config::CameraConfig;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera device {0} unavailable")]
    DeviceUnavailable(i32),
    #[error("capture backend error: {0}")]
    Backend(#[from] opencv::Error),
}

/// One frame at a time from a live source. `Ok(None)` means the source is
/// exhausted, not that something went wrong.
pub trait FrameSource: Send {
    fn read_frame(&mut self) -> Result<Option<Mat>, CaptureError>;
}

/// Local capture device. Resolution and frame rate are applied once at open
/// time and fixed for the session.
pub struct Camera {
    inner: videoio::VideoCapture,
    device: i32,
}

impl Camera {
    pub fn open(config: &CameraConfig) -> Result<Self, CaptureError> {
        let mut inner = videoio::VideoCapture::new(config.device, videoio::CAP_ANY)?;
        if !inner.is_opened()? {
            return Err(CaptureError::DeviceUnavailable(config.device));
        }

        inner.set(videoio::CAP_PROP_FRAME_WIDTH, config.width as f64)?;
        inner.set(videoio::CAP_PROP_FRAME_HEIGHT, config.height as f64)?;
        inner.set(videoio::CAP_PROP_FPS, config.fps as f64)?;

        tracing::info!(
            device = config.device,
            width = config.width,
            height = config.height,
            fps = config.fps,
            "camera opened"
        );

        Ok(Self {
            inner,
            device: config.device,
        })
    }
}

impl FrameSource for Camera {
    fn read_frame(&mut self) -> Result<Option<Mat>, CaptureError> {
        let mut frame = Mat::default();
        let grabbed = self.inner.read(&mut frame)?;
        if !grabbed || frame.empty() {
            tracing::info!(device = self.device, "camera stream ended");
            return Ok(None);
        }
        Ok(Some(frame))
    }
}
