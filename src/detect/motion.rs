use opencv::core::{self, Mat, Size};
use opencv::imgproc;
use opencv::prelude::*;
use thiserror::Error;

const BLUR_KERNEL: i32 = 21;

#[derive(Debug, Error)]
pub enum MotionError {
    #[error("frame geometry {actual_width}x{actual_height} does not match reference {width}x{height}")]
    InvalidFrame {
        width: i32,
        height: i32,
        actual_width: i32,
        actual_height: i32,
    },
    #[error("image operation failed: {0}")]
    Vision(#[from] opencv::Error),
}

/// Frame differencing against a single rolling reference.
///
/// The reference is the previous frame's blurred grayscale, replaced on every
/// call. Motion is measured relative to the immediately preceding frame only,
/// so continuous movement registers while a very slow drift does not.
pub struct MotionEstimator {
    reference: Option<Mat>,
    pixel_delta: f64,
    changed_fraction: f32,
}

impl MotionEstimator {
    pub fn new(pixel_delta: f64, changed_fraction: f32) -> Self {
        Self {
            reference: None,
            pixel_delta,
            changed_fraction,
        }
    }

    pub fn estimate(&mut self, frame: &Mat) -> Result<bool, MotionError> {
        let working = self.smooth(frame)?;

        let Some(reference) = self.reference.as_ref() else {
            // No baseline yet; nothing to compare against.
            self.reference = Some(working);
            return Ok(false);
        };

        if working.rows() != reference.rows() || working.cols() != reference.cols() {
            return Err(MotionError::InvalidFrame {
                width: reference.cols(),
                height: reference.rows(),
                actual_width: working.cols(),
                actual_height: working.rows(),
            });
        }

        let mut delta = Mat::default();
        core::absdiff(reference, &working, &mut delta)?;

        let mut mask = Mat::default();
        imgproc::threshold(
            &delta,
            &mut mask,
            self.pixel_delta,
            255.0,
            imgproc::THRESH_BINARY,
        )?;

        let total = mask.rows() * mask.cols();
        let changed = core::count_non_zero(&mask)?;
        let fraction = if total > 0 {
            changed as f32 / total as f32
        } else {
            0.0
        };

        self.reference = Some(working);

        Ok(fraction > self.changed_fraction)
    }

    fn smooth(&self, frame: &Mat) -> Result<Mat, MotionError> {
        let mut gray = Mat::default();
        imgproc::cvt_color_def(frame, &mut gray, imgproc::COLOR_BGR2GRAY)?;

        let mut smoothed = Mat::default();
        imgproc::gaussian_blur_def(&gray, &mut smoothed, Size::new(BLUR_KERNEL, BLUR_KERNEL), 0.0)?;

        Ok(smoothed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, CV_8UC3};

    fn solid_frame(width: i32, height: i32, value: f64) -> Mat {
        Mat::new_rows_cols_with_default(height, width, CV_8UC3, Scalar::all(value)).unwrap()
    }

    #[test]
    fn first_frame_never_reports_motion() {
        let mut estimator = MotionEstimator::new(25.0, 0.12);
        assert!(!estimator.estimate(&solid_frame(64, 48, 200.0)).unwrap());
    }

    #[test]
    fn identical_frames_report_no_motion() {
        let mut estimator = MotionEstimator::new(25.0, 0.12);
        let frame = solid_frame(64, 48, 128.0);
        estimator.estimate(&frame).unwrap();
        assert!(!estimator.estimate(&frame).unwrap());
    }

    #[test]
    fn large_intensity_change_reports_motion() {
        let mut estimator = MotionEstimator::new(25.0, 0.12);
        estimator.estimate(&solid_frame(64, 48, 0.0)).unwrap();
        assert!(estimator.estimate(&solid_frame(64, 48, 255.0)).unwrap());
    }

    #[test]
    fn change_below_pixel_delta_is_ignored() {
        let mut estimator = MotionEstimator::new(25.0, 0.12);
        estimator.estimate(&solid_frame(64, 48, 100.0)).unwrap();
        // Ten intensity levels stays under the 25 delta everywhere.
        assert!(!estimator.estimate(&solid_frame(64, 48, 110.0)).unwrap());
    }

    #[test]
    fn mismatched_geometry_is_rejected() {
        let mut estimator = MotionEstimator::new(25.0, 0.12);
        estimator.estimate(&solid_frame(64, 48, 0.0)).unwrap();
        let result = estimator.estimate(&solid_frame(32, 24, 0.0));
        assert!(matches!(result, Err(MotionError::InvalidFrame { .. })));
    }

    #[test]
    fn rejected_frame_keeps_the_reference() {
        let mut estimator = MotionEstimator::new(25.0, 0.12);
        estimator.estimate(&solid_frame(64, 48, 0.0)).unwrap();
        let _ = estimator.estimate(&solid_frame(32, 24, 0.0));
        // Baseline is still the black frame, so a white one reads as motion.
        assert!(estimator.estimate(&solid_frame(64, 48, 255.0)).unwrap());
    }
}
