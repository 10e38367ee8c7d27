use ndarray::{Array4, ArrayViewD};
use opencv::core::{self, Mat, Size};
use opencv::imgproc;
use opencv::prelude::*;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::TensorRef;

use crate::config::ModelConfig;

use super::presence::{BoundingBox, Detection, InferenceBackend, InferenceError};

const INPUT_SIZE: i32 = 640;

/// YOLOv8-family ONNX model via onnxruntime.
///
/// Expects the single-tensor export layout `[1, 4 + classes, anchors]` with
/// class scores already activated.
pub struct YoloBackend {
    session: Session,
    confidence_threshold: f32,
}

impl YoloBackend {
    pub fn new(config: &ModelConfig) -> Result<Self, InferenceError> {
        let builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?;

        let session = if config.path.starts_with("http://") || config.path.starts_with("https://") {
            builder.commit_from_url(&config.path)?
        } else {
            builder.commit_from_file(&config.path)?
        };

        Ok(Self {
            session,
            confidence_threshold: config.confidence_threshold,
        })
    }

    /// Letterbox the frame into the model's square input and return the
    /// tensor plus the scale/padding needed to map boxes back.
    fn preprocess(&self, frame: &Mat) -> Result<(Array4<f32>, f32, f32, f32), InferenceError> {
        let rows = frame.rows() as f32;
        let cols = frame.cols() as f32;
        let input_size = INPUT_SIZE as f32;

        let scale = (input_size / cols).min(input_size / rows);
        let new_w = (cols * scale).round() as i32;
        let new_h = (rows * scale).round() as i32;

        let mut resized = Mat::default();
        imgproc::resize(
            frame,
            &mut resized,
            Size::new(new_w, new_h),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;

        let pad_x = (INPUT_SIZE - new_w) / 2;
        let pad_y = (INPUT_SIZE - new_h) / 2;

        let mut padded = Mat::default();
        core::copy_make_border(
            &resized,
            &mut padded,
            pad_y,
            INPUT_SIZE - new_h - pad_y,
            pad_x,
            INPUT_SIZE - new_w - pad_x,
            core::BORDER_CONSTANT,
            core::Scalar::new(114.0, 114.0, 114.0, 0.0),
        )?;

        let mut rgb = Mat::default();
        imgproc::cvt_color_def(&padded, &mut rgb, imgproc::COLOR_BGR2RGB)?;

        let data = rgb.data_bytes()?;
        let size = INPUT_SIZE as usize;
        if data.len() < size * size * 3 {
            return Err(InferenceError::Backend(
                "frame buffer smaller than model input".into(),
            ));
        }

        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for y in 0..size {
            for x in 0..size {
                let idx = (y * size + x) * 3;
                tensor[[0, 0, y, x]] = data[idx] as f32 / 255.0;
                tensor[[0, 1, y, x]] = data[idx + 1] as f32 / 255.0;
                tensor[[0, 2, y, x]] = data[idx + 2] as f32 / 255.0;
            }
        }

        Ok((tensor, scale, pad_x as f32, pad_y as f32))
    }
}

impl InferenceBackend for YoloBackend {
    fn infer(&mut self, frame: &Mat) -> Result<Vec<Detection>, InferenceError> {
        let rows = frame.rows();
        let cols = frame.cols();
        if rows == 0 || cols == 0 {
            return Ok(Vec::new());
        }

        let (tensor, scale, pad_x, pad_y) = self.preprocess(frame)?;

        let input = TensorRef::from_array_view(tensor.view())?.into_dyn();
        let outputs = self.session.run(ort::inputs![input])?;

        let Some(value) = outputs.get("output0") else {
            return Err(InferenceError::Backend(
                "model has no 'output0' tensor; expected a YOLOv8 export".into(),
            ));
        };

        let predictions = value.try_extract_array::<f32>()?.to_owned();
        drop(outputs);

        Ok(decode_predictions(
            &predictions.view(),
            self.confidence_threshold,
            scale,
            pad_x,
            pad_y,
            cols as f32,
            rows as f32,
        ))
    }
}

/// Decode the `[1, 4 + classes, anchors]` prediction tensor: rows 0..4 are
/// center-format boxes in input-pixel space, the rest are per-class scores.
fn decode_predictions(
    output: &ArrayViewD<f32>,
    confidence_threshold: f32,
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    orig_w: f32,
    orig_h: f32,
) -> Vec<Detection> {
    let shape = output.shape();
    if shape.len() != 3 || shape[1] <= 4 {
        return Vec::new();
    }

    let classes = shape[1] - 4;
    let anchors = shape[2];

    let Some(flat) = output.as_slice() else {
        return Vec::new();
    };

    let mut detections = Vec::new();

    for a in 0..anchors {
        let mut best_score = 0.0f32;
        let mut best_class = 0usize;

        for c in 0..classes {
            let score = flat[(4 + c) * anchors + a];
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }

        if best_score < confidence_threshold {
            continue;
        }

        let cx = flat[a];
        let cy = flat[anchors + a];
        let w = flat[2 * anchors + a];
        let h = flat[3 * anchors + a];

        // Undo the letterbox, clamp to the original frame.
        let x = (((cx - w / 2.0) - pad_x) / scale).clamp(0.0, orig_w);
        let y = (((cy - h / 2.0) - pad_y) / scale).clamp(0.0, orig_h);
        let width = (w / scale).min(orig_w - x);
        let height = (h / scale).min(orig_h - y);

        detections.push(Detection {
            class_id: best_class,
            confidence: best_score,
            bbox: BoundingBox {
                x,
                y,
                width,
                height,
            },
        });
    }

    detections
}
