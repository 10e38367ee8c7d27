use opencv::core::Mat;
use thiserror::Error;

/// COCO class index for "person", the only class the reduction cares about.
pub const PERSON_CLASS_ID: usize = 0;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("model execution failed: {0}")]
    Execution(#[from] ort::Error),
    #[error("frame preprocessing failed: {0}")]
    Preprocess(#[from] opencv::Error),
    #[error("inference backend unavailable: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone)]
pub struct Detection {
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// A pretrained object-detection capability. Anything that turns a frame into
/// class-tagged detections will do; the classifier reads class ids only.
pub trait InferenceBackend: Send {
    fn infer(&mut self, frame: &Mat) -> Result<Vec<Detection>, InferenceError>;
}

pub struct PresenceClassifier {
    backend: Box<dyn InferenceBackend>,
}

impl PresenceClassifier {
    pub fn new(backend: Box<dyn InferenceBackend>) -> Self {
        Self { backend }
    }

    /// True iff at least one detection is a person, regardless of confidence
    /// score or count.
    pub fn classify(&mut self, frame: &Mat) -> Result<bool, InferenceError> {
        let detections = self.backend.infer(frame)?;

        for det in &detections {
            tracing::trace!(
                class = det.class_id,
                confidence = format!("{:.2}", det.confidence),
                bbox = ?det.bbox,
                "detection"
            );
        }

        Ok(detections.iter().any(|d| d.class_id == PERSON_CLASS_ID))
    }
}
