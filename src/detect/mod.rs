mod motion;
mod presence;
mod yolo;

pub use motion::{MotionError, MotionEstimator};
pub use presence::{
    BoundingBox, Detection, InferenceBackend, InferenceError, PresenceClassifier, PERSON_CLASS_ID,
};
pub use yolo::YoloBackend;
