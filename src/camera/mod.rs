mod capture;

pub use capture::{Camera, CaptureError, FrameSource};
