use anyhow::Result;

use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Object detector backend.
///
/// Each worker builds its own instance, so implementations need not be `Sync`.
/// A failing `detect` call only costs the current frame.
pub trait ObjectDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &str;

    /// Run detection on one frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, called once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Face detector backend, run as an independent pass after object detection.
pub trait FaceDetector: Send {
    fn name(&self) -> &str;

    fn detect_faces(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>>;

    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
