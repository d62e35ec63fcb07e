use anyhow::Result;

use crate::detect::backend::{FaceDetector, ObjectDetector};
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Stub object backend. Returns the same scripted detections for every frame.
#[derive(Clone, Debug, Default)]
pub struct StubBackend {
    detections: Vec<Detection>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detections(detections: Vec<Detection>) -> Self {
        Self { detections }
    }
}

impl ObjectDetector for StubBackend {
    fn name(&self) -> &str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        Ok(self.detections.clone())
    }
}

/// Stub face backend. Returns the same scripted boxes for every frame.
#[derive(Clone, Debug, Default)]
pub struct StubFaceBackend {
    faces: Vec<BoundingBox>,
}

impl StubFaceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faces(faces: Vec<BoundingBox>) -> Self {
        Self { faces }
    }
}

impl FaceDetector for StubFaceBackend {
    fn name(&self) -> &str {
        "stub-face"
    }

    fn detect_faces(&mut self, _frame: &Frame) -> Result<Vec<BoundingBox>> {
        Ok(self.faces.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_returns_scripted_detections() {
        let frame = Frame::from_rgb(1, 1, vec![0; 3]).unwrap();
        let scripted = vec![Detection::new("car", 0.7, BoundingBox::new(0.0, 0.0, 0.5, 0.5))];
        let mut backend = StubBackend::with_detections(scripted.clone());
        assert_eq!(backend.detect(&frame).unwrap(), scripted);
        assert!(StubBackend::new().detect(&frame).unwrap().is_empty());
    }

    #[test]
    fn stub_face_returns_scripted_boxes() {
        let frame = Frame::from_rgb(1, 1, vec![0; 3]).unwrap();
        let mut backend = StubFaceBackend::with_faces(vec![BoundingBox::new(0.1, 0.1, 0.1, 0.1)]);
        assert_eq!(backend.detect_faces(&frame).unwrap().len(), 1);
    }
}
