mod backend;
pub mod backends;
mod registry;
mod result;

pub use backend::{FaceDetector, ObjectDetector};
pub use backends::{MotionBackend, StubBackend, StubFaceBackend};
pub use registry::{DetectorRegistry, FaceFactory, ObjectFactory};
pub use result::{filter_detections, BoundingBox, Detection};
