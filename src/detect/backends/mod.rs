pub mod motion;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use motion::MotionBackend;
pub use stub::{StubBackend, StubFaceBackend};

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
