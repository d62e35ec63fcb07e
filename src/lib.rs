//! Multi-camera capture and detection pipeline.
//!
//! One capture unit per physical source publishes frames into a fixed-capacity
//! shared buffer. One detection unit per logical camera reads the newest frame,
//! runs detection, draws the results on a private copy and offers it to a
//! single-slot output channel. The supervisor drains those channels on a fixed
//! tick and hands frames to the display side.
//!
//! # Guarantees
//!
//! 1. **Freshness over completeness**: a slow consumer skips frames; it is never
//!    served a stale or torn one.
//! 2. **Capture never waits**: full notification queues and full output slots
//!    drop the new item.
//! 3. **One reader per source**: logical cameras sharing a source share its
//!    reader and channel, reference counted by the supervisor.
//! 4. **Bounded teardown**: stopping any unit is bounded by a timeout, and
//!    `Supervisor::shutdown` is idempotent.
//!
//! # Module Structure
//!
//! - `channel`: shared frame buffer, notification fan-out, output slot
//! - `ingest`: capture sources (synthetic, V4L2)
//! - `detect`: detector traits, registry and backends
//! - `reader` / `worker`: the two unit bodies
//! - `supervisor`: camera and source lifecycle
//! - `display`, `profile`: display sink and profile persistence

pub mod annotate;
pub mod camera;
pub mod channel;
pub mod config;
pub mod control;
pub mod detect;
pub mod display;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod profile;
pub mod reader;
pub mod supervisor;
pub mod worker;

pub use camera::{CameraConfig, CameraId};
pub use channel::{FrameSubscription, FrameWriter, Notification, SharedFrameChannel};
pub use config::MulticamConfig;
pub use control::StopFlag;
pub use detect::{filter_detections, BoundingBox, Detection, DetectorRegistry};
pub use display::{FeedBoard, FeedStatus, FrameSink};
pub use error::PipelineError;
pub use frame::{ElementType, Frame, FrameDescriptor, FrameShape, MAX_FRAME_BYTES};
pub use ingest::{list_available_sources, SourceId};
pub use profile::{JsonProfileStore, ProfileStore};
pub use supervisor::{Supervisor, SupervisorSettings};
