//! Display side of the pipeline.
//!
//! The supervisor forwards every drained output to a `FrameSink`. `FeedBoard` is
//! the headless sink used by `multicamd`: it keeps one status line per camera.

use std::collections::BTreeMap;
use std::fmt;

use crate::camera::CameraId;
use crate::frame::Frame;

/// Receiver of drained output. `None` marks the camera as errored or disconnected.
pub trait FrameSink {
    fn on_frame(&mut self, camera_id: CameraId, frame: Option<&Frame>);

    /// Called once at the end of every drain pass.
    fn tick(&mut self) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedStatus {
    NoFeed,
    Live { frames: u64, width: u32, height: u32 },
    Errored,
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedStatus::NoFeed => write!(f, "No Feed"),
            FeedStatus::Live {
                frames,
                width,
                height,
            } => write!(f, "{}x{} ({} frames)", width, height, frames),
            FeedStatus::Errored => write!(f, "Error/Disconnected"),
        }
    }
}

#[derive(Debug, Default)]
pub struct FeedBoard {
    feeds: BTreeMap<CameraId, FeedStatus>,
}

impl FeedBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Show a camera as waiting for its first frame.
    pub fn register(&mut self, camera_id: CameraId) {
        self.feeds.insert(camera_id, FeedStatus::NoFeed);
    }

    pub fn status(&self, camera_id: CameraId) -> FeedStatus {
        self.feeds
            .get(&camera_id)
            .copied()
            .unwrap_or(FeedStatus::NoFeed)
    }

    pub fn statuses(&self) -> impl Iterator<Item = (CameraId, FeedStatus)> + '_ {
        self.feeds.iter().map(|(id, status)| (*id, *status))
    }

    /// One line per camera, ordered by id.
    pub fn render(&self) -> String {
        self.feeds
            .iter()
            .map(|(id, status)| format!("camera {}: {}", id, status))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl FrameSink for FeedBoard {
    fn on_frame(&mut self, camera_id: CameraId, frame: Option<&Frame>) {
        let entry = self.feeds.entry(camera_id).or_insert(FeedStatus::NoFeed);
        *entry = match (frame, *entry) {
            (None, _) => FeedStatus::Errored,
            (Some(frame), FeedStatus::Live { frames, .. }) => FeedStatus::Live {
                frames: frames + 1,
                width: frame.width(),
                height: frame.height(),
            },
            (Some(frame), _) => FeedStatus::Live {
                frames: 1,
                width: frame.width(),
                height: frame.height(),
            },
        };
    }
}
