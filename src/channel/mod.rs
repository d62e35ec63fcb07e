//! Inter-unit channels.
//!
//! Readers, workers and the supervisor exchange data only through these:
//! - `shared`: per-source frame buffer plus bounded descriptor notifications
//! - `output`: per-camera single-slot channel toward the display consumer

pub mod output;
pub mod shared;

pub use output::{output_channel, OutputMessage, OutputReceiver, OutputSender};
pub use shared::{
    ChannelStats, FrameSubscription, FrameView, FrameWriter, Notification, PublishOutcome,
    SharedFrameChannel,
};
