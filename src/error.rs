//! Pipeline error taxonomy.
//!
//! Per-frame errors (`FrameTooLarge`, `Detection`) are logged and skipped by the
//! unit that hit them. `SourceOpen` and `ChannelAttach` end the unit. A full
//! bounded queue is not an error anywhere in the pipeline.

use thiserror::Error;

use crate::ingest::SourceId;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The capture device for a physical source could not be opened.
    #[error("failed to open source {source_id}: {reason}")]
    SourceOpen { source_id: SourceId, reason: String },

    /// A worker could not bind to its source's frame channel.
    #[error("failed to attach to frame channel {channel}: {reason}")]
    ChannelAttach { channel: String, reason: String },

    /// Encoded frame does not fit into the shared buffer.
    #[error("frame of {len} bytes exceeds channel capacity of {capacity} bytes")]
    FrameTooLarge { len: usize, capacity: usize },

    /// A detector call failed for one frame.
    #[error("detection failed: {0}")]
    Detection(String),

    /// A unit ignored its stop signal past the timeout and was detached.
    #[error("{unit} did not stop within {timeout_ms}ms")]
    ProcessUnresponsive { unit: String, timeout_ms: u128 },

    #[error("unknown camera {0}")]
    UnknownCamera(u64),

    #[error("no detector registered for model '{0}'")]
    UnknownModel(String),

    #[error("invalid profile name '{0}'")]
    InvalidProfileName(String),

    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
}
