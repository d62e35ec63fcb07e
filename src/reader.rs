//! Capture unit: one per physical source.
//!
//! The reader is the only holder of its channel's `FrameWriter`. It opens the
//! capture device, then loops read -> normalize -> publish until the stream ends,
//! a read fails, or the stop flag is raised. On exit it drops the writer, which
//! detaches from the channel; unlinking is left to the supervisor.

use std::time::Duration;

use anyhow::Result;

use crate::channel::FrameWriter;
use crate::control::{StopFlag, Supervised};
use crate::error::PipelineError;
use crate::ingest::{CaptureDevice, SourceId};

#[derive(Clone, Copy, Debug)]
pub struct ReaderSettings {
    /// Pause between publishes so a fast device cannot pin a core.
    pub capture_pause: Duration,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            capture_pause: Duration::from_millis(1),
        }
    }
}

/// Why the capture loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderStop {
    Requested,
    EndOfStream,
    ReadFailed,
}

/// Exit report of a reader that opened its source.
#[derive(Clone, Debug)]
pub struct ReaderExit {
    pub source: SourceId,
    pub reason: ReaderStop,
    pub frames_captured: u64,
    pub frames_published: u64,
    pub frames_rejected: u64,
}

/// Spawn a reader unit for `source`.
pub fn spawn_reader(
    source: SourceId,
    writer: FrameWriter,
    settings: ReaderSettings,
) -> Result<Supervised<ReaderExit>> {
    let name = format!("reader-{}", source);
    Supervised::spawn(name, move |stop| run_reader(source, writer, settings, &stop))
}

/// Reader body. Runs on the calling thread until the loop ends.
pub fn run_reader(
    source: SourceId,
    mut writer: FrameWriter,
    settings: ReaderSettings,
    stop: &StopFlag,
) -> Result<ReaderExit> {
    let mut device = match CaptureDevice::open(&source) {
        Ok(device) => device,
        Err(err) => {
            log::error!("reader {}: {}", source, err);
            stop.raise();
            return Err(err.into());
        }
    };
    log::info!(
        "reader {} opened, publishing into {}",
        source,
        writer.channel_name()
    );

    let mut exit = ReaderExit {
        source: source.clone(),
        reason: ReaderStop::Requested,
        frames_captured: 0,
        frames_published: 0,
        frames_rejected: 0,
    };

    while !stop.is_raised() {
        let frame = match device.read() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                exit.reason = ReaderStop::EndOfStream;
                break;
            }
            Err(err) => {
                log::warn!("reader {}: read failed: {:#}", source, err);
                exit.reason = ReaderStop::ReadFailed;
                break;
            }
        };
        exit.frames_captured += 1;

        match writer.publish(&frame) {
            Ok(outcome) => {
                exit.frames_published += 1;
                log::trace!(
                    "reader {}: frame {} delivered to {} (dropped {})",
                    source,
                    outcome.token,
                    outcome.delivered,
                    outcome.dropped
                );
            }
            Err(PipelineError::FrameTooLarge { len, capacity }) => {
                exit.frames_rejected += 1;
                log::warn!(
                    "reader {}: skipping {} byte frame (capacity {})",
                    source,
                    len,
                    capacity
                );
            }
            Err(err) => {
                log::error!("reader {}: {}", source, err);
                stop.raise();
                return Err(err.into());
            }
        }

        if !settings.capture_pause.is_zero() {
            std::thread::sleep(settings.capture_pause);
        }
    }

    log::info!(
        "reader {} closed ({:?}, {} captured, {} published, {} rejected)",
        source,
        exit.reason,
        exit.frames_captured,
        exit.frames_published,
        exit.frames_rejected
    );
    Ok(exit)
}
