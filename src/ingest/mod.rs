//! Capture sources.
//!
//! A physical source is named by a `SourceId`: a device index or a URI.
//! `CaptureDevice::open` picks the backend:
//! - `stub://...` synthetic frames (tests and demos)
//! - device indices and `/dev/videoN` paths via V4L2 (feature: capture-v4l2)
//! - any other URI or path, such as `rtsp://` streams and video files, via
//!   FFmpeg (feature: capture-ffmpeg)
//!
//! Every backend yields frames normalized to contiguous RGB24, so a reader can
//! publish them into a shared channel unchanged.

#[cfg(feature = "capture-ffmpeg")]
pub mod ffmpeg;
mod normalize;
pub mod probe;
pub mod synthetic;
#[cfg(feature = "capture-v4l2")]
pub mod v4l2;

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::frame::Frame;

#[cfg(feature = "capture-ffmpeg")]
pub use ffmpeg::FfmpegSource;
pub use normalize::PixelFormat;
pub use probe::list_available_sources;
pub use synthetic::{SyntheticConfig, SyntheticSource};
#[cfg(feature = "capture-v4l2")]
pub use v4l2::V4l2Source;

/// Identifier of a physical capture origin.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceId {
    Device(u32),
    Uri(String),
}

impl SourceId {
    /// Device node path for sources that name a local video device.
    pub fn device_path(&self) -> Option<String> {
        match self {
            SourceId::Device(index) => Some(format!("/dev/video{}", index)),
            SourceId::Uri(uri) if uri.starts_with("/dev/video") => Some(uri.clone()),
            SourceId::Uri(_) => None,
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::Device(index) => write!(f, "device:{}", index),
            SourceId::Uri(uri) => f.write_str(uri),
        }
    }
}

impl FromStr for SourceId {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(anyhow!("camera source must not be empty"));
        }
        match value.parse::<u32>() {
            Ok(index) => Ok(SourceId::Device(index)),
            Err(_) => Ok(SourceId::Uri(value.to_string())),
        }
    }
}

/// Raw frame as produced by a backend, before normalization.
#[derive(Clone, Debug)]
pub struct CapturedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl CapturedFrame {
    /// Convert to a contiguous RGB24 frame.
    pub fn normalize(self) -> Result<Frame> {
        let rgb = normalize::normalize_to_rgb(&self.data, self.width, self.height, self.format)?;
        Frame::from_rgb(self.width, self.height, rgb)
    }
}

/// Counters for an open capture device.
#[derive(Clone, Debug)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub source: SourceId,
}

/// An opened capture device for one physical source.
pub struct CaptureDevice {
    source: SourceId,
    backend: CaptureBackend,
}

enum CaptureBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "capture-v4l2")]
    V4l2(V4l2Source),
    #[cfg(feature = "capture-ffmpeg")]
    Ffmpeg(FfmpegSource),
}

impl CaptureDevice {
    /// Open `source`, failing with `SourceOpen` when no backend can serve it.
    pub fn open(source: &SourceId) -> std::result::Result<Self, PipelineError> {
        let open_error = |reason: String| PipelineError::SourceOpen {
            source_id: source.clone(),
            reason,
        };
        let backend = match source {
            SourceId::Uri(uri) if uri.starts_with("stub://") => {
                let config = SyntheticConfig::parse(uri).map_err(|e| open_error(e.to_string()))?;
                let mut synthetic = SyntheticSource::new(config);
                synthetic.connect().map_err(|e| open_error(e.to_string()))?;
                CaptureBackend::Synthetic(synthetic)
            }
            _ => open_device(source).map_err(|e| open_error(format!("{:#}", e)))?,
        };
        Ok(Self {
            source: source.clone(),
            backend,
        })
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }

    /// Blocking read of the next frame. `Ok(None)` marks end of stream.
    pub fn read(&mut self) -> Result<Option<Frame>> {
        let captured = match &mut self.backend {
            CaptureBackend::Synthetic(source) => source.next_frame()?,
            #[cfg(feature = "capture-v4l2")]
            CaptureBackend::V4l2(source) => source.next_frame()?,
            #[cfg(feature = "capture-ffmpeg")]
            CaptureBackend::Ffmpeg(source) => source.next_frame()?,
        };
        captured.map(CapturedFrame::normalize).transpose()
    }

    pub fn stats(&self) -> CaptureStats {
        let frames_captured = match &self.backend {
            CaptureBackend::Synthetic(source) => source.frames_captured(),
            #[cfg(feature = "capture-v4l2")]
            CaptureBackend::V4l2(source) => source.frames_captured(),
            #[cfg(feature = "capture-ffmpeg")]
            CaptureBackend::Ffmpeg(source) => source.frames_captured(),
        };
        CaptureStats {
            frames_captured,
            source: self.source.clone(),
        }
    }
}

fn open_device(source: &SourceId) -> Result<CaptureBackend> {
    match (source.device_path(), source) {
        (Some(path), _) => open_v4l2(path),
        (None, SourceId::Uri(location)) => open_stream(location),
        (None, SourceId::Device(index)) => Err(anyhow!("device {} has no video node", index)),
    }
}

#[cfg(feature = "capture-v4l2")]
fn open_v4l2(path: String) -> Result<CaptureBackend> {
    let mut device = V4l2Source::new(v4l2::V4l2Config {
        device: path,
        ..v4l2::V4l2Config::default()
    });
    device.connect()?;
    Ok(CaptureBackend::V4l2(device))
}

#[cfg(not(feature = "capture-v4l2"))]
fn open_v4l2(path: String) -> Result<CaptureBackend> {
    Err(anyhow!("{}: device capture requires the capture-v4l2 feature", path))
}

#[cfg(feature = "capture-ffmpeg")]
fn open_stream(location: &str) -> Result<CaptureBackend> {
    Ok(CaptureBackend::Ffmpeg(FfmpegSource::open(location)?))
}

#[cfg(not(feature = "capture-ffmpeg"))]
fn open_stream(location: &str) -> Result<CaptureBackend> {
    Err(anyhow!(
        "{}: stream and file sources require the capture-ffmpeg feature",
        location
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_strings_parse_as_device_indices() {
        assert_eq!("2".parse::<SourceId>().unwrap(), SourceId::Device(2));
        assert_eq!(
            " rtsp://cam/1 ".parse::<SourceId>().unwrap(),
            SourceId::Uri("rtsp://cam/1".into())
        );
        assert!("  ".parse::<SourceId>().is_err());
    }

    #[test]
    fn device_sources_map_to_video_nodes() {
        assert_eq!(
            SourceId::Device(3).device_path().as_deref(),
            Some("/dev/video3")
        );
        assert_eq!(SourceId::Uri("stub://x".into()).device_path(), None);
    }

    #[test]
    fn stub_device_reads_normalized_frames() {
        let source = SourceId::Uri("stub://unit?width=8&height=4&fps=0&frames=2".into());
        let mut device = CaptureDevice::open(&source).unwrap();
        let frame = device.read().unwrap().expect("first frame");
        assert_eq!((frame.width(), frame.height(), frame.channels()), (8, 4, 3));
        assert!(device.read().unwrap().is_some());
        assert!(device.read().unwrap().is_none());
        assert_eq!(device.stats().frames_captured, 2);
    }

    #[test]
    fn failing_stub_reports_source_open_error() {
        let source = SourceId::Uri("stub://broken?open=fail".into());
        assert!(matches!(
            CaptureDevice::open(&source),
            Err(PipelineError::SourceOpen { .. })
        ));
    }

    #[test]
    fn missing_file_fails_to_open() {
        let source = SourceId::Uri("/nonexistent/multicam/clip.mp4".into());
        assert!(matches!(
            CaptureDevice::open(&source),
            Err(PipelineError::SourceOpen { .. })
        ));
    }

    #[cfg(not(feature = "capture-ffmpeg"))]
    #[test]
    fn stream_uris_name_the_ffmpeg_feature() {
        let source = SourceId::Uri("rtsp://127.0.0.1/cam".into());
        match CaptureDevice::open(&source) {
            Err(PipelineError::SourceOpen { reason, .. }) => {
                assert!(reason.contains("capture-ffmpeg"), "{}", reason)
            }
            Err(other) => panic!("unexpected error {}", other),
            Ok(_) => panic!("stream opened without ffmpeg support"),
        }
    }
}
