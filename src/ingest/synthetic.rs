//! Synthetic frame source (`stub://` URIs).
//!
//! `stub://<name>?width=64&height=48&fps=30&frames=100&format=rgb&open=fail`
//!
//! - `fps` paces `next_frame` like a real device; `0` disables pacing.
//! - `frames` ends the stream after that many frames.
//! - `format=nv12` emits NV12 so the normalization path is exercised.
//! - `open=fail` makes `connect` fail.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use url::Url;

use super::{CapturedFrame, PixelFormat};

const DEFAULT_WIDTH: u32 = 64;
const DEFAULT_HEIGHT: u32 = 48;
const DEFAULT_FPS: u32 = 30;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntheticConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    pub max_frames: Option<u64>,
    pub format: PixelFormat,
    pub fail_open: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "synthetic".to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            target_fps: DEFAULT_FPS,
            max_frames: None,
            format: PixelFormat::Rgb24,
            fail_open: false,
        }
    }
}

impl SyntheticConfig {
    pub fn parse(uri: &str) -> Result<Self> {
        let url = Url::parse(uri).with_context(|| format!("parse synthetic source {}", uri))?;
        if url.scheme() != "stub" {
            return Err(anyhow!("synthetic sources use the stub:// scheme"));
        }
        let mut config = SyntheticConfig {
            name: url.host_str().unwrap_or("synthetic").to_string(),
            ..SyntheticConfig::default()
        };
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "width" => config.width = parse_number(&key, &value)?,
                "height" => config.height = parse_number(&key, &value)?,
                "fps" => config.target_fps = parse_number(&key, &value)?,
                "frames" => config.max_frames = Some(parse_number(&key, &value)?),
                "format" => {
                    config.format = match value.as_ref() {
                        "rgb" | "rgb24" => PixelFormat::Rgb24,
                        "nv12" => PixelFormat::Nv12,
                        other => return Err(anyhow!("unknown synthetic format '{}'", other)),
                    }
                }
                "open" => config.fail_open = value == "fail",
                other => log::debug!("SyntheticSource: ignoring parameter {}", other),
            }
        }
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("synthetic frame dimensions must be > 0"));
        }
        if config.format == PixelFormat::Nv12 && (config.width % 2 != 0 || config.height % 2 != 0)
        {
            return Err(anyhow!("NV12 synthetic frames need even dimensions"));
        }
        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("synthetic parameter {} must be a number, got '{}'", key, value))
}

/// Generates a moving gradient. The scene shifts every 50 frames.
pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
    scene_state: u8,
    next_due: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            scene_state: 0,
            next_due: None,
        }
    }

    pub fn connect(&mut self) -> Result<()> {
        if self.config.fail_open {
            return Err(anyhow!("synthetic source {} refused to open", self.config.name));
        }
        log::info!(
            "SyntheticSource: connected to {} ({}x{} @ {} fps)",
            self.config.name,
            self.config.width,
            self.config.height,
            self.config.target_fps
        );
        Ok(())
    }

    pub fn next_frame(&mut self) -> Result<Option<CapturedFrame>> {
        if self
            .config
            .max_frames
            .is_some_and(|max| self.frame_count >= max)
        {
            return Ok(None);
        }
        self.pace();
        self.frame_count += 1;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let data = match self.config.format {
            PixelFormat::Rgb24 => self.gradient(3),
            PixelFormat::Nv12 => self.nv12(),
        };
        Ok(Some(CapturedFrame {
            data,
            width: self.config.width,
            height: self.config.height,
            format: self.config.format,
        }))
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn pace(&mut self) {
        let interval = frame_interval(self.config.target_fps);
        if interval.is_zero() {
            return;
        }
        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now {
                thread::sleep(due - now);
            }
        }
        let base = self.next_due.map_or(now, |due| due.max(now));
        self.next_due = Some(base + interval);
    }

    fn gradient(&self, bytes_per_pixel: usize) -> Vec<u8> {
        let len = self.config.width as usize * self.config.height as usize * bytes_per_pixel;
        let offset = self.frame_count + self.scene_state as u64;
        (0..len)
            .map(|i| ((i as u64 + offset) % 256) as u8)
            .collect()
    }

    fn nv12(&self) -> Vec<u8> {
        let luma = self.gradient(1);
        let chroma_len = luma.len() / 2;
        let mut data = luma;
        data.extend(std::iter::repeat(128u8).take(chroma_len));
        data
    }
}

fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_parameters() {
        let cfg = SyntheticConfig::parse("stub://lobby?width=32&height=16&fps=0&frames=3").unwrap();
        assert_eq!(cfg.name, "lobby");
        assert_eq!((cfg.width, cfg.height), (32, 16));
        assert_eq!(cfg.target_fps, 0);
        assert_eq!(cfg.max_frames, Some(3));
        assert!(!cfg.fail_open);
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(SyntheticConfig::parse("stub://x?width=abc").is_err());
        assert!(SyntheticConfig::parse("stub://x?width=0").is_err());
        assert!(SyntheticConfig::parse("stub://x?format=nv12&width=3&height=2").is_err());
        assert!(SyntheticConfig::parse("stub://x?format=bayer").is_err());
    }

    #[test]
    fn stream_ends_after_max_frames() -> Result<()> {
        let mut source = SyntheticSource::new(SyntheticConfig::parse("stub://x?fps=0&frames=1")?);
        source.connect()?;
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn consecutive_frames_differ() -> Result<()> {
        let mut source = SyntheticSource::new(SyntheticConfig::parse("stub://x?fps=0")?);
        let a = source.next_frame()?.unwrap();
        let b = source.next_frame()?.unwrap();
        assert_ne!(a.data, b.data);
        Ok(())
    }

    #[test]
    fn nv12_frames_normalize_to_rgb() -> Result<()> {
        let mut source = SyntheticSource::new(SyntheticConfig::parse(
            "stub://x?fps=0&format=nv12&width=4&height=2",
        )?);
        let captured = source.next_frame()?.unwrap();
        assert_eq!(captured.data.len(), 12);
        let frame = captured.normalize()?;
        assert_eq!(frame.byte_len(), 24);
        Ok(())
    }

    #[test]
    fn pacing_spaces_frames() -> Result<()> {
        let mut source = SyntheticSource::new(SyntheticConfig::parse("stub://x?fps=100")?);
        let started = Instant::now();
        for _ in 0..4 {
            source.next_frame()?;
        }
        assert!(started.elapsed() >= Duration::from_millis(25));
        Ok(())
    }
}
