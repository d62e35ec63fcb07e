use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::frame::MAX_FRAME_BYTES;
use crate::supervisor::SupervisorSettings;

const DEFAULT_PROFILES_DIR: &str = "profiles";
const DEFAULT_NOTIFY_DEPTH: usize = 5;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1;
const DEFAULT_CAPTURE_PAUSE_MS: u64 = 1;
const DEFAULT_DRAIN_INTERVAL_MS: u64 = 30;
const DEFAULT_STOP_TIMEOUT_MS: u64 = 1000;
const DEFAULT_MODEL_INPUT: u32 = 640;
const DEFAULT_MODEL_CONFIDENCE: f32 = 0.25;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MulticamConfigFile {
    profiles_dir: Option<PathBuf>,
    channel: Option<ChannelConfigFile>,
    timing: Option<TimingConfigFile>,
    models: Option<BTreeMap<String, OnnxModelConfig>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ChannelConfigFile {
    max_frame_bytes: Option<usize>,
    notify_depth: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TimingConfigFile {
    poll_interval_ms: Option<u64>,
    capture_pause_ms: Option<u64>,
    drain_interval_ms: Option<u64>,
    stop_timeout_ms: Option<u64>,
}

/// An ONNX detection model served under a model name.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OnnxModelConfig {
    pub path: PathBuf,
    /// Newline-separated class labels, in model output order.
    pub labels: PathBuf,
    #[serde(default = "default_model_input")]
    pub input_width: u32,
    #[serde(default = "default_model_input")]
    pub input_height: u32,
    #[serde(default = "default_model_confidence")]
    pub confidence: f32,
}

fn default_model_input() -> u32 {
    DEFAULT_MODEL_INPUT
}

fn default_model_confidence() -> f32 {
    DEFAULT_MODEL_CONFIDENCE
}

#[derive(Debug, Clone)]
pub struct MulticamConfig {
    pub profiles_dir: PathBuf,
    pub max_frame_bytes: usize,
    pub notify_depth: usize,
    pub poll_interval: Duration,
    pub capture_pause: Duration,
    pub drain_interval: Duration,
    pub stop_timeout: Duration,
    /// Model name to ONNX model, registered alongside the built-ins.
    pub models: BTreeMap<String, OnnxModelConfig>,
}

impl MulticamConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("MULTICAM_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MulticamConfigFile) -> Self {
        let channel = file.channel.unwrap_or_default();
        let timing = file.timing.unwrap_or_default();
        Self {
            profiles_dir: file
                .profiles_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PROFILES_DIR)),
            max_frame_bytes: channel.max_frame_bytes.unwrap_or(MAX_FRAME_BYTES),
            notify_depth: channel.notify_depth.unwrap_or(DEFAULT_NOTIFY_DEPTH),
            poll_interval: Duration::from_millis(
                timing.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            capture_pause: Duration::from_millis(
                timing.capture_pause_ms.unwrap_or(DEFAULT_CAPTURE_PAUSE_MS),
            ),
            drain_interval: Duration::from_millis(
                timing.drain_interval_ms.unwrap_or(DEFAULT_DRAIN_INTERVAL_MS),
            ),
            stop_timeout: Duration::from_millis(
                timing.stop_timeout_ms.unwrap_or(DEFAULT_STOP_TIMEOUT_MS),
            ),
            models: file.models.unwrap_or_default(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("MULTICAM_PROFILES_DIR") {
            if !dir.trim().is_empty() {
                self.profiles_dir = PathBuf::from(dir);
            }
        }
        if let Ok(bytes) = std::env::var("MULTICAM_MAX_FRAME_BYTES") {
            self.max_frame_bytes = bytes
                .parse()
                .map_err(|_| anyhow!("MULTICAM_MAX_FRAME_BYTES must be an integer byte count"))?;
        }
        if let Ok(ms) = std::env::var("MULTICAM_DRAIN_INTERVAL_MS") {
            let ms: u64 = ms
                .parse()
                .map_err(|_| anyhow!("MULTICAM_DRAIN_INTERVAL_MS must be an integer"))?;
            self.drain_interval = Duration::from_millis(ms);
        }
        if let Ok(ms) = std::env::var("MULTICAM_STOP_TIMEOUT_MS") {
            let ms: u64 = ms
                .parse()
                .map_err(|_| anyhow!("MULTICAM_STOP_TIMEOUT_MS must be an integer"))?;
            self.stop_timeout = Duration::from_millis(ms);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.max_frame_bytes == 0 {
            return Err(anyhow!("max frame bytes must be greater than zero"));
        }
        if self.notify_depth == 0 {
            return Err(anyhow!("notification depth must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll interval must be greater than zero"));
        }
        if self.drain_interval.is_zero() {
            return Err(anyhow!("drain interval must be greater than zero"));
        }
        if self.stop_timeout.is_zero() {
            return Err(anyhow!("stop timeout must be greater than zero"));
        }
        for (name, model) in &self.models {
            if name.trim().is_empty() {
                return Err(anyhow!("model names must not be empty"));
            }
            if model.input_width == 0 || model.input_height == 0 {
                return Err(anyhow!("model {}: input size must be non-zero", name));
            }
            if !(0.0..=1.0).contains(&model.confidence) {
                return Err(anyhow!("model {}: confidence must be within 0..=1", name));
            }
        }
        Ok(())
    }

    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            max_frame_bytes: self.max_frame_bytes,
            notify_depth: self.notify_depth,
            poll_interval: self.poll_interval,
            capture_pause: self.capture_pause,
            drain_interval: self.drain_interval,
            stop_timeout: self.stop_timeout,
        }
    }
}

fn read_config_file(path: &Path) -> Result<MulticamConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse config {}", path.display()))
}
