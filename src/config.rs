//! Pipeline and application configuration
//!
//! `PipelineConfig` is what the processing loop runs with; `AppConfig`
//! wraps it with monitoring and playback settings and persists as TOML.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec::SampleFormat;
use crate::constants::*;
use crate::error::{Error, Result};

/// Format of one pipeline run. Immutable while the loop is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sample_rate_hz: u32,
    /// 8 or 16
    pub bits_per_sample: u16,
    /// Samples per frame. Smaller means lower latency but more per-frame overhead.
    pub frame_size: usize,
    /// Always 1
    pub channel_count: u16,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: DEFAULT_SAMPLE_RATE,
            bits_per_sample: DEFAULT_BITS_PER_SAMPLE,
            frame_size: DEFAULT_FRAME_SIZE,
            channel_count: 1,
        }
    }
}

impl PipelineConfig {
    pub fn new(sample_rate_hz: u32, bits_per_sample: u16, frame_size: usize) -> Self {
        Self {
            sample_rate_hz,
            bits_per_sample,
            frame_size,
            channel_count: 1,
        }
    }

    /// Check every field; unsupported bit depths surface as codec errors
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate_hz == 0 {
            return Err(Error::Config("sample_rate_hz must be positive".into()));
        }
        if self.frame_size == 0 {
            return Err(Error::Config("frame_size must be positive".into()));
        }
        if self.channel_count != 1 {
            return Err(Error::Config(format!(
                "only mono is supported, got {} channels",
                self.channel_count
            )));
        }
        SampleFormat::from_bits(self.bits_per_sample)?;
        Ok(())
    }

    pub fn sample_format(&self) -> Result<SampleFormat> {
        Ok(SampleFormat::from_bits(self.bits_per_sample)?)
    }

    /// Bytes exchanged with a device per frame
    pub fn frame_bytes(&self) -> usize {
        self.frame_size * (self.bits_per_sample as usize / 8)
    }

    /// Real-time budget of one frame
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(self.frame_size as f64 / self.sample_rate_hz as f64)
    }

    /// Same format with a different frame size
    pub fn with_frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = frame_size;
        self
    }
}

/// Settings for monitoring consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Input snapshots retained for history consumers (0 disables history)
    pub history_frames: usize,
    /// How often a polling monitor should sample the pipeline
    pub poll_interval_ms: u64,
    /// Loudness reported for silent frames
    pub meter_floor_dbfs: f32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            history_frames: DEFAULT_HISTORY_FRAMES,
            poll_interval_ms: 100,
            meter_floor_dbfs: DBFS_FLOOR,
        }
    }
}

/// Settings for the playback stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Block on `drain()` after every frame instead of once at shutdown
    pub drain_each_frame: bool,
}

/// Top-level application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub monitor: MonitorConfig,
    pub playback: PlaybackConfig,
}

impl AppConfig {
    /// Default config file location for this platform
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "pcm-passthrough")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.pipeline.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Load from the default location, falling back to defaults if absent
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}
