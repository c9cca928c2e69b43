use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Playback engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Reproduce recorded inter-frame gaps
    #[serde(default = "default_real_time")]
    pub real_time: bool,

    /// Playback speed multiplier (1.0 = as recorded)
    #[serde(default = "default_frame_rate")]
    pub frame_rate: f64,

    /// Pending frames kept per open stream before the oldest is dropped
    #[serde(default = "default_stream_queue_capacity")]
    pub stream_queue_capacity: usize,

    /// How long a control operation may wait on the reader thread
    #[serde(default = "default_control_timeout_ms")]
    pub control_timeout_ms: u64,
}

fn default_real_time() -> bool {
    true
}

fn default_frame_rate() -> f64 {
    1.0
}

fn default_stream_queue_capacity() -> usize {
    16
}

fn default_control_timeout_ms() -> u64 {
    10_000
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            real_time: default_real_time(),
            frame_rate: default_frame_rate(),
            stream_queue_capacity: default_stream_queue_capacity(),
            control_timeout_ms: default_control_timeout_ms(),
        }
    }
}

impl PlaybackConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .context(format!("Failed to read playback config from {:?}", path))?;
        let config: PlaybackConfig =
            serde_json::from_str(&json).context("Failed to parse playback config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0) {
            anyhow::bail!("frame_rate must be positive, got {}", self.frame_rate);
        }
        if self.stream_queue_capacity == 0 {
            anyhow::bail!("stream_queue_capacity must be at least 1");
        }
        Ok(())
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }
}
