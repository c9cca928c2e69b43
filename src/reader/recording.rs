use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::core::{Notification, StreamIdentifier};
use crate::snapshot::{DeviceSnapshot, OptionId};

/// One stored sample of a [`Recording`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RecordedSample {
    Frame {
        timestamp_ns: u64,
        stream: StreamIdentifier,
        frame_number: u64,
        #[serde(default)]
        data: Vec<u8>,
    },
    Option {
        timestamp_ns: u64,
        sensor_index: u32,
        option: OptionId,
        value: f32,
    },
    Notification {
        timestamp_ns: u64,
        sensor_index: u32,
        notification: Notification,
    },
    Invalid {
        timestamp_ns: u64,
        reason: String,
    },
}

impl RecordedSample {
    pub fn timestamp(&self) -> Duration {
        let ns = match self {
            Self::Frame { timestamp_ns, .. }
            | Self::Option { timestamp_ns, .. }
            | Self::Notification { timestamp_ns, .. }
            | Self::Invalid { timestamp_ns, .. } => *timestamp_ns,
        };
        Duration::from_nanos(ns)
    }
}

/// Device description plus time-ordered samples, stored as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub file_name: String,
    pub device: DeviceSnapshot,
    pub samples: Vec<RecordedSample>,
}

fn nanos(timestamp: Duration) -> u64 {
    u64::try_from(timestamp.as_nanos()).unwrap_or(u64::MAX)
}

impl Recording {
    pub fn new(file_name: impl Into<String>, device: DeviceSnapshot) -> Self {
        Self {
            file_name: file_name.into(),
            device,
            samples: Vec::new(),
        }
    }

    pub fn with_frame(mut self, timestamp: Duration, stream: StreamIdentifier, frame_number: u64) -> Self {
        self.samples.push(RecordedSample::Frame {
            timestamp_ns: nanos(timestamp),
            stream,
            frame_number,
            data: Vec::new(),
        });
        self
    }

    pub fn with_option(mut self, timestamp: Duration, sensor_index: u32, option: OptionId, value: f32) -> Self {
        self.samples.push(RecordedSample::Option {
            timestamp_ns: nanos(timestamp),
            sensor_index,
            option,
            value,
        });
        self
    }

    pub fn with_notification(mut self, timestamp: Duration, sensor_index: u32, notification: Notification) -> Self {
        self.samples.push(RecordedSample::Notification {
            timestamp_ns: nanos(timestamp),
            sensor_index,
            notification,
        });
        self
    }

    pub fn with_invalid(mut self, timestamp: Duration, reason: impl Into<String>) -> Self {
        self.samples.push(RecordedSample::Invalid {
            timestamp_ns: nanos(timestamp),
            reason: reason.into(),
        });
        self
    }

    /// Stable sort by timestamp; ties keep insertion order
    pub fn sort(&mut self) {
        self.samples.sort_by_key(RecordedSample::timestamp);
    }

    pub fn duration(&self) -> Duration {
        self.samples
            .iter()
            .map(RecordedSample::timestamp)
            .max()
            .unwrap_or(Duration::ZERO)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .context(format!("Failed to read recording from {:?}", path))?;
        let mut recording: Recording =
            serde_json::from_str(&json).context("Failed to deserialize recording")?;
        recording.sort();
        Ok(recording)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).context("Failed to serialize recording")?;
        fs::write(path, json).context(format!("Failed to write recording to {:?}", path))?;
        Ok(())
    }
}
