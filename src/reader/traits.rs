use anyhow::Result;
use std::time::Duration;

use crate::core::{Frame, Notification, StreamIdentifier};
use crate::snapshot::{DeviceSnapshot, OptionId};

/// One item read from a recording
#[derive(Debug)]
pub enum SerializedData {
    Frame {
        stream: StreamIdentifier,
        frame: Frame,
    },
    OptionChange {
        timestamp: Duration,
        sensor_index: u32,
        option: OptionId,
        value: f32,
    },
    Notification {
        timestamp: Duration,
        sensor_index: u32,
        notification: Notification,
    },
    /// A sample the reader could not decode
    InvalidFrame {
        timestamp: Duration,
        reason: String,
    },
    EndOfFile,
}

impl SerializedData {
    /// Sample time; zero for end of file
    pub fn timestamp(&self) -> Duration {
        match self {
            Self::Frame { frame, .. } => frame.timestamp,
            Self::OptionChange { timestamp, .. }
            | Self::Notification { timestamp, .. }
            | Self::InvalidFrame { timestamp, .. } => *timestamp,
            Self::EndOfFile => Duration::ZERO,
        }
    }

    pub fn is_frame(&self) -> bool {
        matches!(self, Self::Frame { .. })
    }
}

/// Source of recorded device descriptions and samples
///
/// Implemented by container parsers; the playback engine only ever calls it
/// from its reader thread or while holding the reader lock.
pub trait RecordingReader: Send {
    /// Device description as of `at` (option values recorded up to that time)
    fn query_device_description(&mut self, at: Duration) -> Result<DeviceSnapshot>;

    /// Next sample in time order; `EndOfFile` once exhausted
    fn read_next_data(&mut self) -> Result<SerializedData>;

    /// Position so the next read returns the first sample at or after `time`
    fn seek_to_time(&mut self, time: Duration) -> Result<()>;

    /// Last frame at or before `at` for every enabled stream
    fn fetch_last_frames(&mut self, at: Duration) -> Result<Vec<SerializedData>>;

    /// Rewind to the beginning
    fn reset(&mut self) -> Result<()>;

    fn query_duration(&self) -> Duration;

    /// Limit decoded frames to the given streams (additive)
    fn enable_stream(&mut self, filters: &[StreamIdentifier]) -> Result<()>;

    fn disable_stream(&mut self, filters: &[StreamIdentifier]) -> Result<()>;

    fn file_name(&self) -> &str;
}
