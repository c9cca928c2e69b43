use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_UNIQUE_ID: AtomicU32 = AtomicU32::new(1);

/// Allocate a process-wide unique stream id
pub fn next_unique_id() -> u32 {
    NEXT_UNIQUE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Stream classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StreamType {
    Depth,
    Color,
    Infrared,
    Fisheye,
    Gyro,
    Accel,
    Pose,
    Confidence,
}

/// Pixel / sample format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    Z16,
    Rgb8,
    Bgr8,
    Yuyv,
    Y8,
    Y16,
    MotionXyz32f,
    SixDof,
    Raw8,
}

/// Recorded stream profile
///
/// `unique_id` is zero as loaded from a recording and is assigned by the
/// playback sensor when it is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamProfile {
    #[serde(default)]
    pub unique_id: u32,
    pub stream_type: StreamType,
    pub stream_index: u32,
    pub format: Format,
    pub fps: u32,
    #[serde(default)]
    pub resolution: Option<(u32, u32)>,
}

impl StreamProfile {
    pub fn new(stream_type: StreamType, stream_index: u32, format: Format, fps: u32) -> Self {
        Self {
            unique_id: 0,
            stream_type,
            stream_index,
            format,
            fps,
            resolution: None,
        }
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = Some((width, height));
        self
    }

    /// Clone this profile under a freshly allocated unique id
    pub fn reindexed(&self) -> Self {
        Self {
            unique_id: next_unique_id(),
            ..self.clone()
        }
    }

    /// True when both profiles describe the same recorded stream
    pub fn same_stream(&self, stream_type: StreamType, stream_index: u32) -> bool {
        self.stream_type == stream_type && self.stream_index == stream_index
    }
}

impl fmt::Display for StreamProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}/{} {:?} @{}fps (uid {})",
            self.stream_type, self.stream_index, self.format, self.fps, self.unique_id
        )
    }
}

/// Routing key for a recorded stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamIdentifier {
    pub device_index: u32,
    pub sensor_index: u32,
    pub stream_type: StreamType,
    pub stream_index: u32,
}

impl StreamIdentifier {
    pub fn new(sensor_index: u32, stream_type: StreamType, stream_index: u32) -> Self {
        Self {
            device_index: 0,
            sensor_index,
            stream_type,
            stream_index,
        }
    }

    pub fn for_profile(sensor_index: u32, profile: &StreamProfile) -> Self {
        Self::new(sensor_index, profile.stream_type, profile.stream_index)
    }
}

impl fmt::Display for StreamIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{:?}/{}",
            self.device_index, self.sensor_index, self.stream_type, self.stream_index
        )
    }
}
