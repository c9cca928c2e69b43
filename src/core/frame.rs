use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::StreamProfile;

/// Single-owner frame as delivered to application callbacks
///
/// Frames are not `Clone`: the reader hands one to the engine, the engine
/// moves it into exactly one stream dispatcher task, and that task moves it
/// into the callback.
#[derive(Debug)]
pub struct Frame {
    /// Capture timestamp relative to the start of the recording
    pub timestamp: Duration,

    /// Sequential frame number as recorded
    pub frame_number: u64,

    /// Raw payload
    pub data: Vec<u8>,

    /// Side-channel information (exposure, gain, ...)
    pub metadata: HashMap<String, i64>,

    profile: Option<Arc<StreamProfile>>,
    sensor_index: Option<u32>,
}

impl Frame {
    pub fn new(timestamp: Duration, frame_number: u64) -> Self {
        Self {
            timestamp,
            frame_number,
            data: Vec::new(),
            metadata: HashMap::new(),
            profile: None,
            sensor_index: None,
        }
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    /// Stream this frame belongs to, once the owning sensor has stamped it
    pub fn profile(&self) -> Option<&Arc<StreamProfile>> {
        self.profile.as_ref()
    }

    /// Index of the sensor that delivered this frame
    pub fn sensor_index(&self) -> Option<u32> {
        self.sensor_index
    }

    pub(crate) fn stamp(&mut self, sensor_index: u32, profile: Arc<StreamProfile>) {
        self.sensor_index = Some(sensor_index);
        self.profile = Some(profile);
    }
}

/// Application frame callback
pub type FrameCallback = Arc<dyn Fn(Frame) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Format, StreamType};

    #[test]
    fn test_stamp_sets_owner_and_profile() {
        let mut frame = Frame::new(Duration::from_millis(10), 3).with_data(vec![1, 2, 3]);
        assert!(frame.profile().is_none());

        let profile = Arc::new(StreamProfile::new(StreamType::Depth, 0, Format::Z16, 30).reindexed());
        frame.stamp(2, profile.clone());

        assert_eq!(frame.sensor_index(), Some(2));
        assert_eq!(frame.profile().map(|p| p.unique_id), Some(profile.unique_id));
        assert_eq!(frame.data, vec![1, 2, 3]);
    }
}
