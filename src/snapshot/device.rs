use serde::{Deserialize, Serialize};

use super::{Extensions, OptionId};
use crate::core::{Extrinsics, StreamIdentifier, StreamProfile};

/// Recorded description of one sensor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub extensions: Extensions,
    pub stream_profiles: Vec<StreamProfile>,
}

impl SensorSnapshot {
    pub fn new(extensions: Extensions, stream_profiles: Vec<StreamProfile>) -> Self {
        Self {
            extensions,
            stream_profiles,
        }
    }
}

/// A stream's transform into the reference frame of its extrinsics group
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtrinsicsEntry {
    pub stream: StreamIdentifier,
    pub group: u32,
    pub to_reference: Extrinsics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtrinsicsTable {
    entries: Vec<ExtrinsicsEntry>,
}

impl ExtrinsicsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or replace) the transform of `stream` inside `group`
    pub fn insert(&mut self, stream: StreamIdentifier, group: u32, to_reference: Extrinsics) {
        self.entries.retain(|e| e.stream != stream);
        self.entries.push(ExtrinsicsEntry {
            stream,
            group,
            to_reference,
        });
    }

    pub fn get(&self, stream: &StreamIdentifier) -> Option<&ExtrinsicsEntry> {
        self.entries.iter().find(|e| &e.stream == stream)
    }

    pub fn entries(&self) -> &[ExtrinsicsEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Recorded description of a whole device
///
/// The order of `sensors` defines sensor indices for the lifetime of a
/// playback device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub device_extensions: Extensions,
    pub sensors: Vec<SensorSnapshot>,
    #[serde(default)]
    pub extrinsics: ExtrinsicsTable,
}

impl DeviceSnapshot {
    pub fn sensor(&self, index: u32) -> Option<&SensorSnapshot> {
        self.sensors.get(index as usize)
    }

    /// Apply a recorded option change; false when the sensor or option is unknown
    pub fn apply_option(&mut self, sensor_index: u32, option: OptionId, value: f32) -> bool {
        self.sensors
            .get_mut(sensor_index as usize)
            .and_then(|s| s.extensions.options_mut())
            .map(|options| options.set_value(option, value))
            .unwrap_or(false)
    }
}
