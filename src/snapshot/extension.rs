use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Capability a device or sensor snapshot may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExtensionKind {
    Info,
    Options,
    Depth,
    DepthStereo,
    Motion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CameraInfo {
    Name,
    SerialNumber,
    FirmwareVersion,
    RecommendedFirmwareVersion,
    PhysicalPort,
    ProductId,
    ProductLine,
    UsbTypeDescriptor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OptionId {
    Exposure,
    Gain,
    EnableAutoExposure,
    WhiteBalance,
    LaserPower,
    EmitterEnabled,
    DepthUnits,
    VisualPreset,
    FramesQueueSize,
    GlobalTimeEnabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptionRange {
    pub min: f32,
    pub max: f32,
    pub step: f32,
    pub default: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionEntry {
    pub value: f32,
    pub range: OptionRange,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfoSnapshot {
    pub values: BTreeMap<CameraInfo, String>,
}

impl InfoSnapshot {
    pub fn with(mut self, info: CameraInfo, value: impl Into<String>) -> Self {
        self.values.insert(info, value.into());
        self
    }

    pub fn get(&self, info: CameraInfo) -> Option<&str> {
        self.values.get(&info).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionsSnapshot {
    pub options: BTreeMap<OptionId, OptionEntry>,
}

impl OptionsSnapshot {
    pub fn with(mut self, id: OptionId, value: f32, range: OptionRange) -> Self {
        self.options.insert(
            id,
            OptionEntry {
                value,
                range,
                description: String::new(),
            },
        );
        self
    }

    pub fn get(&self, id: OptionId) -> Option<&OptionEntry> {
        self.options.get(&id)
    }

    /// Update the recorded value; returns false for options never recorded
    pub fn set_value(&mut self, id: OptionId, value: f32) -> bool {
        match self.options.get_mut(&id) {
            Some(entry) => {
                entry.value = value;
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub depth_units: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthStereoSnapshot {
    pub depth_units: f32,
    pub baseline_mm: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSnapshot {
    pub noise_variances: [f32; 3],
    pub bias_variances: [f32; 3],
}

/// Closed set of recorded extension states
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExtensionSnapshot {
    Info(InfoSnapshot),
    Options(OptionsSnapshot),
    Depth(DepthSnapshot),
    DepthStereo(DepthStereoSnapshot),
    Motion(MotionSnapshot),
}

impl ExtensionSnapshot {
    pub fn kind(&self) -> ExtensionKind {
        match self {
            Self::Info(_) => ExtensionKind::Info,
            Self::Options(_) => ExtensionKind::Options,
            Self::Depth(_) => ExtensionKind::Depth,
            Self::DepthStereo(_) => ExtensionKind::DepthStereo,
            Self::Motion(_) => ExtensionKind::Motion,
        }
    }
}

/// Extensions of one device or sensor, at most one per kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extensions {
    entries: BTreeMap<ExtensionKind, ExtensionSnapshot>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, extension: ExtensionSnapshot) -> Self {
        self.insert(extension);
        self
    }

    pub fn insert(&mut self, extension: ExtensionSnapshot) {
        self.entries.insert(extension.kind(), extension);
    }

    /// Capability query
    pub fn find(&self, kind: ExtensionKind) -> Option<&ExtensionSnapshot> {
        self.entries.get(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = ExtensionKind> + '_ {
        self.entries.keys().copied()
    }

    pub fn info(&self) -> Option<&InfoSnapshot> {
        match self.find(ExtensionKind::Info) {
            Some(ExtensionSnapshot::Info(info)) => Some(info),
            _ => None,
        }
    }

    pub fn options(&self) -> Option<&OptionsSnapshot> {
        match self.find(ExtensionKind::Options) {
            Some(ExtensionSnapshot::Options(options)) => Some(options),
            _ => None,
        }
    }

    pub fn options_mut(&mut self) -> Option<&mut OptionsSnapshot> {
        match self.entries.get_mut(&ExtensionKind::Options) {
            Some(ExtensionSnapshot::Options(options)) => Some(options),
            _ => None,
        }
    }

    /// Depth scale from either the plain or the stereo depth extension
    pub fn depth_units(&self) -> Option<f32> {
        match self.find(ExtensionKind::DepthStereo) {
            Some(ExtensionSnapshot::DepthStereo(stereo)) => Some(stereo.depth_units),
            _ => match self.find(ExtensionKind::Depth) {
                Some(ExtensionSnapshot::Depth(depth)) => Some(depth.depth_units),
                _ => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range() -> OptionRange {
        OptionRange {
            min: 0.0,
            max: 100.0,
            step: 1.0,
            default: 50.0,
        }
    }

    #[test]
    fn test_find_by_kind() {
        let extensions = Extensions::new()
            .with(ExtensionSnapshot::Info(InfoSnapshot::default().with(CameraInfo::Name, "D435")))
            .with(ExtensionSnapshot::Depth(DepthSnapshot { depth_units: 0.001 }));

        assert_eq!(extensions.info().and_then(|i| i.get(CameraInfo::Name)), Some("D435"));
        assert!(extensions.options().is_none());
        assert!(extensions.find(ExtensionKind::Motion).is_none());
        assert_eq!(extensions.depth_units(), Some(0.001));
    }

    #[test]
    fn test_stereo_depth_units_take_precedence() {
        let extensions = Extensions::new()
            .with(ExtensionSnapshot::Depth(DepthSnapshot { depth_units: 0.001 }))
            .with(ExtensionSnapshot::DepthStereo(DepthStereoSnapshot {
                depth_units: 0.0001,
                baseline_mm: 50.0,
            }));

        assert_eq!(extensions.depth_units(), Some(0.0001));
    }

    #[test]
    fn test_set_value_only_updates_recorded_options() {
        let mut extensions = Extensions::new().with(ExtensionSnapshot::Options(
            OptionsSnapshot::default().with(OptionId::Exposure, 33.0, range()),
        ));

        let options = extensions.options_mut().unwrap();
        assert!(options.set_value(OptionId::Exposure, 20.0));
        assert!(!options.set_value(OptionId::Gain, 1.0));
        assert_eq!(extensions.options().unwrap().get(OptionId::Exposure).unwrap().value, 20.0);
    }

    #[test]
    fn test_extensions_json_roundtrip() {
        let extensions = Extensions::new().with(ExtensionSnapshot::Options(
            OptionsSnapshot::default().with(OptionId::LaserPower, 150.0, range()),
        ));

        let json = serde_json::to_string(&extensions).unwrap();
        let back: Extensions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, extensions);
    }
}
