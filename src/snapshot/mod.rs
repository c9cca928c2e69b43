pub mod device;
pub mod extension;

pub use device::{DeviceSnapshot, ExtrinsicsEntry, ExtrinsicsTable, SensorSnapshot};
pub use extension::{
    CameraInfo, DepthSnapshot, DepthStereoSnapshot, ExtensionKind, ExtensionSnapshot,
    Extensions, InfoSnapshot, MotionSnapshot, OptionEntry, OptionId, OptionRange,
    OptionsSnapshot,
};
