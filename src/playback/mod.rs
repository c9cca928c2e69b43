pub mod device;
pub mod sensor;

pub use device::PlaybackDevice;
pub use sensor::{PlaybackSensor, SensorHooks};
