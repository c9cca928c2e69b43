pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod playback;
pub mod reader;
pub mod snapshot;

pub use config::PlaybackConfig;
pub use engine::PlaybackStatus;
pub use error::{PlaybackError, Result};
pub use playback::{PlaybackDevice, PlaybackSensor};
pub use reader::{MemoryReader, Recording, RecordingReader};
