pub mod memory;
pub mod recording;
pub mod traits;

pub use memory::MemoryReader;
pub use recording::{RecordedSample, Recording};
pub use traits::{RecordingReader, SerializedData};
