pub mod clock;
pub mod dispatcher;
pub mod state;

pub use clock::PacingClock;
pub use dispatcher::{CancellableTimer, Dispatcher, Task};
pub use state::PlaybackStatus;
