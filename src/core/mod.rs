pub mod extrinsics;
pub mod frame;
pub mod notification;
pub mod stream;

pub use extrinsics::{Extrinsics, ExtrinsicsRegistry, LazyExtrinsics, Pose};
pub use frame::{Frame, FrameCallback};
pub use notification::{Notification, NotificationCallback, NotificationCategory, Severity};
pub use stream::{Format, StreamIdentifier, StreamProfile, StreamType};
