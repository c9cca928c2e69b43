use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationCategory {
    FramesTimeout,
    FrameCorrupted,
    HardwareError,
    HardwareEvent,
    FirmwareUpdateRecommended,
    PoseRelocalization,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

/// Recorded device notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub category: NotificationCategory,
    pub severity: Severity,
    pub description: String,
    /// Nanoseconds since the start of the recording
    pub timestamp_ns: u64,
    #[serde(default)]
    pub serialized_data: String,
}

impl Notification {
    pub fn new(category: NotificationCategory, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            description: description.into(),
            timestamp_ns: 0,
            serialized_data: String::new(),
        }
    }
}

pub type NotificationCallback = Arc<dyn Fn(Notification) + Send + Sync>;
