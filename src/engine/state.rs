use serde::{Deserialize, Serialize};
use std::fmt;

/// Externally visible playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaybackStatus {
    Stopped,
    Playing,
    Paused,
}

impl PlaybackStatus {
    /// Derive the status from the device's started and paused flags
    pub fn from_flags(is_started: bool, is_paused: bool) -> Self {
        match (is_started, is_paused) {
            (false, _) => Self::Stopped,
            (true, true) => Self::Paused,
            (true, false) => Self::Playing,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Stopped => "Stopped",
            Self::Playing => "Playing",
            Self::Paused => "Paused",
        }
    }
}

impl Default for PlaybackStatus {
    fn default() -> Self {
        Self::Stopped
    }
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
