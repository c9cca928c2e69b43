use thiserror::Error;

/// Errors surfaced by playback control operations
#[derive(Error, Debug)]
pub enum PlaybackError {
    /// Requested a stream that was never recorded
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Argument outside the accepted range
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Operation not allowed in the current state
    #[error("Wrong call sequence: {0}")]
    WrongCallSequence(String),

    /// A control operation did not complete on the reader thread in time
    #[error("Deadlock detected: {0} did not complete in time")]
    Deadlock(&'static str),

    /// Failure reported by the recording reader
    #[error("Reader error: {0:#}")]
    Reader(#[from] anyhow::Error),

    /// Worker thread could not be spawned
    #[error("Failed to spawn worker thread: {0}")]
    Thread(#[from] std::io::Error),

    /// The playback device was dropped
    #[error("Playback device is gone")]
    DeviceGone,
}

pub type Result<T> = std::result::Result<T, PlaybackError>;
