use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::types::Timestamp;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the metering engine and its collaborators.
#[derive(Debug, Error)]
pub enum Error {
    /// `start()` was called on a task that is already running
    #[error("background task already running")]
    AlreadyRunning,
    /// The worker thread died outside the tick boundary and took the task with it
    #[error("background task state was lost, the worker thread panicked")]
    TaskLost,
    #[error("invalid ADC channel index {0}, expected 0-7")]
    InvalidChannelIndex(u8),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("duplicate channel name {0}")]
    DuplicateChannel(String),
    #[error("can't find channel {name} to be added to sum channel {sum}")]
    UnknownChannel { name: String, sum: String },
    #[error("failed to read configuration {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("system call failed: {0}")]
    Sys(#[from] nix::Error),
    #[error("transport returned {received} readings for {expected} commands on chip {chip}")]
    ShortRead {
        chip: u32,
        expected: usize,
        received: usize,
    },
    #[error("channel {channel} has fewer than two samples")]
    NoSamples { channel: String },
    #[error("channel {channel} has samples until {last_sample} us, window needs {needed_until} us")]
    InsufficientSamples {
        channel: String,
        needed_until: Timestamp,
        last_sample: Timestamp,
    },
}
