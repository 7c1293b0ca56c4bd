use std::io;

use thiserror::Error;

/// Rejected edits. The grid is left untouched when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("brightness {value} at row {row}, column {col} is outside 0..=100")]
    OutOfRange { row: usize, col: usize, value: u8 },
    #[error("no cell at row {row}, column {col} (grid is 8x12)")]
    InvalidCell { row: usize, col: usize },
}

/// A frame that did not reach the device.
#[derive(Debug, Error)]
pub enum TransmissionError {
    #[error("sink is closed")]
    Closed,
    #[error("write timed out after {0:?}")]
    TimedOut(std::time::Duration),
    #[error("serial write failed: {0}")]
    Io(#[from] io::Error),
}

/// The session log could not be written.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to write session log {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Malformed wire frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame must start with '<' and end with '>'")]
    MissingDelimiter,
    #[error("frame holds {0} values, expected 96")]
    WrongCount(usize),
    #[error("invalid value {0:?} in frame")]
    BadValue(String),
}
