//! Brightness control for an 8x12 LED grid driven over a serial link.
//!
//! The [`session::SessionController`] owns the grid and tracks how long each
//! cell spends at each brightness while a session is on, so a time-weighted
//! average can be reported when the session ends. Frames go out through a
//! [`sink::FrameSink`] in the `<v,v,...,v>` wire format from [`protocol`].

pub mod averaging;
pub mod config;
pub mod engine;
pub mod error;
pub mod matrix;
pub mod protocol;
pub mod recorder;
pub mod session;
pub mod sink;

pub use config::Config;
pub use engine::{Engine, EngineHandle};
pub use error::{FrameError, GridError, PersistenceError, TransmissionError};
pub use matrix::{Cell, Matrix, CELL_COUNT, COLS, MAX_BRIGHTNESS, ROWS};
pub use session::{Clock, SessionController, SessionSummary, SystemClock};
