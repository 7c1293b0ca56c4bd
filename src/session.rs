use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::averaging::time_weighted_average;
use crate::error::{GridError, PersistenceError, TransmissionError};
use crate::matrix::{self, Matrix, CELL_COUNT};
use crate::protocol::encode_frame;
use crate::recorder::SessionRecorder;
use crate::sink::FrameSink;

/// Source of monotonic and calendar time.
pub trait Clock: Send {
    fn now(&self) -> Instant;
    fn wall(&self) -> DateTime<Local>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualTime>>,
}

#[derive(Debug)]
struct ManualTime {
    base: Instant,
    wall_base: DateTime<Local>,
    offset: Duration,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock {
            inner: Arc::new(Mutex::new(ManualTime {
                base: Instant::now(),
                wall_base: Local::now(),
                offset: Duration::ZERO,
            })),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.lock().offset += by;
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualTime> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let t = self.lock();
        t.base + t.offset
    }

    fn wall(&self) -> DateTime<Local> {
        let t = self.lock();
        // Offsets in tests are far below chrono's range limit.
        t.wall_base + chrono::Duration::from_std(t.offset).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

#[derive(Debug, Clone, Copy)]
struct ActiveSession {
    started_at: Instant,
    started_wall: DateTime<Local>,
}

/// Final per-cell figures of a closed session.
#[derive(Debug, Clone, PartialEq)]
pub struct CellAverage {
    pub row: usize,
    pub col: usize,
    pub accumulated_weight: f64,
    /// Time-weighted average brightness in percent.
    pub average: f64,
}

impl CellAverage {
    pub fn label(&self) -> String {
        cell_label(self.row, self.col)
    }
}

/// A closed session, handed to the [`SessionRecorder`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub started: DateTime<Local>,
    pub ended: DateTime<Local>,
    pub elapsed_secs: f64,
    /// All 96 cells in row-major order.
    pub cells: Vec<CellAverage>,
}

impl SessionSummary {
    pub fn cell(&self, row: usize, col: usize) -> Option<&CellAverage> {
        self.cells.iter().find(|c| c.row == row && c.col == col)
    }
}

/// What happened as a side effect of a controller call.
///
/// Transmission and persistence failures are reported here rather than
/// returned as errors: the state change they belong to has already happened.
#[derive(Debug, Default)]
pub struct Outcome {
    /// A frame was handed to the sink.
    pub transmitted: bool,
    pub transmission_error: Option<TransmissionError>,
    pub persistence_error: Option<PersistenceError>,
    /// Set when the call closed a session.
    pub summary: Option<SessionSummary>,
}

/// Per-cell values for display.
#[derive(Debug, Clone, PartialEq)]
pub struct CellView {
    pub row: usize,
    pub col: usize,
    pub brightness: u8,
    pub average: f64,
}

impl CellView {
    pub fn label(&self) -> String {
        format!(
            "{}\nNow: {}%\nAvg: {:.1}%",
            cell_label(self.row, self.col),
            self.brightness,
            self.average
        )
    }
}

/// Everything a front end needs to draw the grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridView {
    pub active: bool,
    pub elapsed: String,
    /// Row-major
    pub cells: Vec<CellView>,
}

/// `R{row}C{col}` with 1-based numbering.
pub fn cell_label(row: usize, col: usize) -> String {
    format!("R{}C{}", row + 1, col + 1)
}

/// Session running time as `HH:MM:SS`, or `0s` with no session.
pub fn format_elapsed(elapsed: Option<Duration>) -> String {
    match elapsed {
        None => "0s".to_string(),
        Some(d) => {
            let secs = d.as_secs();
            let (hrs, rem) = (secs / 3600, secs % 3600);
            let (mins, secs) = (rem / 60, rem % 60);
            format!("{:02}:{:02}:{:02}", hrs, mins, secs)
        }
    }
}

/// Owns the grid and the session, and is the only thing that mutates them.
pub struct SessionController<S, R, C = SystemClock> {
    matrix: Matrix,
    session: Option<ActiveSession>,
    sink: S,
    recorder: R,
    clock: C,
}

impl<S: FrameSink, R: SessionRecorder, C: Clock> SessionController<S, R, C> {
    pub fn new(sink: S, recorder: R, clock: C) -> Self {
        SessionController {
            matrix: Matrix::new(),
            session: None,
            sink,
            recorder,
            clock,
        }
    }

    pub fn matrix(&self) -> &Matrix {
        &self.matrix
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn brightness(&self, row: usize, col: usize) -> Result<u8, GridError> {
        self.matrix.get(row, col)
    }

    /// Live average for one cell, open interval included.
    pub fn average(&self, row: usize, col: usize) -> Result<f64, GridError> {
        self.average_at(row, col, self.clock.now())
    }

    pub fn average_at(&self, row: usize, col: usize, now: Instant) -> Result<f64, GridError> {
        let cell = self.matrix.cell(row, col)?;
        Ok(time_weighted_average(cell, self.session.map(|s| s.started_at), now))
    }

    pub fn elapsed(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.session
            .map(|s| now.saturating_duration_since(s.started_at))
    }

    pub fn elapsed_display(&self) -> String {
        format_elapsed(self.elapsed())
    }

    /// Set a cell's brightness.
    ///
    /// While a session is on, the interval the old value was held for is
    /// closed first and the full matrix is sent. While off the value is only
    /// staged for the next session.
    pub fn set_brightness(&mut self, row: usize, col: usize, value: u8) -> Result<Outcome, GridError> {
        matrix::validate(row, col, value)?;

        if self.session.is_none() {
            self.matrix.set(row, col, value)?;
            debug!("Staged {} = {}%", cell_label(row, col), value);
            return Ok(Outcome::default());
        }

        let now = self.clock.now();
        let cell = self.matrix.cell_mut(row, col)?;
        cell.close_interval(now);
        cell.last_accounted_at = Some(now);
        cell.brightness = value;
        debug!("Set {} = {}%", cell_label(row, col), value);

        Ok(self.transmit())
    }

    pub fn set_session_active(&mut self, active: bool) -> Outcome {
        if active {
            self.turn_on()
        } else {
            self.turn_off()
        }
    }

    pub fn toggle(&mut self) -> Outcome {
        let active = !self.is_active();
        self.set_session_active(active)
    }

    /// Start a session and send the staged matrix. No-op if already on.
    pub fn turn_on(&mut self) -> Outcome {
        if self.session.is_some() {
            return Outcome::default();
        }

        let now = self.clock.now();
        let wall = self.clock.wall();
        self.session = Some(ActiveSession {
            started_at: now,
            started_wall: wall,
        });
        self.matrix.cells_mut().for_each(|cell| cell.open_session(now));
        info!("Session started at {}", wall.format("%Y-%m-%d %H:%M:%S"));

        self.transmit()
    }

    /// End the session: close every open interval, blank the device, then
    /// hand the summary to the recorder. No-op if already off.
    pub fn turn_off(&mut self) -> Outcome {
        let Some(session) = self.session else {
            return Outcome::default();
        };

        let now = self.clock.now();
        let ended = self.clock.wall();
        self.matrix.cells_mut().for_each(|cell| cell.close_interval(now));
        let summary = self.summarize(session, now, ended);

        // Device goes dark before anything else can fail.
        self.matrix.clear();
        let mut outcome = self.transmit();

        if let Err(e) = self.recorder.record(&summary) {
            error!("Error saving session data: {}", e);
            outcome.persistence_error = Some(e);
        }

        self.session = None;
        self.matrix
            .cells_mut()
            .for_each(|cell| cell.last_accounted_at = None);
        info!("Session ended after {:.2} seconds", summary.elapsed_secs);

        outcome.summary = Some(summary);
        outcome
    }

    /// Fold elapsed time into every cell and return the running time.
    ///
    /// Does not transmit.
    pub fn tick(&mut self) -> String {
        if self.session.is_some() {
            let now = self.clock.now();
            self.matrix.cells_mut().for_each(|cell| cell.close_interval(now));
        }
        self.elapsed_display()
    }

    /// Send the current matrix outside of an edit, e.g. to put the device in
    /// a known state at start-up.
    pub fn send_matrix(&mut self) -> Result<(), TransmissionError> {
        match self.transmit().transmission_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn view(&self) -> GridView {
        let now = self.clock.now();
        let started_at = self.session.map(|s| s.started_at);
        let mut cells = Vec::with_capacity(CELL_COUNT);
        for (row, col, brightness) in self.matrix.all_cells() {
            let average = self
                .matrix
                .cell(row, col)
                .map(|cell| time_weighted_average(cell, started_at, now))
                .unwrap_or(0.0);
            cells.push(CellView {
                row,
                col,
                brightness,
                average,
            });
        }
        GridView {
            active: self.is_active(),
            elapsed: self.elapsed_display(),
            cells,
        }
    }

    pub fn close_sink(&mut self) {
        self.sink.close();
    }

    fn summarize(&self, session: ActiveSession, now: Instant, ended: DateTime<Local>) -> SessionSummary {
        let mut cells = Vec::with_capacity(CELL_COUNT);
        for (row, col, _) in self.matrix.all_cells() {
            if let Ok(cell) = self.matrix.cell(row, col) {
                cells.push(CellAverage {
                    row,
                    col,
                    accumulated_weight: cell.accumulated_weight,
                    average: time_weighted_average(cell, Some(session.started_at), now),
                });
            }
        }
        SessionSummary {
            started: session.started_wall,
            ended,
            elapsed_secs: now.saturating_duration_since(session.started_at).as_secs_f64(),
            cells,
        }
    }

    fn transmit(&mut self) -> Outcome {
        let mut outcome = Outcome::default();
        if !self.sink.is_open() {
            warn!("Sink not open; cannot send matrix");
            outcome.transmission_error = Some(TransmissionError::Closed);
            return outcome;
        }

        let frame = encode_frame(&self.matrix);
        outcome.transmitted = true;
        if let Err(e) = self.sink.write(&frame) {
            error!("Serial write failed: {}", e);
            outcome.transmission_error = Some(e);
        }
        outcome
    }
}
