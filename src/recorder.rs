use log::info;
use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::PersistenceError;
use crate::session::SessionSummary;

const RULE_WIDTH: usize = 50;
const WALL_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Receives each closed session.
pub trait SessionRecorder: Send {
    fn record(&mut self, summary: &SessionSummary) -> Result<(), PersistenceError>;
}

impl<R: SessionRecorder + ?Sized> SessionRecorder for Box<R> {
    fn record(&mut self, summary: &SessionSummary) -> Result<(), PersistenceError> {
        (**self).record(summary)
    }
}

/// Appends a text block per session to a log file.
pub struct LogFileRecorder {
    path: PathBuf,
}

impl LogFileRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        LogFileRecorder { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionRecorder for LogFileRecorder {
    fn record(&mut self, summary: &SessionSummary) -> Result<(), PersistenceError> {
        let to_err = |source| PersistenceError::Io {
            path: self.path.display().to_string(),
            source,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(to_err)?;
        file.write_all(format_summary(summary).as_bytes())
            .map_err(to_err)?;

        info!("Session data appended to {}", self.path.display());
        Ok(())
    }
}

/// Render the log block for one session.
pub fn format_summary(summary: &SessionSummary) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "Session Start: {}", summary.started.format(WALL_FORMAT));
    let _ = writeln!(out, "Session End:   {}", summary.ended.format(WALL_FORMAT));
    let _ = writeln!(out, "Total Session Time: {:.2} seconds", summary.elapsed_secs);
    let _ = writeln!(out, "Average Brightness per LED (%):");
    for cell in &summary.cells {
        let _ = writeln!(out, "{}: {:.2}%", cell.label(), cell.average);
    }
    let _ = writeln!(out, "{}", rule);
    out.push('\n');
    out
}

/// Keeps summaries in memory; clones share the same list.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecorder {
    state: Arc<Mutex<MemoryRecords>>,
}

#[derive(Debug, Default)]
struct MemoryRecords {
    summaries: Vec<SessionSummary>,
    failing: bool,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        self.lock().summaries.clone()
    }

    /// Make every following record call fail.
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryRecords> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SessionRecorder for MemoryRecorder {
    fn record(&mut self, summary: &SessionSummary) -> Result<(), PersistenceError> {
        let mut state = self.lock();
        if state.failing {
            return Err(PersistenceError::Io {
                path: "<memory>".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "recorder set to fail"),
            });
        }
        state.summaries.push(summary.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CellAverage;
    use chrono::{Local, TimeZone};

    fn summary() -> SessionSummary {
        let started = Local.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let ended = Local.with_ymd_and_hms(2025, 3, 1, 9, 0, 20).unwrap();
        let cells = (0..8)
            .flat_map(|row| (0..12).map(move |col| (row, col)))
            .map(|(row, col)| CellAverage {
                row,
                col,
                accumulated_weight: 0.0,
                average: if (row, col) == (0, 0) { 75.0 } else { 0.0 },
            })
            .collect();
        SessionSummary {
            started,
            ended,
            elapsed_secs: 20.0,
            cells,
        }
    }

    #[test]
    fn test_format_summary() {
        let text = format_summary(&summary());
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "=".repeat(50));
        assert_eq!(lines[1], "Session Start: 2025-03-01 09:00:00.000000");
        assert_eq!(lines[2], "Session End:   2025-03-01 09:00:20.000000");
        assert_eq!(lines[3], "Total Session Time: 20.00 seconds");
        assert_eq!(lines[4], "Average Brightness per LED (%):");
        assert_eq!(lines[5], "R1C1: 75.00%");
        assert_eq!(lines[6], "R1C2: 0.00%");
        assert_eq!(lines[5 + 95], "R8C12: 0.00%");
        assert_eq!(lines[5 + 96], "=".repeat(50));
        assert!(text.ends_with("\n\n"));
    }

    #[test]
    fn test_log_file_appends() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("instrument_log.txt");
        let mut recorder = LogFileRecorder::new(&path);

        recorder.record(&summary()).unwrap();
        recorder.record(&summary()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("Session Start:").count(), 2);
    }

    #[test]
    fn test_log_file_error_is_reported() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut recorder = LogFileRecorder::new(dir.path().join("missing").join("log.txt"));
        let err = recorder.record(&summary()).unwrap_err();
        assert!(matches!(err, PersistenceError::Io { .. }));
    }
}
