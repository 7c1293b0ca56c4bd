use std::time::Instant;

use crate::error::GridError;

pub const ROWS: usize = 8;
pub const COLS: usize = 12;
pub const CELL_COUNT: usize = ROWS * COLS;
pub const MAX_BRIGHTNESS: u8 = 100;

/// One LED position and its time accounting for the current session.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Cell {
    pub brightness: u8,
    /// Sum of brightness x seconds over every interval closed this session.
    pub accumulated_weight: f64,
    /// Instant through which `accumulated_weight` already covers `brightness`.
    /// `None` while no session is running.
    pub last_accounted_at: Option<Instant>,
}

impl Cell {
    /// Fold `[last_accounted_at, now)` at the current brightness into the
    /// accumulator and move the mark to `now`.
    pub(crate) fn close_interval(&mut self, now: Instant) {
        if let Some(mark) = self.last_accounted_at {
            if now > mark {
                let dt = now.duration_since(mark).as_secs_f64();
                self.accumulated_weight += f64::from(self.brightness) * dt;
                self.last_accounted_at = Some(now);
            }
        }
    }

    pub(crate) fn open_session(&mut self, now: Instant) {
        self.accumulated_weight = 0.0;
        self.last_accounted_at = Some(now);
    }
}

/// The 8x12 brightness grid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Matrix {
    cells: [[Cell; COLS]; ROWS],
}

impl Matrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, row: usize, col: usize) -> Result<u8, GridError> {
        self.cell(row, col).map(|cell| cell.brightness)
    }

    /// Set a cell's target brightness. Nothing changes on error.
    pub fn set(&mut self, row: usize, col: usize, value: u8) -> Result<(), GridError> {
        validate(row, col, value)?;
        self.cells[row][col].brightness = value;
        Ok(())
    }

    pub fn cell(&self, row: usize, col: usize) -> Result<&Cell, GridError> {
        self.cells
            .get(row)
            .and_then(|r| r.get(col))
            .ok_or(GridError::InvalidCell { row, col })
    }

    pub(crate) fn cell_mut(&mut self, row: usize, col: usize) -> Result<&mut Cell, GridError> {
        self.cells
            .get_mut(row)
            .and_then(|r| r.get_mut(col))
            .ok_or(GridError::InvalidCell { row, col })
    }

    /// `(row, col, brightness)` in row-major order, for display.
    pub fn all_cells(&self) -> impl Iterator<Item = (usize, usize, u8)> + '_ {
        self.cells.iter().enumerate().flat_map(|(row, cells)| {
            cells
                .iter()
                .enumerate()
                .map(move |(col, cell)| (row, col, cell.brightness))
        })
    }

    /// Brightness values in wire order: columns outer, rows inner.
    pub fn column_major(&self) -> impl Iterator<Item = u8> + '_ {
        (0..COLS).flat_map(move |col| (0..ROWS).map(move |row| self.cells[row][col].brightness))
    }

    pub fn brightness_snapshot(&self) -> [[u8; COLS]; ROWS] {
        let mut out = [[0u8; COLS]; ROWS];
        for (row, col, value) in self.all_cells() {
            out[row][col] = value;
        }
        out
    }

    /// Zero every cell's brightness. Accounting fields are left alone.
    pub fn clear(&mut self) {
        self.cells_mut().for_each(|cell| cell.brightness = 0);
    }

    pub(crate) fn cells_mut(&mut self) -> impl Iterator<Item = &mut Cell> {
        self.cells.iter_mut().flat_map(|row| row.iter_mut())
    }
}

/// Check coordinates and value without touching any grid.
pub fn validate(row: usize, col: usize, value: u8) -> Result<(), GridError> {
    if row >= ROWS || col >= COLS {
        return Err(GridError::InvalidCell { row, col });
    }
    if value > MAX_BRIGHTNESS {
        return Err(GridError::OutOfRange { row, col, value });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_set_and_get() {
        let mut matrix = Matrix::new();
        matrix.set(3, 7, 42).unwrap();
        assert_eq!(matrix.get(3, 7).unwrap(), 42);
        assert_eq!(matrix.get(0, 0).unwrap(), 0);
    }

    #[test]
    fn test_out_of_range_leaves_matrix_unchanged() {
        let mut matrix = Matrix::new();
        matrix.set(0, 0, 20).unwrap();
        let before = matrix.clone();

        let err = matrix.set(0, 0, 150).unwrap_err();
        assert_eq!(err, GridError::OutOfRange { row: 0, col: 0, value: 150 });
        assert_eq!(matrix, before);
    }

    #[test]
    fn test_invalid_cell() {
        let mut matrix = Matrix::new();
        assert_eq!(matrix.set(8, 0, 10), Err(GridError::InvalidCell { row: 8, col: 0 }));
        assert_eq!(matrix.get(0, 12), Err(GridError::InvalidCell { row: 0, col: 12 }));
    }

    #[test]
    fn test_all_cells_row_major() {
        let mut matrix = Matrix::new();
        matrix.set(0, 1, 5).unwrap();
        matrix.set(1, 0, 9).unwrap();

        let cells: Vec<_> = matrix.all_cells().collect();
        assert_eq!(cells.len(), CELL_COUNT);
        assert_eq!(cells[0], (0, 0, 0));
        assert_eq!(cells[1], (0, 1, 5));
        assert_eq!(cells[COLS], (1, 0, 9));
        assert_eq!(cells[CELL_COUNT - 1], (7, 11, 0));
    }

    #[test]
    fn test_column_major_order() {
        let mut matrix = Matrix::new();
        matrix.set(0, 1, 5).unwrap();
        matrix.set(1, 0, 9).unwrap();

        let values: Vec<_> = matrix.column_major().collect();
        assert_eq!(values.len(), CELL_COUNT);
        assert_eq!(values[1], 9); // row 1, col 0
        assert_eq!(values[ROWS], 5); // row 0, col 1
    }

    #[test]
    fn test_close_interval_accumulates_once() {
        let t0 = Instant::now();
        let mut cell = Cell { brightness: 40, ..Cell::default() };
        cell.open_session(t0);

        let t1 = t0 + Duration::from_secs(5);
        cell.close_interval(t1);
        cell.close_interval(t1);
        assert!((cell.accumulated_weight - 200.0).abs() < 1e-9);
        assert_eq!(cell.last_accounted_at, Some(t1));
    }

    #[test]
    fn test_close_interval_ignored_without_session() {
        let mut cell = Cell { brightness: 40, ..Cell::default() };
        cell.close_interval(Instant::now());
        assert_eq!(cell.accumulated_weight, 0.0);
        assert_eq!(cell.last_accounted_at, None);
    }
}
