//! Time-weighted average brightness, including the interval still open.

use std::time::Instant;

use crate::matrix::Cell;

/// Average brightness of `cell` over `[started_at, now]`.
///
/// Returns `0.0` when no session is running and the cell's current brightness
/// when the session is zero seconds long. The open interval
/// `[last_accounted_at, now)` is added here rather than folded into the cell,
/// so calling this between ticks gives the same answer a tick would.
pub fn time_weighted_average(cell: &Cell, started_at: Option<Instant>, now: Instant) -> f64 {
    let Some(started_at) = started_at else {
        return 0.0;
    };

    let total = signed_secs(started_at, now);
    if total <= 0.0 {
        return f64::from(cell.brightness);
    }

    let partial = cell
        .last_accounted_at
        .map(|mark| f64::from(cell.brightness) * signed_secs(mark, now).max(0.0))
        .unwrap_or(0.0);

    (cell.accumulated_weight + partial) / total
}

fn signed_secs(from: Instant, to: Instant) -> f64 {
    match to.checked_duration_since(from) {
        Some(d) => d.as_secs_f64(),
        None => -from.duration_since(to).as_secs_f64(),
    }
}
