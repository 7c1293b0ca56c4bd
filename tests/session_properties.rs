//! Property tests for the session accounting and the wire frame.

use ledgrid_control::protocol::{decode_frame, encode_frame};
use ledgrid_control::recorder::MemoryRecorder;
use ledgrid_control::session::{ManualClock, SessionController};
use ledgrid_control::sink::MemorySink;
use ledgrid_control::{Matrix, COLS, ROWS};
use proptest::prelude::*;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Step {
    Edit { row: usize, col: usize, value: u8 },
    Tick,
    Wait(u64),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0..ROWS, 0..COLS, 0u8..=100).prop_map(|(row, col, value)| Step::Edit { row, col, value }),
        Just(Step::Tick),
        (1u64..5_000).prop_map(Step::Wait),
    ]
}

fn controller() -> (SessionController<MemorySink, MemoryRecorder, ManualClock>, ManualClock) {
    let clock = ManualClock::new();
    let ctl = SessionController::new(MemorySink::new(), MemoryRecorder::new(), clock.clone());
    (ctl, clock)
}

proptest! {
    /// The live average equals the brightness integral, computed here
    /// independently, divided by the session length.
    #[test]
    fn average_matches_integral(steps in proptest::collection::vec(step(), 1..60)) {
        let (mut ctl, clock) = controller();
        ctl.turn_on();

        let mut held = [[0.0f64; COLS]; ROWS];
        let mut integral = [[0.0f64; COLS]; ROWS];
        let mut total_ms = 0u64;

        for step in &steps {
            match *step {
                Step::Edit { row, col, value } => {
                    ctl.set_brightness(row, col, value).unwrap();
                    held[row][col] = f64::from(value);
                }
                Step::Tick => {
                    ctl.tick();
                }
                Step::Wait(ms) => {
                    clock.advance(Duration::from_millis(ms));
                    total_ms += ms;
                    let secs = ms as f64 / 1000.0;
                    for row in 0..ROWS {
                        for col in 0..COLS {
                            integral[row][col] += held[row][col] * secs;
                        }
                    }
                }
            }
        }

        let total = total_ms as f64 / 1000.0;
        for row in 0..ROWS {
            for col in 0..COLS {
                let expected = if total_ms == 0 { held[row][col] } else { integral[row][col] / total };
                let actual = ctl.average(row, col).unwrap();
                prop_assert!((actual - expected).abs() < 1e-6,
                    "R{}C{}: {} != {}", row + 1, col + 1, actual, expected);
            }
        }

        let summary = ctl.turn_off().summary.unwrap();
        for cell in &summary.cells {
            let expected = if total_ms == 0 {
                held[cell.row][cell.col]
            } else {
                integral[cell.row][cell.col] / total
            };
            prop_assert!((cell.average - expected).abs() < 1e-6);
        }
    }

    /// Edits while off only stage brightness.
    #[test]
    fn edits_while_off_leave_accounting_alone(
        edits in proptest::collection::vec((0..ROWS, 0..COLS, 0u8..=100), 1..40),
    ) {
        let (mut ctl, clock) = controller();
        for (row, col, value) in edits {
            clock.advance_secs(1);
            ctl.set_brightness(row, col, value).unwrap();
            let cell = ctl.matrix().cell(row, col).unwrap();
            prop_assert_eq!(cell.accumulated_weight, 0.0);
            prop_assert!(cell.last_accounted_at.is_none());
            prop_assert_eq!(cell.brightness, value);
        }
    }

    #[test]
    fn frame_decodes_to_same_values(values in proptest::collection::vec(0u8..=100, ROWS * COLS)) {
        let mut matrix = Matrix::new();
        for (i, value) in values.iter().enumerate() {
            matrix.set(i / COLS, i % COLS, *value).unwrap();
        }
        let decoded = decode_frame(&encode_frame(&matrix)).unwrap();
        prop_assert_eq!(decoded.brightness_snapshot(), matrix.brightness_snapshot());
    }

    #[test]
    fn out_of_range_values_are_rejected(row in 0..ROWS, col in 0..COLS, value in 101u8..=255) {
        let (mut ctl, _clock) = controller();
        ctl.turn_on();
        let before = ctl.matrix().clone();
        prop_assert!(ctl.set_brightness(row, col, value).is_err());
        prop_assert_eq!(ctl.matrix(), &before);
    }
}
