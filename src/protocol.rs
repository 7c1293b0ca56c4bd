use crate::error::FrameError;
use crate::matrix::{Matrix, CELL_COUNT, MAX_BRIGHTNESS, ROWS};

const FRAME_START: u8 = b'<';
const FRAME_END: u8 = b'>';
const SEPARATOR: u8 = b',';

/// Build the device frame: `<` + 96 decimal values in column-major order
/// (columns outer, rows inner) joined by `,` + `>`.
///
/// The ordering is fixed by the receiving firmware.
pub fn encode_frame(matrix: &Matrix) -> Vec<u8> {
    // Worst case is "100," per cell plus the delimiters.
    let mut frame = Vec::with_capacity(CELL_COUNT * 4 + 2);
    frame.push(FRAME_START);
    for (i, value) in matrix.column_major().enumerate() {
        if i > 0 {
            frame.push(SEPARATOR);
        }
        frame.extend_from_slice(value.to_string().as_bytes());
    }
    frame.push(FRAME_END);
    frame
}

/// Parse a frame back into a matrix.
pub fn decode_frame(frame: &[u8]) -> Result<Matrix, FrameError> {
    let body = frame
        .strip_prefix(&[FRAME_START])
        .and_then(|rest| rest.strip_suffix(&[FRAME_END]))
        .ok_or(FrameError::MissingDelimiter)?;

    let text = std::str::from_utf8(body)
        .map_err(|_| FrameError::BadValue(String::from_utf8_lossy(body).into_owned()))?;

    let values = text
        .split(SEPARATOR as char)
        .map(|part| match part.parse::<u8>() {
            Ok(v) if v <= MAX_BRIGHTNESS => Ok(v),
            _ => Err(FrameError::BadValue(part.to_string())),
        })
        .collect::<Result<Vec<u8>, _>>()?;

    if values.len() != CELL_COUNT {
        return Err(FrameError::WrongCount(values.len()));
    }

    let mut matrix = Matrix::new();
    for (i, value) in values.into_iter().enumerate() {
        let (col, row) = (i / ROWS, i % ROWS);
        matrix
            .set(row, col, value)
            .map_err(|e| FrameError::BadValue(e.to_string()))?;
    }
    Ok(matrix)
}
