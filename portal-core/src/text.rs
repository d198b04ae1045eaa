//! Point arithmetic and edit application over plain strings.

use portal_types::{Point, TextEdit};
use thiserror::Error;

/// Why an edit could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    /// The edit starts (or ends) outside the text.
    #[error("point {point:?} is outside the text")]
    OutOfBounds {
        /// Offending point.
        point: Point,
    },
    /// The text at the edit position differs from the edit's deleted text.
    #[error("text at {point:?} does not match the deleted text")]
    Mismatch {
        /// Where the edit starts.
        point: Point,
    },
}

/// Byte offset of `point` in `text`, if the point exists.
///
/// A column equal to the line length addresses the end of the line.
pub fn offset_for_point(text: &str, point: Point) -> Option<usize> {
    let mut line_start = 0usize;
    for _ in 0..point.row {
        let newline = text[line_start..].find('\n')?;
        line_start += newline + 1;
    }

    let line_end = text[line_start..]
        .find('\n')
        .map_or(text.len(), |n| line_start + n);
    let line = &text[line_start..line_end];

    line.char_indices()
        .map(|(idx, _)| idx)
        .chain(std::iter::once(line.len()))
        .nth(point.column as usize)
        .map(|idx| line_start + idx)
}

/// The point just past the last character.
pub fn end_point(text: &str) -> Point {
    let row = text.matches('\n').count() as u32;
    let last_line = text.rsplit('\n').next().unwrap_or("");
    Point::new(row, last_line.chars().count() as u32)
}

/// Move `point` onto the nearest existing position of `text`.
pub fn clamp_point(text: &str, point: Point) -> Point {
    let end = end_point(text);
    if point.row > end.row {
        return end;
    }
    let line_len = text
        .split('\n')
        .nth(point.row as usize)
        .map_or(0, |line| line.chars().count() as u32);
    Point::new(point.row, point.column.min(line_len))
}

/// Apply a single edit in place.
pub fn apply_edit(text: &mut String, edit: &TextEdit) -> Result<(), EditError> {
    let start = offset_for_point(text, edit.start)
        .ok_or(EditError::OutOfBounds { point: edit.start })?;
    let end = start + edit.deleted_text.len();

    match text.get(start..end) {
        Some(found) if found == edit.deleted_text => {}
        Some(_) => return Err(EditError::Mismatch { point: edit.start }),
        None => return Err(EditError::OutOfBounds { point: edit.start }),
    }

    text.replace_range(start..end, &edit.inserted_text);
    Ok(())
}

/// Apply edits in order; on any failure `text` is left untouched.
pub fn apply_edits(text: &mut String, edits: &[TextEdit]) -> Result<(), EditError> {
    let mut scratch = text.clone();
    for edit in edits {
        apply_edit(&mut scratch, edit)?;
    }
    *text = scratch;
    Ok(())
}
