//! Text geometry shared by buffer deltas and cursor updates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A position in a buffer.
///
/// Rows are `\n`-separated lines; columns count Unicode scalar values
/// within the row. Ordering is by row, then column.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    /// Zero-based line index.
    pub row: u32,
    /// Zero-based character index within the line.
    pub column: u32,
}

impl Point {
    /// Create a point.
    pub fn new(row: u32, column: u32) -> Self {
        Self { row, column }
    }

    /// The start of a buffer.
    pub fn zero() -> Self {
        Self::default()
    }
}

impl fmt::Debug for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.column)
    }
}

/// One selection (or a bare cursor when empty).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectionRange {
    /// Start of the range.
    pub start: Point,
    /// End of the range.
    pub end: Point,
}

impl SelectionRange {
    /// Create a range; the endpoints are swapped if given in reverse.
    pub fn new(start: Point, end: Point) -> Self {
        if end < start {
            Self {
                start: end,
                end: start,
            }
        } else {
            Self { start, end }
        }
    }

    /// Shorthand for `[[start_row, start_column], [end_row, end_column]]`.
    pub fn from_coords(start_row: u32, start_column: u32, end_row: u32, end_column: u32) -> Self {
        Self::new(
            Point::new(start_row, start_column),
            Point::new(end_row, end_column),
        )
    }

    /// An empty range at `point`.
    pub fn cursor(point: Point) -> Self {
        Self {
            start: point,
            end: point,
        }
    }

    /// True if the range covers no text.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Debug for SelectionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}-{:?}]", self.start, self.end)
    }
}

/// One textual change: replace `deleted_text` at `start` with `inserted_text`.
///
/// Carrying the deleted text lets a replica verify the edit applies to the
/// text it actually holds before mutating anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEdit {
    /// Where the change begins.
    pub start: Point,
    /// Text removed from `start` (empty for a pure insertion).
    pub deleted_text: String,
    /// Text inserted at `start` (empty for a pure deletion).
    pub inserted_text: String,
}

impl TextEdit {
    /// Insert `text` at `at`.
    pub fn insert(at: Point, text: impl Into<String>) -> Self {
        Self {
            start: at,
            deleted_text: String::new(),
            inserted_text: text.into(),
        }
    }

    /// Delete `text`, which must currently start at `at`.
    pub fn delete(at: Point, text: impl Into<String>) -> Self {
        Self {
            start: at,
            deleted_text: text.into(),
            inserted_text: String::new(),
        }
    }

    /// Replace `old` at `at` with `new`.
    pub fn replace(at: Point, old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            start: at,
            deleted_text: old.into(),
            inserted_text: new.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn points_order_by_row_then_column() {
        assert!(Point::new(0, 9) < Point::new(1, 0));
        assert!(Point::new(2, 1) < Point::new(2, 3));
    }

    #[test]
    fn reversed_range_is_normalized() {
        let range = SelectionRange::from_coords(3, 4, 1, 2);
        assert_eq!(range.start, Point::new(1, 2));
        assert_eq!(range.end, Point::new(3, 4));
    }

    #[test]
    fn cursor_range_is_empty() {
        assert!(SelectionRange::cursor(Point::new(0, 4)).is_empty());
        assert!(!SelectionRange::from_coords(0, 0, 0, 2).is_empty());
    }

    #[test]
    fn json_shape_is_stable() {
        let range = SelectionRange::from_coords(0, 0, 0, 2);
        let json = serde_json::to_string(&range).unwrap();
        assert_eq!(
            json,
            r#"{"start":{"row":0,"column":0},"end":{"row":0,"column":2}}"#
        );
    }
}
