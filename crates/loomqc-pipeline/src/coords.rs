//! Row/column to `(x, y)` conversion.
//!
//! Raster APIs hand out `(row, col)` style indices in some places and
//! `(x, y)` in others. Everything past this module works in `(x, y)`
//! with `x` to the right and `y` downwards; this is the one place the
//! two orders meet.

use crate::types::Point;

/// A pixel position given as `(row, col)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelIndex {
    /// Row (vertical position, counted from the top).
    pub row: u32,
    /// Column (horizontal position, counted from the left).
    pub col: u32,
}

impl PixelIndex {
    /// Create a new pixel index.
    #[must_use]
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Pixel index of an `(x, y)` pair as returned by `image` and
    /// `imageproc` APIs.
    #[must_use]
    pub const fn from_xy((x, y): (u32, u32)) -> Self {
        Self { row: y, col: x }
    }

    /// The `(x, y)` pair for `image` and `imageproc` APIs.
    #[must_use]
    pub const fn to_xy(self) -> (u32, u32) {
        (self.col, self.row)
    }

    /// Offset by another index, e.g. to map a position found in a crop
    /// back into its parent image.
    #[must_use]
    pub const fn offset_by(self, origin: Self) -> Self {
        Self {
            row: self.row + origin.row,
            col: self.col + origin.col,
        }
    }
}

impl From<PixelIndex> for Point {
    fn from(index: PixelIndex) -> Self {
        Self::new(f64::from(index.col), f64::from(index.row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_becomes_y() {
        let p = Point::from(PixelIndex::new(7, 3));
        assert!((p.x - 3.0).abs() < f64::EPSILON);
        assert!((p.y - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn xy_round_trip() {
        let index = PixelIndex::from_xy((12, 40));
        assert_eq!(index.row, 40);
        assert_eq!(index.col, 12);
        assert_eq!(index.to_xy(), (12, 40));
    }

    #[test]
    fn offset_adds_componentwise() {
        let found = PixelIndex::new(2, 5).offset_by(PixelIndex::new(100, 10));
        assert_eq!(found, PixelIndex::new(102, 15));
    }
}
