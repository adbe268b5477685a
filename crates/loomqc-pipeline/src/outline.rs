//! Material outline detection.
//!
//! A single scan routine finds the top-left corner of the material by
//! walking rows and columns from the image border until the mean
//! intensity of a sample window exceeds a threshold. The other three
//! corners come from running the same routine on rotated copies and
//! mapping the result back.

use image::GrayImage;
use image::imageops::{rotate90, rotate180, rotate270};
use serde::{Deserialize, Serialize};

use crate::coords::PixelIndex;
use crate::geometry::Square;
use crate::grayscale::{column_mean, row_mean};
use crate::types::Point;

/// Outline scan parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlineConfig {
    /// Offset of the sample window from the image border, in pixels.
    /// Matches the margin left by the coarse crop.
    pub boundary_thickness: u32,
    /// Mean intensity above which a sample window contains material.
    pub intensity_threshold: f64,
}

impl Default for OutlineConfig {
    fn default() -> Self {
        Self {
            boundary_thickness: 100,
            intensity_threshold: 15.0,
        }
    }
}

/// Find the top-left material corner of a grayscale image.
///
/// The sample window spans `width / 10` pixels starting at
/// `boundary_thickness`. Rows are scanned top-down against a window of
/// columns; columns left-to-right against a window of rows. If no row
/// (column) qualifies, the image height (width) is returned.
#[must_use]
pub fn find_top_left(gray: &GrayImage, config: &OutlineConfig) -> PixelIndex {
    let (width, height) = gray.dimensions();
    let start = config.boundary_thickness;
    // Window bounds past the image are clamped by the mean helpers.
    let end = start.saturating_add((width / 10).max(1));

    let row = (0..height)
        .find(|&y| row_mean(gray, y, start, end) > config.intensity_threshold)
        .unwrap_or(height);
    let col = (0..width)
        .find(|&x| column_mean(gray, x, start, end) > config.intensity_threshold)
        .unwrap_or(width);

    PixelIndex::new(row, col)
}

/// Detect the four outline corners of the material.
///
/// `gray` should come from a background-neutralized image so that only
/// the material is bright. Corners on the right and bottom sides are
/// one past the last material pixel.
#[must_use]
pub fn detect_square(gray: &GrayImage, config: &OutlineConfig) -> Square {
    let (w, h) = (f64::from(gray.width()), f64::from(gray.height()));

    let top_left = Point::from(find_top_left(gray, config));

    let found = Point::from(find_top_left(&rotate270(gray), config));
    let top_right = Point::new(w - found.y, found.x);

    let found = Point::from(find_top_left(&rotate90(gray), config));
    let bottom_left = Point::new(found.y, h - found.x);

    let found = Point::from(find_top_left(&rotate180(gray), config));
    let bottom_right = Point::new(w - found.x, h - found.y);

    Square::new([top_left, top_right, bottom_right, bottom_left])
}
