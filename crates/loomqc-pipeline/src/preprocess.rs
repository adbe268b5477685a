//! Shared preprocessing applied once per scanned sheet.
//!
//! 1. Trim the uniformly bright strip the scanner produces past the end
//!    of the material.
//! 2. Coarse-crop to the material with a margin, working on a 20× reduced
//!    copy for speed.
//!
//! Background neutralization ([`crate::color::neutralize_background`]) is
//! applied by the caller on the cropped result so that every analysis
//! stage receives the same pixels.

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::color::{HsvRange, neutralize_background};
use crate::grayscale::{column_mean, row_mean, to_gray};
use crate::types::{BoundingBox, PipelineError};

/// Mean grey level at or above which a row counts as scanner overshoot.
const BRIGHT_TAIL_LEVEL: f64 = 253.0;

/// Crop parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropConfig {
    /// Reduction factor for the search copy.
    pub scale_factor: u32,
    /// Margin kept around the material, in full-resolution pixels.
    pub border: u32,
    /// Mean grey level above which a row or column contains material.
    pub threshold: f64,
}

impl Default for CropConfig {
    fn default() -> Self {
        Self {
            scale_factor: 20,
            border: 100,
            threshold: 15.0,
        }
    }
}

/// Drop the bright tail at the bottom of a scan.
///
/// Rows are scanned bottom-up; the mean grey of the leftmost `width / 50`
/// columns is compared against the overshoot level, and the first darker
/// row ends the image (that row itself is dropped as well).
///
/// # Errors
///
/// Returns [`PipelineError::EmptyImage`] for a zero-sized image and
/// [`PipelineError::NoMaterial`] if every row is bright.
pub fn trim_bright_tail(image: &RgbImage) -> Result<RgbImage, PipelineError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(PipelineError::EmptyImage);
    }

    let gray = to_gray(image);
    let sample = (image.width() / 50).max(1);
    let end = (0..gray.height())
        .rev()
        .find(|&y| row_mean(&gray, y, 0, sample) < BRIGHT_TAIL_LEVEL)
        .ok_or(PipelineError::NoMaterial)?;

    if end == 0 {
        return Err(PipelineError::NoMaterial);
    }
    Ok(image::imageops::crop_imm(image, 0, 0, image.width(), end).to_image())
}

/// Block-average an image down by an integer factor.
///
/// Trailing rows and columns that do not fill a whole block are ignored.
#[must_use]
pub fn downscale_area(image: &RgbImage, factor: u32) -> RgbImage {
    let factor = factor.max(1);
    let (w, h) = (image.width() / factor, image.height() / factor);
    let count = u64::from(factor) * u64::from(factor);

    RgbImage::from_fn(w, h, |bx, by| {
        let mut sums = [0u64; 3];
        for y in by * factor..(by + 1) * factor {
            for x in bx * factor..(bx + 1) * factor {
                for (sum, v) in sums.iter_mut().zip(image.get_pixel(x, y).0) {
                    *sum += u64::from(v);
                }
            }
        }
        // Averages of u8 samples fit in u8.
        #[allow(clippy::cast_possible_truncation)]
        let px = sums.map(|s| ((s + count / 2) / count) as u8);
        image::Rgb(px)
    })
}

/// Locate the material on a reduced copy and return its bounds, with a
/// margin, in full-resolution pixels.
///
/// # Errors
///
/// Returns [`PipelineError::NoMaterial`] if the image is too small to
/// reduce or no row or column is brighter than the threshold.
pub fn find_crop_bounds(image: &RgbImage, config: &CropConfig) -> Result<BoundingBox, PipelineError> {
    let factor = config.scale_factor.max(1);
    let small = downscale_area(image, factor);
    if small.width() == 0 || small.height() == 0 {
        return Err(PipelineError::NoMaterial);
    }

    let gray = to_gray(&neutralize_background(&small, &HsvRange::CROP, false));
    let (w, h) = gray.dimensions();
    let margin = config.border / factor;
    let bright_row = |y: u32| row_mean(&gray, y, 0, w) > config.threshold;
    let bright_col = |x: u32| column_mean(&gray, x, 0, h) > config.threshold;

    let first_row = (0..h).find(|&y| bright_row(y)).ok_or(PipelineError::NoMaterial)?;
    let last_row = (0..h).rev().find(|&y| bright_row(y)).ok_or(PipelineError::NoMaterial)?;
    let first_col = (0..w).find(|&x| bright_col(x)).ok_or(PipelineError::NoMaterial)?;
    let last_col = (0..w).rev().find(|&x| bright_col(x)).ok_or(PipelineError::NoMaterial)?;

    let top = first_row.saturating_sub(margin);
    let left = first_col.saturating_sub(margin);
    let bottom = (last_row + 1 + margin).min(h);
    let right = (last_col + 1 + margin).min(w);

    Ok(BoundingBox::new(
        (left * factor, top * factor),
        (right * factor, bottom * factor),
    ))
}

/// Crop an image to the material with a margin.
///
/// # Errors
///
/// See [`find_crop_bounds`].
pub fn coarse_crop(image: &RgbImage, config: &CropConfig) -> Result<RgbImage, PipelineError> {
    let bounds = find_crop_bounds(image, config)?;
    let (x, y) = bounds.top_left();
    Ok(image::imageops::crop_imm(image, x, y, bounds.width(), bounds.height()).to_image())
}

/// Trim the bright tail and coarse-crop a raw scan.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyImage`] or [`PipelineError::NoMaterial`]
/// when nothing usable is left of the scan.
pub fn preprocess(raw: &RgbImage, config: &CropConfig) -> Result<RgbImage, PipelineError> {
    let trimmed = trim_bright_tail(raw)?;
    coarse_crop(&trimmed, config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::Rgb;

    use super::*;

    const LID: Rgb<u8> = Rgb([150, 160, 180]);
    const CLOTH: Rgb<u8> = Rgb([120, 60, 40]);
    const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

    /// 400×600 lid-coloured scan with cloth at x 100..300, y 120..400 and a
    /// white overshoot strip below y 500.
    fn scan() -> RgbImage {
        RgbImage::from_fn(400, 600, |x, y| {
            if y >= 500 {
                WHITE
            } else if (100..300).contains(&x) && (120..400).contains(&y) {
                CLOTH
            } else {
                LID
            }
        })
    }

    // --- trim_bright_tail tests ---

    #[test]
    fn trims_white_strip() {
        let trimmed = trim_bright_tail(&scan()).unwrap();
        assert_eq!(trimmed.dimensions(), (400, 499));
    }

    #[test]
    fn all_white_scan_is_rejected() {
        let white = RgbImage::from_pixel(100, 100, WHITE);
        assert!(matches!(trim_bright_tail(&white), Err(PipelineError::NoMaterial)));
    }

    #[test]
    fn empty_scan_is_rejected() {
        let empty = RgbImage::new(0, 0);
        assert!(matches!(trim_bright_tail(&empty), Err(PipelineError::EmptyImage)));
    }

    // --- downscale_area tests ---

    #[test]
    fn downscale_averages_blocks() {
        let img = RgbImage::from_fn(4, 2, |x, _| if x < 2 { Rgb([0, 0, 0]) } else { Rgb([200, 100, 50]) });
        let small = downscale_area(&img, 2);
        assert_eq!(small.dimensions(), (2, 1));
        assert_eq!(small.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(small.get_pixel(1, 0).0, [200, 100, 50]);
    }

    // --- coarse crop tests ---

    #[test]
    fn crop_bounds_enclose_material_with_margin() {
        let trimmed = trim_bright_tail(&scan()).unwrap();
        let bounds = find_crop_bounds(&trimmed, &CropConfig::default()).unwrap();
        // Material spans reduced rows 6..20 and columns 5..15, margin 5.
        assert_eq!(bounds.top_left(), (0, 20));
        assert_eq!(bounds.bottom_right(), (400, 480));
    }

    #[test]
    fn lid_only_scan_has_no_material() {
        let lid = RgbImage::from_pixel(400, 400, LID);
        assert!(matches!(
            find_crop_bounds(&lid, &CropConfig::default()),
            Err(PipelineError::NoMaterial)
        ));
    }

    #[test]
    fn preprocess_runs_trim_then_crop() {
        let out = preprocess(&scan(), &CropConfig::default()).unwrap();
        assert_eq!(out.dimensions(), (400, 460));
    }
}
