//! HSV background suppression and binarisation.
//!
//! The scanner lid is a neutral blue-grey. Pixels inside a narrow HSV
//! window are treated as background and painted black, so that the
//! material stands out as the only bright region. Every analysis stage
//! works on the same neutralized image.
//!
//! HSV follows the 8-bit convention where hue spans `0..=180` (degrees
//! halved) and saturation and value span `0..=255`.

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology;
use serde::{Deserialize, Serialize};

/// Convert one RGB pixel to `[h, s, v]` with `h` in `0..=180`.
#[must_use]
pub fn rgb_to_hsv(pixel: Rgb<u8>) -> [u8; 3] {
    let [r, g, b] = pixel.0.map(f32::from);
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = v - min;

    let s = if v > 0.0 { delta * 255.0 / v } else { 0.0 };

    let h = if delta <= 0.0 {
        0.0
    } else if (v - r).abs() < f32::EPSILON {
        60.0 * (g - b) / delta
    } else if (v - g).abs() < f32::EPSILON {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    // All three are within [0, 255] by construction.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let hsv = [(h / 2.0).round() as u8, s.round() as u8, v as u8];
    hsv
}

/// Inclusive HSV window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvRange {
    /// Background window used to neutralize images before analysis.
    pub const NEUTRALIZE: Self = Self {
        lower: [95, 5, 100],
        upper: [125, 47, 203],
    };

    /// Slightly wider, brighter window used while searching for the
    /// coarse crop.
    pub const CROP: Self = Self {
        lower: [94, 4, 160],
        upper: [129, 50, 205],
    };

    /// Returns `true` if the HSV triple lies inside the window.
    #[must_use]
    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|i| self.lower[i] <= hsv[i] && hsv[i] <= self.upper[i])
    }

    /// Binary mask with 255 where the image lies inside the window.
    #[must_use]
    pub fn mask(&self, image: &RgbImage) -> GrayImage {
        GrayImage::from_fn(image.width(), image.height(), |x, y| {
            let inside = self.contains(rgb_to_hsv(*image.get_pixel(x, y)));
            Luma([if inside { 255 } else { 0 }])
        })
    }
}

impl Default for HsvRange {
    fn default() -> Self {
        Self::NEUTRALIZE
    }
}

/// Paint background pixels black.
///
/// With `dilate`, the background mask is grown by a 5×5 square first,
/// which also removes the thin halo at the material's edge.
#[must_use]
pub fn neutralize_background(image: &RgbImage, range: &HsvRange, dilate: bool) -> RgbImage {
    let mut mask = range.mask(image);
    if dilate {
        mask = morphology::dilate(&mask, Norm::LInf, 2);
    }

    let mut out = image.clone();
    for (pixel, m) in out.pixels_mut().zip(mask.pixels()) {
        if m.0[0] > 0 {
            *pixel = Rgb([0, 0, 0]);
        }
    }
    out
}

/// Inverse binary threshold: pixels at or below `threshold` become 255,
/// brighter pixels become 0.
#[must_use]
pub fn binarize_dark(gray: &GrayImage, threshold: u8) -> GrayImage {
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([if gray.get_pixel(x, y).0[0] > threshold { 0 } else { 255 }])
    })
}
