//! Reference-feature localisation by template matching.

use image::GrayImage;
use imageproc::template_matching::{
    MatchTemplateMethod, find_extremes, match_template, match_template_with_mask,
};
use serde::{Deserialize, Serialize};

use crate::types::{BoundingBox, EvalBox};

/// Whether the best match is the highest or the lowest score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Normalized cross-correlation; best match is the maximum.
    #[default]
    Maximize,
    /// Normalized squared difference; best match is the minimum.
    Minimize,
}

impl MatchMode {
    const fn method(self) -> MatchTemplateMethod {
        match self {
            Self::Maximize => MatchTemplateMethod::CrossCorrelationNormalized,
            Self::Minimize => MatchTemplateMethod::SumOfSquaredErrorsNormalized,
        }
    }

    const fn worst_score(self) -> f32 {
        match self {
            Self::Maximize => f32::MIN,
            Self::Minimize => f32::MAX,
        }
    }

    /// Label given to boxes found in this mode.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Maximize => "highest",
            Self::Minimize => "lowest",
        }
    }
}

/// Search window given as fractions of the image width and height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelativeRegion {
    pub x0: f64,
    pub x1: f64,
    pub y0: f64,
    pub y1: f64,
}

impl RelativeRegion {
    /// The whole image.
    pub const FULL: Self = Self {
        x0: 0.0,
        x1: 1.0,
        y0: 0.0,
        y1: 1.0,
    };

    /// Returns `true` if `0 <= x0 < x1 <= 1` and likewise for `y`.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let axis = |a: f64, b: f64| (0.0..=1.0).contains(&a) && (0.0..=1.0).contains(&b) && a < b;
        axis(self.x0, self.x1) && axis(self.y0, self.y1)
    }

    /// Pixel rectangle of this region in an image of the given size.
    #[must_use]
    pub fn to_pixels(&self, width: u32, height: u32) -> BoundingBox {
        let scale = |fraction: f64, extent: u32| {
            // Fractions are validated to [0, 1], so the product fits in u32.
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let px = (fraction.clamp(0.0, 1.0) * f64::from(extent)).round() as u32;
            px
        };
        BoundingBox::new(
            (scale(self.x0, width), scale(self.y0, height)),
            (scale(self.x1, width), scale(self.y1, height)),
        )
    }
}

impl Default for RelativeRegion {
    fn default() -> Self {
        Self::FULL
    }
}

/// Template matching parameters of one reference feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateMatchConfig {
    /// Path to the reference template image, relative to the schema file.
    pub template: String,
    /// Optional per-pixel weight mask, same size as the template.
    #[serde(default)]
    pub weights: Option<String>,
    /// Area to search in.
    #[serde(default)]
    pub region: RelativeRegion,
    /// Score direction.
    #[serde(default)]
    pub mode: MatchMode,
}

/// A loaded template with its optional weight mask.
#[derive(Debug, Clone)]
pub struct Template {
    pub image: GrayImage,
    pub weights: Option<GrayImage>,
}

impl Template {
    /// Template without weights.
    #[must_use]
    pub const fn new(image: GrayImage) -> Self {
        Self {
            image,
            weights: None,
        }
    }
}

/// Find the best placement of `template` inside `region` of `image`.
///
/// The returned box has the template's size and is in `image`
/// coordinates. If the region is smaller than the template the box is
/// zero-sized at the region origin with a score of `0.0`.
#[must_use]
pub fn locate(image: &GrayImage, template: &Template, region: &RelativeRegion, mode: MatchMode) -> EvalBox {
    let bounds = region
        .to_pixels(image.width(), image.height())
        .clip_to(crate::types::Dimensions::of(image));
    let (ox, oy) = bounds.top_left();
    let (tw, th) = template.image.dimensions();

    if tw == 0 || th == 0 || bounds.width() < tw || bounds.height() < th {
        return EvalBox::new(BoundingBox::new((ox, oy), (ox, oy)), 0.0, mode.label());
    }

    let search = image::imageops::crop_imm(image, ox, oy, bounds.width(), bounds.height()).to_image();
    let mut scores = match &template.weights {
        Some(mask) if mask.dimensions() == template.image.dimensions() => {
            match_template_with_mask(&search, &template.image, mode.method(), mask)
        }
        _ => match_template(&search, &template.image, mode.method()),
    };

    // Flat windows normalize to 0/0; rank them last.
    let worst = mode.worst_score();
    for score in scores.iter_mut() {
        if !score.is_finite() {
            *score = worst;
        }
    }

    let extremes = find_extremes(&scores);
    let ((x, y), score) = match mode {
        MatchMode::Maximize => (extremes.max_value_location, extremes.max_value),
        MatchMode::Minimize => (extremes.min_value_location, extremes.min_value),
    };

    EvalBox::new(
        BoundingBox::from_origin_size(ox + x, oy + y, tw, th),
        f64::from(score),
        mode.label(),
    )
}

#[cfg(test)]
mod tests {
    use image::Luma;

    use super::*;

    /// Black 60×40 image with a clean 6×6 white square at (30, 12) and a
    /// second 6×6 square at (8, 20) with a stray pixel next to it.
    fn scene() -> GrayImage {
        GrayImage::from_fn(60, 40, |x, y| {
            let clean = (30..36).contains(&x) && (12..18).contains(&y);
            let noisy = (8..14).contains(&x) && (20..26).contains(&y) || (x, y) == (14, 20);
            Luma([if clean || noisy { 255 } else { 0 }])
        })
    }

    /// 10×10 template: white 6×6 square centred on a black border.
    fn square_template() -> Template {
        Template::new(GrayImage::from_fn(10, 10, |x, y| {
            Luma([if (2..8).contains(&x) && (2..8).contains(&y) { 255 } else { 0 }])
        }))
    }

    // --- RelativeRegion tests ---

    #[test]
    fn region_to_pixels_rounds() {
        let region = RelativeRegion {
            x0: 0.25,
            x1: 0.5,
            y0: 0.1,
            y1: 0.9,
        };
        let bounds = region.to_pixels(200, 100);
        assert_eq!(bounds.top_left(), (50, 10));
        assert_eq!(bounds.bottom_right(), (100, 90));
    }

    #[test]
    fn region_validation() {
        assert!(RelativeRegion::FULL.is_valid());
        let inverted = RelativeRegion {
            x0: 0.6,
            x1: 0.4,
            y0: 0.0,
            y1: 1.0,
        };
        assert!(!inverted.is_valid());
    }

    // --- locate tests ---

    #[test]
    fn maximize_finds_correlation_peak() {
        let found = locate(&scene(), &square_template(), &RelativeRegion::FULL, MatchMode::Maximize);
        assert_eq!(found.bounds.top_left(), (28, 10));
        assert_eq!(found.bounds.width(), 10);
        assert_eq!(found.label, "highest");
    }

    #[test]
    fn minimize_finds_smallest_difference() {
        let found = locate(&scene(), &square_template(), &RelativeRegion::FULL, MatchMode::Minimize);
        assert_eq!(found.bounds.top_left(), (28, 10));
        assert!(found.score < 1e-3);
        assert_eq!(found.label, "lowest");
    }

    #[test]
    fn modes_pick_opposite_extremes() {
        // Against a ramp a 1×1 template saturates the correlation early,
        // while the squared difference is smallest at the brightest pixel.
        let image = GrayImage::from_fn(20, 1, |x, _| Luma([u8::try_from(x * 10).unwrap_or(0)]));
        let template = Template::new(GrayImage::from_pixel(1, 1, Luma([200])));
        let high = locate(&image, &template, &RelativeRegion::FULL, MatchMode::Maximize);
        let low = locate(&image, &template, &RelativeRegion::FULL, MatchMode::Minimize);
        assert_eq!(low.bounds.top_left(), (19, 0));
        assert_ne!(high.bounds.top_left(), low.bounds.top_left());
    }

    #[test]
    fn region_restricts_search() {
        // The clean square lies outside the window, so the noisy one wins.
        let region = RelativeRegion {
            x0: 0.0,
            x1: 0.4,
            y0: 0.0,
            y1: 1.0,
        };
        let found = locate(&scene(), &square_template(), &region, MatchMode::Maximize);
        assert_eq!(found.bounds.top_left(), (6, 18));
    }

    #[test]
    fn oversized_template_gives_degenerate_box() {
        let tiny = RelativeRegion {
            x0: 0.5,
            x1: 0.55,
            y0: 0.5,
            y1: 0.55,
        };
        let found = locate(&scene(), &square_template(), &tiny, MatchMode::Maximize);
        assert!(found.bounds.is_empty());
        assert_eq!(found.bounds.top_left(), (30, 20));
    }
}
