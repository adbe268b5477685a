//! Shared types for the loomqc measurement pipeline.

use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can reference
/// intermediate raster data without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbImage` so downstream crates can pass scanned sheets
/// around without depending on `image` directly.
pub use image::RgbImage;

/// A 2D point in image coordinates.
///
/// All geometry in this crate uses `(x, y)` with `x` growing to the
/// right and `y` growing downwards. Conversions from row/column indices
/// happen only in [`crate::coords`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }
}

impl From<Point> for geo::Coord<f64> {
    fn from(p: Point) -> Self {
        Self { x: p.x, y: p.y }
    }
}

impl From<geo::Coord<f64>> for Point {
    fn from(c: geo::Coord<f64>) -> Self {
        Self::new(c.x, c.y)
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of an image buffer.
    #[must_use]
    pub fn of<P: image::Pixel>(image: &image::ImageBuffer<P, Vec<P::Subpixel>>) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
        }
    }
}

/// Axis-aligned pixel rectangle.
///
/// `right` and `bottom` are exclusive, so a box from `(0, 0)` to
/// `(10, 5)` covers 10×5 pixels. Fields are private: a box never
/// changes once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    left: u32,
    top: u32,
    right: u32,
    bottom: u32,
}

impl BoundingBox {
    /// Create a box from its top-left and bottom-right `(x, y)` corners.
    ///
    /// Corners given in the wrong order collapse to a zero-area box at
    /// the top-left corner rather than wrapping around.
    #[must_use]
    pub fn new(top_left: (u32, u32), bottom_right: (u32, u32)) -> Self {
        Self {
            left: top_left.0,
            top: top_left.1,
            right: bottom_right.0.max(top_left.0),
            bottom: bottom_right.1.max(top_left.1),
        }
    }

    /// Create a box from its top-left corner and size.
    #[must_use]
    pub fn from_origin_size(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self::new((x, y), (x.saturating_add(width), y.saturating_add(height)))
    }

    /// Top-left corner `(x, y)`.
    #[must_use]
    pub const fn top_left(&self) -> (u32, u32) {
        (self.left, self.top)
    }

    /// Bottom-right corner `(x, y)`, exclusive.
    #[must_use]
    pub const fn bottom_right(&self) -> (u32, u32) {
        (self.right, self.bottom)
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.right - self.left
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.bottom - self.top
    }

    /// Returns `true` if the box covers no pixels.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Grow the box by `dx`/`dy` pixels on every side.
    ///
    /// The top-left corner saturates at zero; the bottom-right corner is
    /// left unclamped and is clipped by [`clip_to`](Self::clip_to).
    #[must_use]
    pub fn expand(&self, dx: u32, dy: u32) -> Self {
        Self::new(
            (self.left.saturating_sub(dx), self.top.saturating_sub(dy)),
            (
                self.right.saturating_add(dx),
                self.bottom.saturating_add(dy),
            ),
        )
    }

    /// Clip the box to an image of the given dimensions.
    #[must_use]
    pub fn clip_to(&self, dimensions: Dimensions) -> Self {
        Self::new(
            (
                self.left.min(dimensions.width),
                self.top.min(dimensions.height),
            ),
            (
                self.right.min(dimensions.width),
                self.bottom.min(dimensions.height),
            ),
        )
    }
}

/// A detected region with a confidence score and a label.
///
/// Detection steps produce these with a provisional label; later
/// classification steps fill in `score` and `label`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalBox {
    /// Region in pixel coordinates of the analysed image.
    pub bounds: BoundingBox,
    /// Confidence or match score.
    pub score: f64,
    /// Classification label.
    pub label: String,
}

impl EvalBox {
    /// Create a new evaluated box.
    #[must_use]
    pub fn new(bounds: BoundingBox, score: f64, label: impl Into<String>) -> Self {
        Self {
            bounds,
            score,
            label: label.into(),
        }
    }
}

/// A copied sub-region of a parent image together with its offset.
///
/// Owns its pixels, so the parent can be released independently.
#[derive(Debug, Clone)]
pub struct OffsetImage {
    bounds: BoundingBox,
    image: RgbImage,
}

impl OffsetImage {
    /// Copy `bounds` out of `parent`.
    ///
    /// The bounds are clipped to the parent first, so the returned
    /// image may be smaller than requested near the borders.
    #[must_use]
    pub fn crop(parent: &RgbImage, bounds: BoundingBox) -> Self {
        let bounds = bounds.clip_to(Dimensions::of(parent));
        let (x, y) = bounds.top_left();
        let image = image::imageops::crop_imm(parent, x, y, bounds.width(), bounds.height())
            .to_image();
        Self { bounds, image }
    }

    /// Region of the parent image this crop was taken from.
    #[must_use]
    pub const fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    /// Offset `(x, y)` of the crop inside the parent image.
    #[must_use]
    pub const fn offset(&self) -> (u32, u32) {
        self.bounds.top_left()
    }

    /// The copied pixels.
    #[must_use]
    pub const fn image(&self) -> &RgbImage {
        &self.image
    }
}

/// Closed interval `[lo, hi]`.
///
/// Serialized as a two-element array, matching how tolerances are
/// written in the schema document.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Band {
    /// Inclusive lower bound.
    pub lo: f64,
    /// Inclusive upper bound.
    pub hi: f64,
}

impl Band {
    /// Create a new band.
    #[must_use]
    pub const fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    /// Returns `true` if `value` lies inside the band (bounds included).
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        self.lo <= value && value <= self.hi
    }

    /// Returns `true` if `lo <= hi` and both bounds are finite.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.lo.is_finite() && self.hi.is_finite() && self.lo <= self.hi
    }

    /// Scale each bound by the matching bound of `factors`.
    #[must_use]
    pub fn scaled(&self, factors: Self) -> Self {
        Self::new(self.lo * factors.lo, self.hi * factors.hi)
    }
}

impl From<[f64; 2]> for Band {
    fn from([lo, hi]: [f64; 2]) -> Self {
        Self::new(lo, hi)
    }
}

impl From<Band> for [f64; 2] {
    fn from(band: Band) -> Self {
        [band.lo, band.hi]
    }
}

impl std::fmt::Display for Band {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.lo, self.hi)
    }
}

/// A named, calibrated distance checked against a tolerance band.
///
/// `is_ok` and `is_trustful` are derived on every call from the stored
/// distance and bands and can never be set directly.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "MeasurementRecord")]
pub struct DistanceMeasurement {
    name: String,
    p1: Point,
    p2: Point,
    distance: f64,
    variance: Band,
    trust: Option<Band>,
    has_ground_truth: bool,
}

impl DistanceMeasurement {
    /// Create a measurement with independently verified ground truth and
    /// no trust band.
    #[must_use]
    pub fn new(name: impl Into<String>, p1: Point, p2: Point, distance: f64, variance: Band) -> Self {
        Self {
            name: name.into(),
            p1,
            p2,
            distance,
            variance,
            trust: None,
            has_ground_truth: true,
        }
    }

    /// Attach a trust band, given as factors applied to the variance band.
    #[must_use]
    pub const fn with_trust(mut self, trust: Option<Band>) -> Self {
        self.trust = trust;
        self
    }

    /// Set whether the measurement rests on independently verified
    /// ground truth.
    #[must_use]
    pub const fn with_ground_truth(mut self, has_ground_truth: bool) -> Self {
        self.has_ground_truth = has_ground_truth;
        self
    }

    /// Check name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// First endpoint in image coordinates.
    #[must_use]
    pub const fn p1(&self) -> Point {
        self.p1
    }

    /// Second endpoint in image coordinates.
    #[must_use]
    pub const fn p2(&self) -> Point {
        self.p2
    }

    /// Calibrated distance in physical units.
    #[must_use]
    pub const fn distance(&self) -> f64 {
        self.distance
    }

    /// Tolerance band.
    #[must_use]
    pub const fn variance(&self) -> Band {
        self.variance
    }

    /// Trust band factors, if configured.
    #[must_use]
    pub const fn trust(&self) -> Option<Band> {
        self.trust
    }

    /// Whether the measurement rests on independently verified ground truth.
    #[must_use]
    pub const fn has_ground_truth(&self) -> bool {
        self.has_ground_truth
    }

    /// Whether the distance lies inside the tolerance band.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.variance.contains(self.distance)
    }

    /// Whether the measurement is plausible: it has ground truth and the
    /// distance lies inside the variance band widened by the trust factors.
    #[must_use]
    pub fn is_trustful(&self) -> bool {
        self.has_ground_truth
            && self
                .trust
                .is_none_or(|factors| self.variance.scaled(factors).contains(self.distance))
    }
}

/// Flat serialized form of [`DistanceMeasurement`], including the
/// derived flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub name: String,
    pub p1: Point,
    pub p2: Point,
    pub distance: f64,
    pub variance: Band,
    pub trust: Option<Band>,
    pub is_ok: bool,
    pub is_trustful: bool,
}

impl From<DistanceMeasurement> for MeasurementRecord {
    fn from(m: DistanceMeasurement) -> Self {
        let is_ok = m.is_ok();
        let is_trustful = m.is_trustful();
        Self {
            name: m.name,
            p1: m.p1,
            p2: m.p2,
            distance: m.distance,
            variance: m.variance,
            trust: m.trust,
            is_ok,
            is_trustful,
        }
    }
}

/// Errors that can occur while preprocessing or measuring an image.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image has no pixels.
    #[error("input image is empty")]
    EmptyImage,

    /// No material could be found in the scanned image.
    #[error("no material found in the image")]
    NoMaterial,
}
