//! Geometric measurement engine.
//!
//! Given one cropped sheet image, the engine produces, in order:
//!
//! 1. the four outline edge lengths (`top_weft_edge`, `right_warp_edge`,
//!    `bottom_weft_edge`, `left_warp_edge`),
//! 2. one radius measurement per declared circular feature,
//! 3. the distance from each feature centre to the nearest warp edge and
//!    then to the nearest weft edge, where the schema defines such a check,
//! 4. `circle_to_circle`, between the warp-edge projections of the first
//!    two features, when both exist.
//!
//! Pixel distances become physical distances only through
//! [`Calibration`].

use std::collections::HashMap;

use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

use crate::color::{HsvRange, binarize_dark, neutralize_background};
use crate::features::{CircleFit, fit_circle};
use crate::geometry::{EdgeAxis, Square};
use crate::grayscale::to_gray;
use crate::outline::detect_square;
use crate::schema::{
    CIRCLE_TO_CIRCLE, CheckSpec, MeasurementSchema, SchemaError, edge_check, projection_check,
};
use crate::template::{Template, locate};
use crate::types::{Dimensions, DistanceMeasurement, PipelineError, Point};

/// Millimetres per inch.
const MM_PER_INCH: f64 = 25.4;

/// Scanner resolution, the single factor between pixels and millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pixels_per_mm: f64,
}

impl Calibration {
    /// Calibration for a scan at `dpi` dots per inch.
    #[must_use]
    pub fn from_dpi(dpi: u32) -> Self {
        Self {
            pixels_per_mm: f64::from(dpi) / MM_PER_INCH,
        }
    }

    /// Calibration with an explicit pixels-per-millimetre factor.
    #[must_use]
    pub const fn from_pixels_per_mm(pixels_per_mm: f64) -> Self {
        Self { pixels_per_mm }
    }

    /// Pixels per millimetre.
    #[must_use]
    pub const fn pixels_per_mm(&self) -> f64 {
        self.pixels_per_mm
    }

    /// Convert a pixel distance to millimetres.
    #[must_use]
    pub fn to_mm(&self, pixels: f64) -> f64 {
        pixels / self.pixels_per_mm
    }

    /// Millimetre distance between two pixel positions.
    #[must_use]
    pub fn distance(&self, a: Point, b: Point) -> f64 {
        self.to_mm(a.distance(b))
    }
}

/// Errors raised by the measurement engine.
#[derive(Debug, thiserror::Error)]
pub enum MeasureError {
    /// The schema is missing something the engine needs.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A declared feature has no loaded template.
    #[error("no template loaded for feature `{0}`")]
    MissingTemplate(String),

    /// A weight mask does not have the size of its template.
    #[error("weight mask of `{feature}` is {mask_width}x{mask_height}, template is {template_width}x{template_height}")]
    WeightsMismatch {
        feature: String,
        mask_width: u32,
        mask_height: u32,
        template_width: u32,
        template_height: u32,
    },

    /// The pixels per millimetre factor is not a positive number.
    #[error("calibration must be positive, got {0} pixels/mm")]
    InvalidCalibration(f64),

    /// The image cannot be measured.
    #[error(transparent)]
    Image(#[from] PipelineError),
}

/// A fitted feature together with its measurement.
#[derive(Debug, Clone)]
pub struct FeatureMeasurement {
    pub fit: CircleFit,
    pub measurement: DistanceMeasurement,
}

/// Stateless measurement engine over an immutable schema.
#[derive(Debug)]
pub struct MeasurementEngine {
    schema: MeasurementSchema,
    templates: HashMap<String, Template>,
    calibration: Calibration,
}

impl MeasurementEngine {
    /// Build an engine, checking that every declared feature has a
    /// usable template.
    ///
    /// # Errors
    ///
    /// Returns [`MeasureError`] if the schema does not validate, a
    /// template is missing, a weight mask has the wrong size, or the
    /// calibration is not positive.
    pub fn new(
        schema: MeasurementSchema,
        templates: HashMap<String, Template>,
        calibration: Calibration,
    ) -> Result<Self, MeasureError> {
        schema.validate()?;

        let ppm = calibration.pixels_per_mm();
        if !(ppm.is_finite() && ppm > 0.0) {
            return Err(MeasureError::InvalidCalibration(ppm));
        }

        for name in schema.features() {
            let template = templates
                .get(name)
                .ok_or_else(|| MeasureError::MissingTemplate(name.clone()))?;
            if let Some(mask) = &template.weights
                && mask.dimensions() != template.image.dimensions()
            {
                return Err(MeasureError::WeightsMismatch {
                    feature: name.clone(),
                    mask_width: mask.width(),
                    mask_height: mask.height(),
                    template_width: template.image.width(),
                    template_height: template.image.height(),
                });
            }
        }

        Ok(Self {
            schema,
            templates,
            calibration,
        })
    }

    /// The schema this engine evaluates.
    #[must_use]
    pub const fn schema(&self) -> &MeasurementSchema {
        &self.schema
    }

    /// The calibration in use.
    #[must_use]
    pub const fn calibration(&self) -> Calibration {
        self.calibration
    }

    /// Measure one cropped sheet.
    ///
    /// # Errors
    ///
    /// Returns [`MeasureError::Image`] for an empty image. Degenerate
    /// detections still produce measurements, which the tolerance bands
    /// then reject.
    pub fn analyse(&self, image: &RgbImage) -> Result<Vec<DistanceMeasurement>, MeasureError> {
        let gray = self.neutralize(image)?;
        let (square, mut measurements) = self.measure_outline(&gray)?;
        let features = self.measure_features(&gray)?;
        let projections = self.measure_projections(&square, &features)?;

        measurements.extend(features.into_iter().map(|f| f.measurement));
        measurements.extend(projections);
        Ok(measurements)
    }

    /// Neutralize the background (with mask dilation) and convert to
    /// grayscale.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyImage`] for a zero-sized image.
    pub fn neutralize(&self, image: &RgbImage) -> Result<GrayImage, MeasureError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(PipelineError::EmptyImage.into());
        }
        Ok(to_gray(&neutralize_background(image, &HsvRange::NEUTRALIZE, true)))
    }

    /// Detect the outline and measure its four edges.
    ///
    /// # Errors
    ///
    /// Returns [`MeasureError::Schema`] if an edge check is missing.
    pub fn measure_outline(&self, gray: &GrayImage) -> Result<(Square, Vec<DistanceMeasurement>), MeasureError> {
        let square = detect_square(gray, self.schema.outline());
        let edges = square
            .edges()
            .into_iter()
            .map(|edge| {
                let check = self.schema.check(edge_check(edge.axis()))?;
                Ok(measurement(
                    edge.position.label(),
                    edge.start,
                    edge.end,
                    self.calibration.to_mm(edge.length()),
                    check,
                ))
            })
            .collect::<Result<Vec<_>, SchemaError>>()?;
        Ok((square, edges))
    }

    /// Locate and fit every declared circular feature.
    ///
    /// # Errors
    ///
    /// Returns [`MeasureError`] if a feature's check or template is
    /// missing.
    pub fn measure_features(&self, gray: &GrayImage) -> Result<Vec<FeatureMeasurement>, MeasureError> {
        let binary = binarize_dark(gray, self.schema.binary_threshold());
        let dims = Dimensions::of(&binary);

        self.schema
            .features()
            .iter()
            .map(|name| {
                let check = self.schema.check(name)?;
                let spec = self.schema.feature(name)?;
                let template = self
                    .templates
                    .get(name)
                    .ok_or_else(|| MeasureError::MissingTemplate(name.clone()))?;

                let matched = locate(&binary, template, &spec.template.region, spec.template.mode);
                let [dx, dy] = spec.boundary_margin;
                let search = matched.bounds.expand(dx, dy).clip_to(dims);
                let fit = fit_circle(&binary, search);

                let measurement = measurement(
                    name,
                    fit.center,
                    fit.left_rim(),
                    self.calibration.to_mm(fit.radius),
                    check,
                );
                Ok(FeatureMeasurement { fit, measurement })
            })
            .collect()
    }

    /// Project every feature centre onto the nearest warp and weft edges
    /// and measure the configured projections, followed by
    /// `circle_to_circle` when two warp projections exist.
    ///
    /// # Errors
    ///
    /// Returns [`MeasureError::Schema`] if `circle_to_circle` is needed but
    /// missing.
    pub fn measure_projections(
        &self,
        square: &Square,
        features: &[FeatureMeasurement],
    ) -> Result<Vec<DistanceMeasurement>, MeasureError> {
        let mut warp = Vec::new();
        let mut weft = Vec::new();

        for feature in features {
            let center = feature.fit.center;
            let name = feature.measurement.name();
            let trusted = feature.measurement.is_trustful();

            for (axis, out) in [(EdgeAxis::Warp, &mut warp), (EdgeAxis::Weft, &mut weft)] {
                let check_name = projection_check(name, axis);
                let Some(check) = self.schema.optional_check(&check_name) else {
                    continue;
                };
                let projection = square.nearest_projection(center, axis);
                out.push(
                    measurement(
                        &check_name,
                        center,
                        projection.point,
                        self.calibration.to_mm(projection.distance),
                        check,
                    )
                    .with_ground_truth(trusted),
                );
            }
        }

        let spacing = match warp.as_slice() {
            [first, second, ..] => {
                let check = self.schema.check(CIRCLE_TO_CIRCLE)?;
                let (a, b) = (first.p2(), second.p2());
                Some(
                    DistanceMeasurement::new(CIRCLE_TO_CIRCLE, a, b, self.calibration.distance(a, b), check.variance)
                        .with_ground_truth(first.is_trustful() && second.is_trustful()),
                )
            }
            _ => None,
        };

        warp.extend(weft);
        warp.extend(spacing);
        Ok(warp)
    }
}

/// A measurement carrying the bands of `check`.
fn measurement(name: &str, p1: Point, p2: Point, distance: f64, check: &CheckSpec) -> DistanceMeasurement {
    DistanceMeasurement::new(name, p1, p2, distance, check.variance).with_trust(check.trust)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{Luma, Rgb};

    use super::*;

    const SCHEMA: &str = r#"{
        "features": ["hole"],
        "checks": {
            "weft_edge": { "variance": [0.0, 1000.0] },
            "warp_edge": { "variance": [0.0, 1000.0] },
            "hole": { "variance": [0.0, 100.0],
                      "feature": { "template": { "template": "hole.png" }, "boundary_margin": [4, 4] } },
            "hole_to_warp_cut": { "variance": [0.0, 1000.0] },
            "hole_to_weft_cut": { "variance": [0.0, 1000.0] }
        }
    }"#;

    fn hole_template() -> Template {
        Template::new(GrayImage::from_fn(30, 30, |x, y| {
            let d = Point::new(f64::from(x), f64::from(y)).distance(Point::new(15.0, 15.0));
            Luma([if d <= 10.0 { 255 } else { 0 }])
        }))
    }

    fn engine() -> MeasurementEngine {
        let schema = MeasurementSchema::from_json(SCHEMA).unwrap();
        let templates = HashMap::from([("hole".to_owned(), hole_template())]);
        MeasurementEngine::new(schema, templates, Calibration::from_pixels_per_mm(2.0)).unwrap()
    }

    /// White sheet at x 100..400, y 100..300 with a black hole of radius
    /// 10 at (160, 150).
    fn sheet() -> RgbImage {
        RgbImage::from_fn(500, 400, |x, y| {
            let p = Point::new(f64::from(x), f64::from(y));
            let on_sheet = (100..400).contains(&x) && (100..300).contains(&y);
            if on_sheet && p.distance(Point::new(160.0, 150.0)) > 10.0 {
                Rgb([240, 240, 240])
            } else {
                Rgb([0, 0, 0])
            }
        })
    }

    // --- Calibration tests ---

    #[test]
    fn dpi_calibration() {
        let cal = Calibration::from_dpi(600);
        assert!((cal.pixels_per_mm() - 600.0 / 25.4).abs() < 1e-12);
        assert!((cal.to_mm(600.0) - 25.4).abs() < 1e-9);
    }

    // --- construction tests ---

    #[test]
    fn missing_template_is_rejected() {
        let schema = MeasurementSchema::from_json(SCHEMA).unwrap();
        let err = MeasurementEngine::new(schema, HashMap::new(), Calibration::from_dpi(600)).unwrap_err();
        assert!(matches!(err, MeasureError::MissingTemplate(ref n) if n == "hole"));
    }

    #[test]
    fn mismatched_weights_are_rejected() {
        let schema = MeasurementSchema::from_json(SCHEMA).unwrap();
        let mut template = hole_template();
        template.weights = Some(GrayImage::new(5, 5));
        let templates = HashMap::from([("hole".to_owned(), template)]);
        let err = MeasurementEngine::new(schema, templates, Calibration::from_dpi(600)).unwrap_err();
        assert!(matches!(err, MeasureError::WeightsMismatch { .. }));
    }

    #[test]
    fn zero_calibration_is_rejected() {
        let schema = MeasurementSchema::from_json(SCHEMA).unwrap();
        let templates = HashMap::from([("hole".to_owned(), hole_template())]);
        let err = MeasurementEngine::new(schema, templates, Calibration::from_pixels_per_mm(0.0)).unwrap_err();
        assert!(matches!(err, MeasureError::InvalidCalibration(_)));
    }

    // --- analyse tests ---

    #[test]
    fn empty_image_is_an_error() {
        let err = engine().analyse(&RgbImage::new(0, 0)).unwrap_err();
        assert!(matches!(err, MeasureError::Image(PipelineError::EmptyImage)));
    }

    #[test]
    fn measurement_order_and_values() {
        let measurements = engine().analyse(&sheet()).unwrap();
        let names: Vec<&str> = measurements.iter().map(DistanceMeasurement::name).collect();
        assert_eq!(
            names,
            [
                "top_weft_edge",
                "right_warp_edge",
                "bottom_weft_edge",
                "left_warp_edge",
                "hole",
                "hole_to_warp_cut",
                "hole_to_weft_cut",
            ]
        );

        // 300 px / 2 px per mm, 200 px / 2 px per mm.
        assert!((measurements[0].distance() - 150.0).abs() < 1.0);
        assert!((measurements[1].distance() - 100.0).abs() < 1.0);

        // Radius ≈ 10 px.
        assert!((measurements[4].distance() - 5.0).abs() < 1.0);

        // Nearest warp edge is the left one at x = 100: 60 px away.
        assert!((measurements[5].distance() - 30.0).abs() < 1.0);
        // Nearest weft edge is the top one at y = 100: 50 px away.
        assert!((measurements[6].distance() - 25.0).abs() < 1.0);
    }

    #[test]
    fn projections_inherit_feature_trust() {
        let measurements = engine().analyse(&sheet()).unwrap();
        assert!(measurements.iter().all(DistanceMeasurement::is_trustful));
    }

    const TWO_FEATURES: &str = r#"{
        "features": ["a", "b"],
        "checks": {
            "weft_edge": { "variance": [0.0, 1000.0] },
            "warp_edge": { "variance": [0.0, 1000.0] },
            "a": { "variance": [0.0, 100.0], "feature": { "template": { "template": "t.png" } } },
            "b": { "variance": [0.0, 100.0], "feature": { "template": { "template": "t.png" } } },
            "a_to_warp_cut": { "variance": [0.0, 1000.0] },
            "b_to_warp_cut": { "variance": [0.0, 1000.0] },
            "circle_to_circle": { "variance": [0.0, 1000.0] }
        }
    }"#;

    fn two_feature_engine() -> MeasurementEngine {
        let schema = MeasurementSchema::from_json(TWO_FEATURES).unwrap();
        let templates = HashMap::from([
            ("a".to_owned(), hole_template()),
            ("b".to_owned(), hole_template()),
        ]);
        MeasurementEngine::new(schema, templates, Calibration::from_pixels_per_mm(1.0)).unwrap()
    }

    fn wide_square() -> Square {
        Square::new([
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(100.0, 50.0),
            Point::new(0.0, 50.0),
        ])
    }

    fn feature(name: &str, x: f64, ground_truth: bool) -> FeatureMeasurement {
        let center = Point::new(x, 20.0);
        FeatureMeasurement {
            fit: CircleFit {
                center,
                radius: 3.0,
            },
            measurement: DistanceMeasurement::new(
                name,
                center,
                Point::new(x - 3.0, 20.0),
                3.0,
                crate::types::Band::new(0.0, 100.0),
            )
            .with_ground_truth(ground_truth),
        }
    }

    // --- projection tests ---

    #[test]
    fn circle_to_circle_uses_first_two_warp_projections() {
        let features = [feature("a", 10.0, true), feature("b", 85.0, true)];
        let out = two_feature_engine()
            .measure_projections(&wide_square(), &features)
            .unwrap();

        let names: Vec<&str> = out.iter().map(DistanceMeasurement::name).collect();
        assert_eq!(names, ["a_to_warp_cut", "b_to_warp_cut", "circle_to_circle"]);

        // a projects onto the left edge, b onto the right edge.
        let spacing = &out[2];
        assert!(spacing.p1().distance(Point::new(0.0, 20.0)) < 1e-9);
        assert!(spacing.p2().distance(Point::new(100.0, 20.0)) < 1e-9);
        assert!((spacing.distance() - 100.0).abs() < 1e-9);
        assert!(spacing.is_trustful());
    }

    #[test]
    fn untrusted_feature_propagates_to_spacing() {
        let features = [feature("a", 10.0, true), feature("b", 85.0, false)];
        let out = two_feature_engine()
            .measure_projections(&wide_square(), &features)
            .unwrap();

        assert!(out[0].is_trustful());
        assert!(!out[1].is_trustful());
        assert!(!out[2].is_trustful());
    }
}
