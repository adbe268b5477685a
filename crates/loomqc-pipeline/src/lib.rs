//! loomqc-pipeline: pure measurement and preprocessing pipeline (sans-IO).
//!
//! Turns a raw fabric-sheet scan into calibrated geometric measurements
//! through:
//! trim bright tail -> coarse crop -> neutralize background ->
//! outline detection -> feature matching and circle fits -> edge
//! projections.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! images and byte slices and returns structured data. Scanners,
//! persistence, actuators and model runtimes live in `loomqc-station`.

pub mod annotate;
pub mod color;
pub mod coords;
pub mod diagnostics;
pub mod engine;
pub mod features;
pub mod geometry;
pub mod grayscale;
pub mod outline;
pub mod preprocess;
pub mod schema;
pub mod template;
pub mod tiling;
pub mod types;
pub mod verdict;

pub use diagnostics::{Clock, MeasureDiagnostics, measure_with_diagnostics};
pub use engine::{Calibration, MeasureError, MeasurementEngine};
pub use preprocess::CropConfig;
pub use schema::{MeasurementSchema, SchemaError};
pub use template::Template;
pub use types::{
    Band, BoundingBox, Dimensions, DistanceMeasurement, EvalBox, GrayImage, OffsetImage,
    PipelineError, Point, RgbImage,
};
pub use verdict::{CheckRow, Verdict, VerdictInput};

/// Measure one raw scan.
///
/// Takes encoded image bytes (PNG, JPEG, BMP, WebP), crops the sheet out
/// of the scan and runs the measurement engine on it. Returns the
/// cropped sheet together with its measurements so callers can annotate
/// or persist the same image that was measured.
///
/// # Steps
///
/// 1. Decode to RGB
/// 2. Trim the bright tail the feeder leaves below the sheet
/// 3. Coarse crop on a downscaled copy
/// 4. Geometric measurement
///
/// # Errors
///
/// Returns [`MeasureError::Image`] if the bytes do not decode, the image
/// is empty, or no material is found.
pub fn measure_scan(
    image_bytes: &[u8],
    crop: &CropConfig,
    engine: &MeasurementEngine,
) -> Result<(RgbImage, Vec<DistanceMeasurement>), MeasureError> {
    let raw = grayscale::decode_rgb(image_bytes)?;
    let sheet = preprocess::preprocess(&raw, crop)?;
    let measurements = engine.analyse(&sheet)?;
    Ok((sheet, measurements))
}
