//! Analysis stages and the collaborator interfaces behind them.
//!
//! The measurement engine is built in. The anomaly scorer, the defect
//! classifier and the boundary classifier are model runtimes outside this
//! workspace; the station only sees them through the traits below. Each
//! has a disabled adapter that reports a neutral "no finding" result so a
//! missing model degrades the cycle instead of blocking it.

use loomqc_pipeline::color::{HsvRange, neutralize_background};
use loomqc_pipeline::tiling::{MATERIAL_ERROR, tile_layout};
use loomqc_pipeline::{DistanceMeasurement, EvalBox, MeasurementEngine, OffsetImage, RgbImage};
use tracing::debug;

use crate::error::StageError;

/// Result of the anomaly scorer.
#[derive(Debug, Clone, Default)]
pub struct AnomalyScore {
    /// The model's reconstruction of the input, if it produced one.
    pub reconstruction: Option<RgbImage>,
    /// Reconstruction error, compared against the pass threshold.
    pub error: f64,
}

/// Autoencoder-style anomaly scoring.
pub trait AnomalyScorer: Send {
    /// Score one cropped sheet.
    ///
    /// # Errors
    ///
    /// Returns [`StageError`] if the model cannot process the image.
    fn score(&mut self, image: &RgbImage) -> Result<AnomalyScore, StageError>;
}

/// Material defect detection over a whole sheet.
pub trait DefectDetector: Send {
    /// Boxes whose defect probability exceeds `confidence`. Empty means no
    /// defect.
    ///
    /// # Errors
    ///
    /// Returns [`StageError`] if the model cannot process the image.
    fn detect(&mut self, image: &RgbImage, confidence: f64) -> Result<Vec<EvalBox>, StageError>;
}

/// Boundary-cut classification.
pub trait BoundaryClassifier: Send {
    /// Boxes labelling boundary-cut defects.
    ///
    /// # Errors
    ///
    /// Returns [`StageError`] if the classifier cannot process the image.
    fn classify(&mut self, image: &RgbImage) -> Result<Vec<EvalBox>, StageError>;
}

/// Binary defect classifier for one square tile.
pub trait PatchClassifier: Send {
    /// Probability that `patch` shows a material defect.
    ///
    /// # Errors
    ///
    /// Returns [`StageError`] if the model cannot process the patch.
    fn defect_probability(&mut self, patch: &RgbImage) -> Result<f64, StageError>;
}

/// Anomaly scorer used when no model is available: zero error, no
/// reconstruction.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledAnomalyScorer;

impl AnomalyScorer for DisabledAnomalyScorer {
    fn score(&mut self, _image: &RgbImage) -> Result<AnomalyScore, StageError> {
        Ok(AnomalyScore::default())
    }
}

/// Defect detector used when no model is available: never flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledDefectDetector;

impl DefectDetector for DisabledDefectDetector {
    fn detect(&mut self, _image: &RgbImage, _confidence: f64) -> Result<Vec<EvalBox>, StageError> {
        Ok(Vec::new())
    }
}

/// Boundary classifier used when the stage is switched off.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledBoundaryClassifier;

impl BoundaryClassifier for DisabledBoundaryClassifier {
    fn classify(&mut self, _image: &RgbImage) -> Result<Vec<EvalBox>, StageError> {
        Ok(Vec::new())
    }
}

/// Defect detector that runs a [`PatchClassifier`] over overlapping
/// tiles of the neutralized sheet.
#[derive(Debug)]
pub struct TiledDefectDetector<C> {
    classifier: C,
    tile_size: u32,
}

impl<C: PatchClassifier> TiledDefectDetector<C> {
    #[must_use]
    pub const fn new(classifier: C, tile_size: u32) -> Self {
        Self {
            classifier,
            tile_size,
        }
    }
}

impl<C: PatchClassifier> DefectDetector for TiledDefectDetector<C> {
    fn detect(&mut self, image: &RgbImage, confidence: f64) -> Result<Vec<EvalBox>, StageError> {
        let neutral = neutralize_background(image, &HsvRange::NEUTRALIZE, true);
        let tiles = tile_layout(neutral.width(), neutral.height(), self.tile_size);
        debug!(tiles = tiles.len(), size = self.tile_size, "classifying tiles");

        let mut found = Vec::new();
        for bounds in tiles {
            let patch = OffsetImage::crop(&neutral, bounds);
            let probability = self.classifier.defect_probability(patch.image())?;
            if probability > confidence {
                debug!(x = bounds.top_left().0, y = bounds.top_left().1, probability, "defect tile");
                found.push(EvalBox::new(bounds, probability, MATERIAL_ERROR));
            }
        }
        Ok(found)
    }
}

/// Work a stage worker performs on every image it receives.
pub trait Stage: Send + 'static {
    type Output: Send + 'static;

    /// Stage name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Process one preprocessed sheet.
    ///
    /// # Errors
    ///
    /// Returns [`StageError`] if the stage cannot produce a result.
    fn run(&mut self, image: &RgbImage) -> Result<Self::Output, StageError>;
}

/// The geometric measurement engine as a stage.
#[derive(Debug)]
pub struct MeasureStage {
    engine: MeasurementEngine,
}

impl MeasureStage {
    #[must_use]
    pub const fn new(engine: MeasurementEngine) -> Self {
        Self { engine }
    }
}

impl Stage for MeasureStage {
    type Output = Vec<DistanceMeasurement>;

    fn name(&self) -> &'static str {
        "measurement"
    }

    fn run(&mut self, image: &RgbImage) -> Result<Self::Output, StageError> {
        Ok(self.engine.analyse(image)?)
    }
}

/// An [`AnomalyScorer`] as a stage.
pub struct AnomalyStage {
    scorer: Box<dyn AnomalyScorer>,
}

impl AnomalyStage {
    #[must_use]
    pub fn new(scorer: Box<dyn AnomalyScorer>) -> Self {
        Self { scorer }
    }
}

impl Stage for AnomalyStage {
    type Output = AnomalyScore;

    fn name(&self) -> &'static str {
        "anomaly"
    }

    fn run(&mut self, image: &RgbImage) -> Result<Self::Output, StageError> {
        // The model was trained on sheets with a black background.
        let neutral = neutralize_background(image, &HsvRange::NEUTRALIZE, false);
        self.scorer.score(&neutral)
    }
}

/// A [`DefectDetector`] with its confidence threshold as a stage.
pub struct DefectStage {
    detector: Box<dyn DefectDetector>,
    confidence: f64,
}

impl DefectStage {
    #[must_use]
    pub fn new(detector: Box<dyn DefectDetector>, confidence: f64) -> Self {
        Self {
            detector,
            confidence,
        }
    }
}

impl Stage for DefectStage {
    type Output = Vec<EvalBox>;

    fn name(&self) -> &'static str {
        "defects"
    }

    fn run(&mut self, image: &RgbImage) -> Result<Self::Output, StageError> {
        self.detector.detect(image, self.confidence)
    }
}

/// A [`BoundaryClassifier`] as a stage.
pub struct BoundaryStage {
    classifier: Box<dyn BoundaryClassifier>,
}

impl BoundaryStage {
    #[must_use]
    pub fn new(classifier: Box<dyn BoundaryClassifier>) -> Self {
        Self { classifier }
    }
}

impl Stage for BoundaryStage {
    type Output = Vec<EvalBox>;

    fn name(&self) -> &'static str {
        "boundary"
    }

    fn run(&mut self, image: &RgbImage) -> Result<Self::Output, StageError> {
        self.classifier.classify(image)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::Rgb;

    use super::*;

    /// Flags every tile whose top-left pixel is red.
    struct RedCornerClassifier {
        seen: usize,
    }

    impl PatchClassifier for RedCornerClassifier {
        fn defect_probability(&mut self, patch: &RgbImage) -> Result<f64, StageError> {
            self.seen += 1;
            Ok(if patch.get_pixel(0, 0).0 == [255, 0, 0] { 0.95 } else { 0.1 })
        }
    }

    struct FailingClassifier;

    impl PatchClassifier for FailingClassifier {
        fn defect_probability(&mut self, _patch: &RgbImage) -> Result<f64, StageError> {
            Err(StageError::Failed("model not loaded".to_owned()))
        }
    }

    #[test]
    fn disabled_adapters_report_nothing() {
        let image = RgbImage::new(4, 4);
        let score = DisabledAnomalyScorer.score(&image).unwrap();
        assert!(score.reconstruction.is_none());
        assert!(score.error.abs() < f64::EPSILON);
        assert!(DisabledDefectDetector.detect(&image, 0.5).unwrap().is_empty());
        assert!(DisabledBoundaryClassifier.classify(&image).unwrap().is_empty());
    }

    #[test]
    fn tiled_detector_flags_confident_tiles() {
        // 64×64 with tiles of 32: the tile at (16, 16) starts on red.
        let image = RgbImage::from_fn(64, 64, |x, y| {
            if (x, y) == (16, 16) { Rgb([255, 0, 0]) } else { Rgb([200, 180, 20]) }
        });
        let mut detector = TiledDefectDetector::new(RedCornerClassifier { seen: 0 }, 32);
        let found = detector.detect(&image, 0.8).unwrap();

        assert_eq!(detector.classifier.seen, tile_layout(64, 64, 32).len());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].bounds.top_left(), (16, 16));
        assert_eq!(found[0].label, MATERIAL_ERROR);
        assert!((found[0].score - 0.95).abs() < 1e-12);
    }

    #[test]
    fn confidence_is_exclusive() {
        let image = RgbImage::from_pixel(32, 32, Rgb([255, 0, 0]));
        let mut detector = TiledDefectDetector::new(RedCornerClassifier { seen: 0 }, 32);
        assert!(detector.detect(&image, 0.95).unwrap().is_empty());
    }

    #[test]
    fn classifier_errors_propagate() {
        let image = RgbImage::new(32, 32);
        let mut detector = TiledDefectDetector::new(FailingClassifier, 32);
        assert!(detector.detect(&image, 0.5).is_err());
    }
}
