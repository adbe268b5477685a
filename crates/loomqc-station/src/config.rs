//! Station configuration and start-up loading of the measurement schema.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use loomqc_pipeline::tiling::default_tile_size;
use loomqc_pipeline::{Calibration, CropConfig, MeasurementEngine, MeasurementSchema, Template};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StationError;

/// Station settings, read once at start-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// Scanner resolution in dots per inch.
    pub dpi: u32,
    /// Measurement schema document.
    pub schema: PathBuf,
    /// Highest passing reconstruction error of the anomaly scorer.
    pub anomaly_threshold: f64,
    /// Defect probability above which a tile is flagged.
    pub defect_confidence: f64,
    /// Defect tile edge length; derived from `dpi` when absent.
    pub tile_size: Option<u32>,
    /// Seconds to wait for a stage before giving up on a cycle.
    pub stage_timeout_secs: f64,
    /// Directory of the result store.
    pub store_dir: PathBuf,
    /// Serial device of the actuation link; actuation is only logged
    /// when absent.
    pub actuator: Option<PathBuf>,
    /// Directory of PNG scans to replay instead of a scanner.
    pub dummy_dir: Option<PathBuf>,
    /// Keep every raw scan as a PNG in `store_dir/scans`.
    pub store_scans: bool,
    /// Run the boundary classifier stage.
    pub boundary_classifier: bool,
    /// Coarse crop parameters.
    pub crop: CropConfig,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            dpi: 600,
            schema: PathBuf::from("schema.json"),
            anomaly_threshold: 0.01,
            defect_confidence: 0.8,
            tile_size: None,
            stage_timeout_secs: 120.0,
            store_dir: PathBuf::from("qc_store"),
            actuator: None,
            dummy_dir: None,
            store_scans: false,
            boundary_classifier: false,
            crop: CropConfig::default(),
        }
    }
}

impl StationConfig {
    /// Read and validate a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns [`StationError`] if the file cannot be read, does not
    /// parse, or fails [`validate`](Self::validate).
    pub fn load(path: &Path) -> Result<Self, StationError> {
        let text = read(path)?;
        let config = Self::from_json(&text)?;
        info!(path = %path.display(), dpi = config.dpi, "loaded station config");
        Ok(config)
    }

    /// Parse and validate a JSON config document.
    ///
    /// # Errors
    ///
    /// Returns [`StationError::Config`] for malformed or invalid
    /// settings.
    pub fn from_json(text: &str) -> Result<Self, StationError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| StationError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings that serde cannot.
    ///
    /// # Errors
    ///
    /// Returns [`StationError::Config`] naming the first invalid setting.
    pub fn validate(&self) -> Result<(), StationError> {
        if self.dpi == 0 {
            return Err(StationError::Config("dpi must be positive".to_owned()));
        }
        self.tile_size()?;
        if !(self.stage_timeout_secs.is_finite() && self.stage_timeout_secs > 0.0) {
            return Err(StationError::Config(format!(
                "stage_timeout_secs must be positive, got {}",
                self.stage_timeout_secs
            )));
        }
        if !(0.0..=1.0).contains(&self.defect_confidence) {
            return Err(StationError::Config(format!(
                "defect_confidence must be within [0, 1], got {}",
                self.defect_confidence
            )));
        }
        if !self.anomaly_threshold.is_finite() {
            return Err(StationError::Config("anomaly_threshold must be finite".to_owned()));
        }
        if self.crop.scale_factor == 0 {
            return Err(StationError::Config("crop.scale_factor must be positive".to_owned()));
        }
        Ok(())
    }

    /// Defect tile size, explicit or derived from the resolution.
    ///
    /// # Errors
    ///
    /// Returns [`StationError::Config`] when no size is configured and the
    /// resolution has no default.
    pub fn tile_size(&self) -> Result<u32, StationError> {
        match self.tile_size {
            Some(0) => Err(StationError::Config("tile_size must be positive".to_owned())),
            Some(size) => Ok(size),
            None => default_tile_size(self.dpi).ok_or_else(|| {
                StationError::Config(format!(
                    "no default tile size for {} dpi; set tile_size",
                    self.dpi
                ))
            }),
        }
    }

    #[must_use]
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.stage_timeout_secs)
    }

    #[must_use]
    pub fn calibration(&self) -> Calibration {
        Calibration::from_dpi(self.dpi)
    }

    /// Load the schema, its templates and build the measurement engine.
    ///
    /// # Errors
    ///
    /// Any missing file or invalid schema is a [`StationError`].
    pub fn load_engine(&self) -> Result<MeasurementEngine, StationError> {
        let (schema, templates) = load_schema(&self.schema)?;
        Ok(MeasurementEngine::new(schema, templates, self.calibration())?)
    }
}

/// Read a schema document and the template images it references.
///
/// Template and weight paths are resolved relative to the schema file.
///
/// # Errors
///
/// Returns [`StationError`] if the schema does not parse or validate, or
/// a referenced image cannot be loaded.
pub fn load_schema(path: &Path) -> Result<(MeasurementSchema, HashMap<String, Template>), StationError> {
    let schema = MeasurementSchema::from_json(&read(path)?)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));

    let mut templates = HashMap::new();
    for (name, config) in schema.template_paths() {
        let image = load_gray(&base.join(&config.template))?;
        let weights = config
            .weights
            .as_ref()
            .map(|w| load_gray(&base.join(w)))
            .transpose()?;
        debug!(feature = name, width = image.width(), height = image.height(), "loaded template");
        templates.insert(name.to_owned(), Template { image, weights });
    }

    info!(
        path = %path.display(),
        features = schema.features().len(),
        "loaded measurement schema"
    );
    Ok((schema, templates))
}

fn load_gray(path: &Path) -> Result<image::GrayImage, StationError> {
    image::open(path)
        .map(|img| img.to_luma8())
        .map_err(|source| StationError::Template {
            path: path.to_owned(),
            source,
        })
}

fn read(path: &Path) -> Result<String, StationError> {
    std::fs::read_to_string(path).map_err(|source| StationError::Read {
        path: path.to_owned(),
        source,
    })
}
