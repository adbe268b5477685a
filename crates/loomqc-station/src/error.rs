//! Error types of the inspection station.

use std::path::PathBuf;

use loomqc_pipeline::{MeasureError, PipelineError, SchemaError};

/// Errors that stop the station from starting or running.
#[derive(Debug, thiserror::Error)]
pub enum StationError {
    /// A configuration or schema file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The station configuration is malformed.
    #[error("invalid station config: {0}")]
    Config(String),

    /// The measurement schema is malformed or incomplete.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A template or weight mask could not be loaded.
    #[error("failed to load template {path}: {source}")]
    Template {
        path: PathBuf,
        source: image::ImageError,
    },

    /// The measurement engine refused the configuration.
    #[error(transparent)]
    Measure(#[from] MeasureError),

    /// The result store could not be opened.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A worker or scanner thread could not be started.
    #[error("failed to start {what}: {source}")]
    Spawn {
        what: &'static str,
        source: std::io::Error,
    },

    /// The scanner stopped with a fatal error.
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
}

/// Scanner failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquisitionError {
    /// Retry on the next cycle (for example an empty feeder).
    #[error("transient scanner failure: {0}")]
    Transient(String),

    /// Surfaced to the operator.
    #[error("scanner failure: {0}")]
    Fatal(String),
}

/// Marker the scanner driver puts in the message of an empty feeder.
const FEEDER_EMPTY: &str = "feeder out of";

impl AcquisitionError {
    /// Classify a driver message.
    #[must_use]
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains(FEEDER_EMPTY) {
            Self::Transient(message)
        } else {
            Self::Fatal(message)
        }
    }

    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Failure inside one analysis stage.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StageError {
    /// The stage's model or engine rejected the image.
    #[error("{0}")]
    Failed(String),

    /// The stage panicked while processing.
    #[error("stage panicked: {0}")]
    Panicked(String),
}

impl From<MeasureError> for StageError {
    fn from(e: MeasureError) -> Self {
        Self::Failed(e.to_string())
    }
}

impl From<PipelineError> for StageError {
    fn from(e: PipelineError) -> Self {
        Self::Failed(e.to_string())
    }
}

/// Failure talking to a stage worker.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkerError {
    /// The worker is still processing an earlier request.
    #[error("stage `{0}` is still busy with an earlier request")]
    Busy(&'static str),

    /// The worker thread has exited.
    #[error("stage `{0}` is no longer running")]
    Disconnected(&'static str),

    /// No reply arrived within the stage timeout.
    #[error("stage `{stage}` did not reply within {seconds:.1}s")]
    Timeout { stage: &'static str, seconds: f64 },

    /// The stage replied with an error.
    #[error("stage `{stage}` failed: {source}")]
    Stage {
        stage: &'static str,
        source: StageError,
    },
}

/// Why a cycle produced no verdict.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    /// The scan could not be cropped to the material.
    #[error("preprocessing failed: {0}")]
    Preprocess(#[from] PipelineError),

    /// A mandatory stage failed, stalled or is gone.
    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Failure on the actuation link.
#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    /// The transport failed.
    #[error("actuator I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The controller echoed something other than the command.
    #[error("could not send command `{sent}`: controller answered `{received}`")]
    Mismatch { sent: String, received: String },

    /// The controller did not answer in time.
    #[error("controller did not answer `{sent}` within {seconds:.1}s")]
    Timeout { sent: String, seconds: f64 },
}

/// Failure of the result store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed store record: {0}")]
    Record(#[from] serde_json::Error),

    #[error("failed to encode or decode record image: {0}")]
    Image(#[from] image::ImageError),

    #[error("no record with id {0}")]
    NotFound(u64),
}
