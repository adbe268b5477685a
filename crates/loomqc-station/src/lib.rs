//! loomqc-station: the inspection station around the measurement pipeline.
//!
//! Acquires scans, fans each cropped sheet out to the analysis stages
//! (one worker thread per stage), aggregates the replies into a verdict,
//! and drives the outputs: result store, operator display and the
//! line-based actuation link to the sorting hardware.
//!
//! Model runtimes (anomaly scorer, defect and boundary classifiers) are
//! outside this crate and plug in through the traits in [`stages`].

pub mod actuator;
pub mod config;
pub mod display;
pub mod error;
pub mod orchestrator;
pub mod scanner;
pub mod stages;
pub mod store;
pub mod worker;

pub use actuator::{Actuator, Command, LineActuator, LogActuator};
pub use config::{StationConfig, load_schema};
pub use display::{DisplaySink, DisplayUpdate, Level, log_display};
pub use error::{
    AcquisitionError, ActuatorError, CycleError, StageError, StationError, StoreError, WorkerError,
};
pub use orchestrator::{CycleResult, CycleSettings, Inspection, Orchestrator, Workers};
pub use scanner::{DirectoryScanner, Scanner, spawn_scanner};
pub use stages::{
    AnomalyScore, AnomalyScorer, BoundaryClassifier, DefectDetector, DisabledAnomalyScorer,
    DisabledBoundaryClassifier, DisabledDefectDetector, PatchClassifier, Stage, TiledDefectDetector,
};
pub use store::{CycleRecord, JsonlStore, MemoryStore, ResultStore};
pub use worker::{StageWorker, Ticket};
