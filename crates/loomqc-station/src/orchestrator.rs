//! The inspection cycle.
//!
//! One cycle per acquired scan: crop the sheet once, fan it out to every
//! stage worker, join all replies, aggregate a verdict, then persist,
//! display and actuate. A failing cycle never ends the loop; it goes
//! through the error path (`error`, then `ready`) and the station waits
//! for the next sheet.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use loomqc_pipeline::annotate::annotate;
use loomqc_pipeline::preprocess::preprocess;
use loomqc_pipeline::{
    CropConfig, DistanceMeasurement, EvalBox, MeasurementEngine, RgbImage, Verdict, VerdictInput,
};
use tracing::{error, info, warn};

use crate::actuator::{Actuator, Command};
use crate::config::StationConfig;
use crate::display::{DisplaySink, DisplayUpdate, Level};
use crate::error::{CycleError, StationError, WorkerError};
use crate::scanner::{Scanner, spawn_scanner};
use crate::stages::{
    AnomalyScore, AnomalyScorer, AnomalyStage, BoundaryClassifier, BoundaryStage, DefectDetector,
    DefectStage, MeasureStage,
};
use crate::store::ResultStore;
use crate::worker::{StageWorker, Ticket};

/// The stage workers of a station.
pub struct Workers {
    measure: StageWorker<MeasureStage>,
    anomaly: StageWorker<AnomalyStage>,
    defects: StageWorker<DefectStage>,
    boundary: Option<StageWorker<BoundaryStage>>,
}

impl Workers {
    /// Start one worker thread per stage. The boundary stage only runs
    /// when a classifier is given.
    ///
    /// # Errors
    ///
    /// Returns [`StationError::Spawn`] if a thread cannot be started.
    pub fn spawn(
        engine: MeasurementEngine,
        scorer: Box<dyn AnomalyScorer>,
        detector: Box<dyn DefectDetector>,
        defect_confidence: f64,
        boundary: Option<Box<dyn BoundaryClassifier>>,
    ) -> Result<Self, StationError> {
        let spawn_error = |source| StationError::Spawn {
            what: "stage worker",
            source,
        };
        Ok(Self {
            measure: StageWorker::spawn(MeasureStage::new(engine)).map_err(spawn_error)?,
            anomaly: StageWorker::spawn(AnomalyStage::new(scorer)).map_err(spawn_error)?,
            defects: StageWorker::spawn(DefectStage::new(detector, defect_confidence))
                .map_err(spawn_error)?,
            boundary: boundary
                .map(|classifier| StageWorker::spawn(BoundaryStage::new(classifier)))
                .transpose()
                .map_err(spawn_error)?,
        })
    }
}

/// Per-cycle settings.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    /// Highest passing reconstruction error.
    pub anomaly_threshold: f64,
    /// How long to wait for each stage.
    pub stage_timeout: Duration,
    pub crop: CropConfig,
    /// How long the `error` state is shown before returning to `ready`.
    pub error_hold: Duration,
    /// Where raw scans are archived, if anywhere.
    pub scan_dir: Option<PathBuf>,
}

impl CycleSettings {
    #[must_use]
    pub fn from_config(config: &StationConfig) -> Self {
        Self {
            anomaly_threshold: config.anomaly_threshold,
            stage_timeout: config.stage_timeout(),
            crop: config.crop,
            error_hold: Duration::from_secs(1),
            scan_dir: config.store_scans.then(|| config.store_dir.join("scans")),
        }
    }
}

/// State owned by exactly one cycle.
#[derive(Debug)]
pub struct CycleContext {
    pub cycle: u64,
    started: Instant,
    sheet: Arc<RgbImage>,
}

impl CycleContext {
    /// The cropped sheet every stage sees.
    #[must_use]
    pub fn sheet(&self) -> &RgbImage {
        &self.sheet
    }
}

/// Everything a completed cycle found.
#[derive(Debug, Clone)]
pub struct Inspection {
    pub verdict: Verdict,
    pub measurements: Vec<DistanceMeasurement>,
    pub defects: Vec<EvalBox>,
    pub boundary_cuts: Option<Vec<EvalBox>>,
    pub anomaly_error: f64,
    /// Store id, if persisting succeeded.
    pub record_id: Option<u64>,
}

/// Outcome of one cycle.
#[derive(Debug)]
pub struct CycleResult {
    pub cycle: u64,
    pub outcome: Result<Inspection, CycleError>,
}

impl CycleResult {
    /// Returns `true` only for a completed cycle whose sheet passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.outcome.as_ref().is_ok_and(|i| i.verdict.passed)
    }
}

/// Coordinator of the stage workers and the station's outputs.
pub struct Orchestrator<A, R> {
    workers: Workers,
    settings: CycleSettings,
    /// Lent to a blocking task while a command is in flight.
    actuator: Option<A>,
    store: R,
    display: DisplaySink,
    cycles: u64,
}

impl<A: Actuator + 'static, R: ResultStore> Orchestrator<A, R> {
    #[must_use]
    pub const fn new(
        workers: Workers,
        settings: CycleSettings,
        actuator: A,
        store: R,
        display: DisplaySink,
    ) -> Self {
        Self {
            workers,
            settings,
            actuator: Some(actuator),
            store,
            display,
            cycles: 0,
        }
    }

    #[must_use]
    pub const fn store(&self) -> &R {
        &self.store
    }

    #[must_use]
    pub const fn actuator(&self) -> Option<&A> {
        self.actuator.as_ref()
    }

    /// Inspect one raw scan.
    ///
    /// Failures of this cycle are reported through the error path and
    /// returned in [`CycleResult::outcome`]; they never abort the caller.
    pub async fn run_cycle(&mut self, raw: RgbImage) -> CycleResult {
        self.cycles += 1;
        let cycle = self.cycles;

        self.signal(Command::Processing).await;
        self.display.send(DisplayUpdate::Clear);
        self.display.notify(Level::Info, "Processing image...");

        let outcome = match self.prepare(cycle, &raw) {
            Ok(ctx) => self.inspect(ctx).await,
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(inspection) => {
                self.signal(Command::for_verdict(inspection.verdict.passed))
                    .await;
                self.display.notify(Level::Info, "Finished processing image!");
            }
            Err(e) => self.report_failure(Some(cycle), &e.to_string()).await,
        }
        CycleResult { cycle, outcome }
    }

    fn prepare(&self, cycle: u64, raw: &RgbImage) -> Result<CycleContext, CycleError> {
        if let Some(dir) = &self.settings.scan_dir {
            archive_scan(dir, cycle, raw);
        }

        let started = Instant::now();
        let sheet = preprocess(raw, &self.settings.crop)?;
        info!(
            cycle,
            elapsed_ms = elapsed_ms(started),
            width = sheet.width(),
            height = sheet.height(),
            "cropped sheet"
        );

        let sheet = Arc::new(sheet);
        self.display.send(DisplayUpdate::Cropped(Arc::clone(&sheet)));
        Ok(CycleContext {
            cycle,
            started,
            sheet,
        })
    }

    async fn inspect(&mut self, ctx: CycleContext) -> Result<Inspection, CycleError> {
        let cycle = ctx.cycle;
        let timeout = self.settings.stage_timeout;
        let fanned_out = Instant::now();

        // A mandatory stage still busy with an abandoned sheet fails the
        // cycle before any worker takes this one.
        let workers = &self.workers;
        for (busy, stage) in [
            (workers.measure.is_busy(), workers.measure.name()),
            (workers.defects.is_busy(), workers.defects.name()),
        ] {
            if busy {
                return Err(WorkerError::Busy(stage).into());
            }
        }

        let measure = self.workers.measure.submit(cycle, Arc::clone(&ctx.sheet));
        let defects = self.workers.defects.submit(cycle, Arc::clone(&ctx.sheet));
        let anomaly = self.workers.anomaly.submit(cycle, Arc::clone(&ctx.sheet));
        let boundary = self
            .workers
            .boundary
            .as_ref()
            .map(|worker| worker.submit(cycle, Arc::clone(&ctx.sheet)));

        let (measurements, defects, anomaly, boundary) = tokio::join!(
            wait_optional(measure, timeout),
            wait_optional(defects, timeout),
            wait_optional(anomaly, timeout),
            async {
                match boundary {
                    Some(ticket) => Some(wait_optional(ticket, timeout).await),
                    None => None,
                }
            },
        );
        info!(cycle, elapsed_ms = elapsed_ms(fanned_out), "all stages replied");

        let measurements = measurements?;
        let defects = defects?;
        let anomaly = anomaly.unwrap_or_else(|e| {
            warn!(cycle, error = %e, "anomaly scorer unavailable, scoring zero");
            AnomalyScore::default()
        });
        let boundary_cuts = boundary.map(|cuts| {
            cuts.unwrap_or_else(|e| {
                warn!(cycle, error = %e, "boundary classifier unavailable, assuming no cuts");
                Vec::new()
            })
        });

        let verdict = Verdict::evaluate(&VerdictInput {
            defects: &defects,
            anomaly_error: anomaly.error,
            anomaly_threshold: self.settings.anomaly_threshold,
            boundary_cuts: boundary_cuts.as_deref(),
            measurements: &measurements,
        });
        for row in verdict.failures() {
            info!(cycle, check = %row.check, actual = row.actual, target = %row.target, "check failed");
        }

        self.display.send(DisplayUpdate::Results {
            passed: verdict.passed,
            rows: verdict.rows.clone(),
        });
        self.display
            .send(DisplayUpdate::Annotated(annotate(ctx.sheet(), &measurements, &defects)));
        self.display
            .send(DisplayUpdate::Reconstruction(anomaly.reconstruction));

        let record_id = match self
            .store
            .insert(SystemTime::now(), verdict.passed, &verdict.rows, ctx.sheet())
        {
            Ok(id) => Some(id),
            Err(e) => {
                error!(cycle, error = %e, "failed to store cycle");
                self.display
                    .notify(Level::Error, format!("Could not store result: {e}"));
                None
            }
        };

        info!(
            cycle,
            passed = verdict.passed,
            record_id,
            elapsed_ms = elapsed_ms(ctx.started),
            "cycle complete"
        );
        Ok(Inspection {
            verdict,
            measurements,
            defects,
            boundary_cuts,
            anomaly_error: anomaly.error,
            record_id,
        })
    }

    /// Inspect scans from `scanner` until it is exhausted or `shutdown`
    /// resolves. Returns the number of cycles run.
    ///
    /// # Errors
    ///
    /// Returns [`StationError::Spawn`] if the scanner thread cannot be
    /// started.
    pub async fn run<S, F>(&mut self, scanner: S, dpi: u32, shutdown: F) -> Result<u64, StationError>
    where
        S: Scanner + 'static,
        F: Future<Output = ()>,
    {
        let mut scans = spawn_scanner(scanner, dpi).map_err(|source| StationError::Spawn {
            what: "scanner",
            source,
        })?;
        tokio::pin!(shutdown);

        self.signal(Command::Ready).await;
        let first = self.cycles;
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                scan = scans.recv() => match scan {
                    Some(Ok(raw)) => {
                        self.run_cycle(raw).await;
                    }
                    Some(Err(e)) => self.report_failure(None, &e.to_string()).await,
                    None => {
                        info!("scanner stopped");
                        break;
                    }
                },
            }
        }
        Ok(self.cycles - first)
    }

    /// Tell the operator, flash `error`, then return to `ready`.
    async fn report_failure(&mut self, cycle: Option<u64>, message: &str) {
        error!(cycle, %message, "cycle failed");
        self.display.notify(Level::Error, message);
        self.signal(Command::Error).await;
        tokio::time::sleep(self.settings.error_hold).await;
        self.signal(Command::Ready).await;
    }

    /// Send `command` on a blocking thread so a stalled controller cannot
    /// hold up the runtime. Failures are reported, never propagated.
    async fn signal(&mut self, command: Command) {
        let Some(mut actuator) = self.actuator.take() else {
            error!(%command, "actuator lost, command not sent");
            return;
        };
        let sent = tokio::task::spawn_blocking(move || {
            let result = actuator.send(command);
            (actuator, result)
        })
        .await;

        let message = match sent {
            Ok((actuator, result)) => {
                self.actuator = Some(actuator);
                match result {
                    Ok(()) => return,
                    Err(e) => e.to_string(),
                }
            }
            Err(e) => format!("actuator task failed: {e}"),
        };
        error!(%command, error = %message, "actuation failed");
        self.display
            .notify(Level::Error, format!("Actuation failed: {message}"));
    }
}

async fn wait_optional<T>(
    ticket: Result<Ticket<T>, WorkerError>,
    timeout: Duration,
) -> Result<T, WorkerError> {
    ticket?.wait(timeout).await
}

fn archive_scan(dir: &std::path::Path, cycle: u64, raw: &RgbImage) {
    let stamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    let path = dir.join(format!("scan_{stamp}_{cycle}.png"));
    let saved = std::fs::create_dir_all(dir)
        .map_err(image::ImageError::IoError)
        .and_then(|()| raw.save(&path));
    match saved {
        Ok(()) => info!(path = %path.display(), "archived scan"),
        Err(e) => warn!(path = %path.display(), error = %e, "failed to archive scan"),
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
