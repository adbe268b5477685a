//! loomqc: command-line entry point of the fabric-sheet inspection station.
//!
//! - `run` starts the station loop: acquire, inspect, store, actuate.
//! - `measure` runs the measurement engine on one scan and prints per-step
//!   diagnostics, for tuning a schema without the station around it.
//! - `history` lists the most recent stored cycles.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin loomqc -- run --config station.json --dummy scans/
//! cargo run --release --bin loomqc -- measure scan.png --schema schema.json --json
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant, UNIX_EPOCH};

use clap::{Args, Parser, Subcommand};
use loomqc_pipeline::annotate::annotate;
use loomqc_pipeline::diagnostics::Clock;
use loomqc_pipeline::grayscale::decode_rgb;
use loomqc_pipeline::preprocess::preprocess;
use loomqc_pipeline::{Calibration, CropConfig, DistanceMeasurement, MeasurementEngine};
use loomqc_station::{
    Actuator, BoundaryClassifier, CycleSettings, DirectoryScanner, DisabledAnomalyScorer,
    DisabledBoundaryClassifier, DisabledDefectDetector, DisplaySink, JsonlStore, LineActuator,
    LogActuator, Orchestrator, ResultStore, StationConfig, StationError, Workers, load_schema,
    log_display,
};
use tracing::{info, warn};

/// Dimensional and defect inspection of scanned fabric sheets.
#[derive(Parser)]
#[command(name = "loomqc", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the inspection station until interrupted.
    Run(RunArgs),
    /// Measure a single scan and print diagnostics.
    Measure(MeasureArgs),
    /// Show the most recent stored cycles.
    History(HistoryArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Station config file (JSON). Built-in defaults when absent.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Replay the PNG scans of this directory instead of a scanner.
    #[arg(long)]
    dummy: Option<PathBuf>,

    /// Scanner resolution in dots per inch.
    #[arg(long)]
    dpi: Option<u32>,

    /// Keep every raw scan on disk.
    #[arg(long)]
    store_scans: bool,
}

#[derive(Args)]
struct MeasureArgs {
    /// Path to the scan (PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// Measurement schema file (JSON).
    #[arg(long)]
    schema: PathBuf,

    /// Scan resolution in dots per inch.
    #[arg(long, default_value_t = 600)]
    dpi: u32,

    /// Output measurements and diagnostics as JSON.
    #[arg(long)]
    json: bool,

    /// Treat the image as an already cropped sheet.
    #[arg(long)]
    no_preprocess: bool,

    /// Write the sheet with measurements drawn in to this file.
    #[arg(long)]
    annotate: Option<PathBuf>,
}

#[derive(Args)]
struct HistoryArgs {
    /// Result store directory.
    #[arg(long, default_value = "qc_store")]
    store: PathBuf,

    /// Number of cycles to show.
    #[arg(long, default_value_t = 10)]
    last: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run(args) => run(args).await,
        Command::Measure(args) => measure(&args),
        Command::History(args) => history(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Station config with the command-line overrides applied.
fn station_config(args: &RunArgs) -> Result<StationConfig, StationError> {
    let mut config = match &args.config {
        Some(path) => StationConfig::load(path)?,
        None => StationConfig::default(),
    };
    if let Some(dpi) = args.dpi {
        config.dpi = dpi;
    }
    if let Some(dir) = &args.dummy {
        config.dummy_dir = Some(dir.clone());
    }
    config.store_scans |= args.store_scans;
    config.validate()?;
    Ok(config)
}

async fn run(args: RunArgs) -> Result<(), String> {
    let config = station_config(&args).map_err(|e| format!("Error loading config: {e}"))?;
    info!(?config, "starting station");

    match &config.actuator {
        Some(device) => {
            let actuator = LineActuator::open(device)
                .map_err(|e| format!("Error opening {}: {e}", device.display()))?;
            serve(&config, actuator).await
        }
        None => {
            warn!("no actuator device configured, commands are only logged");
            serve(&config, LogActuator).await
        }
    }
    .map_err(|e| format!("Station error: {e}"))
}

async fn serve<A: Actuator + 'static>(
    config: &StationConfig,
    actuator: A,
) -> Result<(), StationError> {
    let Some(dummy_dir) = &config.dummy_dir else {
        return Err(StationError::Config(
            "no scanner driver is built in; replay scans with --dummy <DIR>".to_owned(),
        ));
    };
    let scanner = DirectoryScanner::open(dummy_dir)?.with_interval(Duration::from_secs(1));

    let engine = config.load_engine()?;
    warn!(
        tile_size = config.tile_size()?,
        "no defect or anomaly model is linked in, those stages report no findings"
    );
    let boundary = config
        .boundary_classifier
        .then(|| Box::new(DisabledBoundaryClassifier) as Box<dyn BoundaryClassifier>);
    let workers = Workers::spawn(
        engine,
        Box::new(DisabledAnomalyScorer),
        Box::new(DisabledDefectDetector),
        config.defect_confidence,
        boundary,
    )?;

    let store = JsonlStore::open(&config.store_dir)?;
    let (display, updates) = DisplaySink::channel();
    tokio::spawn(log_display(updates));

    let mut station = Orchestrator::new(
        workers,
        CycleSettings::from_config(config),
        actuator,
        store,
        display,
    );
    let cycles = station.run(scanner, config.dpi, shutdown_signal()).await?;
    info!(cycles, "station stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C, running until the scans run out");
        std::future::pending::<()>().await;
    }
}

fn measure(args: &MeasureArgs) -> Result<(), String> {
    let image_bytes = std::fs::read(&args.image_path)
        .map_err(|e| format!("Error reading {}: {e}", args.image_path.display()))?;
    eprintln!(
        "Image: {} ({} bytes)",
        args.image_path.display(),
        image_bytes.len(),
    );

    let (schema, templates) =
        load_schema(&args.schema).map_err(|e| format!("Error loading schema: {e}"))?;
    let engine = MeasurementEngine::new(schema, templates, Calibration::from_dpi(args.dpi))
        .map_err(|e| format!("Error building engine: {e}"))?;

    let raw = decode_rgb(&image_bytes).map_err(|e| format!("Error decoding image: {e}"))?;
    let sheet = if args.no_preprocess {
        raw
    } else {
        let start = Instant::now();
        let sheet = preprocess(&raw, &CropConfig::default())
            .map_err(|e| format!("Preprocessing error: {e}"))?;
        eprintln!(
            "Cropped {}x{} -> {}x{} in {:.3}ms",
            raw.width(),
            raw.height(),
            sheet.width(),
            sheet.height(),
            start.elapsed().as_secs_f64() * 1000.0,
        );
        sheet
    };
    eprintln!();

    let (measurements, diagnostics) =
        loomqc_pipeline::measure_with_diagnostics(&engine, &sheet, &StdClock)
            .map_err(|e| format!("Measurement error: {e}"))?;

    if args.json {
        let output = serde_json::json!({
            "measurements": measurements,
            "diagnostics": diagnostics,
        });
        let json = serde_json::to_string_pretty(&output)
            .map_err(|e| format!("Error serializing diagnostics: {e}"))?;
        println!("{json}");
    } else {
        println!("{}", diagnostics.report());
        print_measurements(&measurements);
    }

    if let Some(path) = &args.annotate {
        match annotate(&sheet, &measurements, &[]).save(path) {
            Ok(()) => eprintln!("Annotated sheet written to {}", path.display()),
            Err(e) => eprintln!("Error writing {}: {e}", path.display()),
        }
    }
    Ok(())
}

fn print_measurements(measurements: &[DistanceMeasurement]) {
    println!();
    println!(
        "{:<28} {:>10} {:>20} {:>6} {:>8}",
        "Check", "Actual", "Target", "OK", "Trusted"
    );
    println!("{}", "-".repeat(76));
    for m in measurements {
        println!(
            "{:<28} {:>10.3} {:>20} {:>6} {:>8}",
            m.name(),
            m.distance(),
            m.variance().to_string(),
            m.is_ok(),
            m.is_trustful(),
        );
    }
}

fn history(args: &HistoryArgs) -> Result<(), String> {
    let store = JsonlStore::open(&args.store)
        .map_err(|e| format!("Error opening {}: {e}", args.store.display()))?;
    let records = store
        .last(args.last)
        .map_err(|e| format!("Error reading records: {e}"))?;

    if records.is_empty() {
        println!("No stored cycles in {}", args.store.display());
        return Ok(());
    }

    println!("{:>6} {:>12} {:>6}  Failed checks", "Id", "Timestamp", "Result");
    println!("{}", "-".repeat(60));
    for record in &records {
        let failed: Vec<&str> = record
            .rows
            .iter()
            .filter(|row| !row.result)
            .map(|row| row.check.as_str())
            .collect();
        println!(
            "{:>6} {:>12} {:>6}  {}",
            record.id,
            record.timestamp,
            if record.result { "OK" } else { "NOK" },
            failed.join(", "),
        );
    }

    if let Some(oldest) = records.last() {
        let since = UNIX_EPOCH + Duration::from_secs(oldest.timestamp);
        eprintln!(
            "{} cycles shown, oldest {}s ago",
            records.len(),
            since.elapsed().map_or(0, |d| d.as_secs()),
        );
    }
    Ok(())
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}
