//! Measurement diagnostics: timing and counts for each engine step.
//!
//! Used by the `measure` command to tune schemas and templates against
//! real scans. Time is read through the [`Clock`] trait so this crate
//! stays free of any particular time source.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::engine::{MeasureError, MeasurementEngine};
use crate::types::{DistanceMeasurement, Point};

/// Source of monotonic time.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    /// The current instant.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from one engine run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasureDiagnostics {
    /// Background neutralization and grayscale conversion.
    pub neutralize: StageDiagnostics,
    /// Outline detection and edge measurements.
    pub outline: StageDiagnostics,
    /// Template matching and circle fits.
    pub features: StageDiagnostics,
    /// Edge projections and feature spacing.
    pub projections: StageDiagnostics,
    /// Total wall-clock duration (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Measurement counts.
    pub summary: MeasureSummary,
}

/// Diagnostics for a single step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this step (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Step-specific metrics.
    pub metrics: StageMetrics,
}

/// Step-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    Neutralize {
        width: u32,
        height: u32,
    },
    Outline {
        /// Corners in top-left, top-right, bottom-right, bottom-left order.
        corners: [Point; 4],
    },
    Features {
        /// Features measured.
        count: usize,
        /// Features whose fit collapsed to a zero radius.
        degenerate: usize,
    },
    Projections {
        /// Projection and spacing measurements produced.
        count: usize,
    },
}

/// Counts across the whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasureSummary {
    pub measurement_count: usize,
    pub ok_count: usize,
    pub trustful_count: usize,
}

impl MeasureDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Measurement Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<16} {:>10} {:>10}  {}",
            "Step", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        let steps = [
            ("Neutralize", &self.neutralize),
            ("Outline", &self.outline),
            ("Features", &self.features),
            ("Projections", &self.projections),
        ];
        for (name, diag) in steps {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<16} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Measurements: {}  |  OK: {}  |  Trustful: {}",
            self.summary.measurement_count, self.summary.ok_count, self.summary.trustful_count,
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format step metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Neutralize { width, height } => format!("{width}x{height}"),
        StageMetrics::Outline { corners } => corners
            .iter()
            .map(|p| format!("({:.0}, {:.0})", p.x, p.y))
            .collect::<Vec<_>>()
            .join(" "),
        StageMetrics::Features { count, degenerate } => {
            format!("features={count} degenerate={degenerate}")
        }
        StageMetrics::Projections { count } => format!("measurements={count}"),
    }
}

/// Run the engine step by step, timing each step.
///
/// Produces the same measurements, in the same order, as
/// [`MeasurementEngine::analyse`].
///
/// # Errors
///
/// Propagates any [`MeasureError`] from the engine.
pub fn measure_with_diagnostics<C: Clock>(
    engine: &MeasurementEngine,
    image: &RgbImage,
    clock: &C,
) -> Result<(Vec<DistanceMeasurement>, MeasureDiagnostics), MeasureError> {
    let start = clock.now();

    let t = clock.now();
    let gray = engine.neutralize(image)?;
    let neutralize = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: StageMetrics::Neutralize {
            width: gray.width(),
            height: gray.height(),
        },
    };

    let t = clock.now();
    let (square, mut measurements) = engine.measure_outline(&gray)?;
    let outline = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: StageMetrics::Outline {
            corners: square.corners(),
        },
    };

    let t = clock.now();
    let features = engine.measure_features(&gray)?;
    let features_diag = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: StageMetrics::Features {
            count: features.len(),
            degenerate: features.iter().filter(|f| f.fit.radius <= 0.0).count(),
        },
    };

    let t = clock.now();
    let projections = engine.measure_projections(&square, &features)?;
    let projections_diag = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: StageMetrics::Projections {
            count: projections.len(),
        },
    };

    measurements.extend(features.into_iter().map(|f| f.measurement));
    measurements.extend(projections);

    let summary = MeasureSummary {
        measurement_count: measurements.len(),
        ok_count: measurements.iter().filter(|m| m.is_ok()).count(),
        trustful_count: measurements.iter().filter(|m| m.is_trustful()).count(),
    };

    let diagnostics = MeasureDiagnostics {
        neutralize,
        outline,
        features: features_diag,
        projections: projections_diag,
        total_duration: clock.elapsed(&start),
        summary,
    };
    Ok((measurements, diagnostics))
}
