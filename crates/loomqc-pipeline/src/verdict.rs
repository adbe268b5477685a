//! Pass/fail aggregation over the results of one inspection cycle.

use serde::{Deserialize, Serialize};

use crate::types::{DistanceMeasurement, EvalBox};

/// One row of the result table shown to the operator and persisted with
/// each cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRow {
    pub check: String,
    pub result: bool,
    pub actual: f64,
    pub target: String,
}

/// Stage results a verdict is computed from.
#[derive(Debug, Clone, Copy)]
pub struct VerdictInput<'a> {
    /// Boxes flagged by the defect detector.
    pub defects: &'a [EvalBox],
    /// Reconstruction error reported by the anomaly scorer.
    pub anomaly_error: f64,
    /// Highest passing reconstruction error.
    pub anomaly_threshold: f64,
    /// Boxes flagged by the boundary classifier, if that stage ran.
    pub boundary_cuts: Option<&'a [EvalBox]>,
    /// Geometric measurements.
    pub measurements: &'a [DistanceMeasurement],
}

/// Overall result of a cycle with its per-check rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub passed: bool,
    pub rows: Vec<CheckRow>,
}

impl Verdict {
    /// Aggregate stage results.
    ///
    /// The sheet passes only if no defect or boundary cut was found, the
    /// reconstruction error is at most the threshold and every
    /// measurement is within tolerance. Rows come in the order
    /// `material_errors`, `reconstruction_error`, `boundary_cuts` (if the
    /// stage ran), then one row per measurement.
    #[must_use]
    pub fn evaluate(input: &VerdictInput<'_>) -> Self {
        let mut rows = Vec::with_capacity(input.measurements.len() + 3);

        rows.push(count_row("material_errors", input.defects.len()));
        rows.push(CheckRow {
            check: "reconstruction_error".to_owned(),
            result: input.anomaly_error <= input.anomaly_threshold,
            actual: input.anomaly_error,
            target: format!("<= {}", input.anomaly_threshold),
        });
        if let Some(cuts) = input.boundary_cuts {
            rows.push(count_row("boundary_cuts", cuts.len()));
        }
        rows.extend(input.measurements.iter().map(|m| CheckRow {
            check: m.name().to_owned(),
            result: m.is_ok(),
            actual: m.distance(),
            target: m.variance().to_string(),
        }));

        let passed = rows.iter().all(|row| row.result);
        Self { passed, rows }
    }

    /// Rows that failed.
    pub fn failures(&self) -> impl Iterator<Item = &CheckRow> {
        self.rows.iter().filter(|row| !row.result)
    }
}

fn count_row(check: &str, count: usize) -> CheckRow {
    // Box counts are tiny.
    #[allow(clippy::cast_precision_loss)]
    let actual = count as f64;
    CheckRow {
        check: check.to_owned(),
        result: count == 0,
        actual,
        target: "0".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Band, BoundingBox, Point};

    fn measurement(name: &str, distance: f64) -> DistanceMeasurement {
        DistanceMeasurement::new(
            name,
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            distance,
            Band::new(10.0, 20.0),
        )
    }

    fn defect() -> EvalBox {
        EvalBox::new(BoundingBox::new((0, 0), (10, 10)), 0.93, "material_error")
    }

    #[test]
    fn all_clear_passes() {
        let measurements = [measurement("a", 15.0), measurement("b", 10.0)];
        let verdict = Verdict::evaluate(&VerdictInput {
            defects: &[],
            anomaly_error: 0.004,
            anomaly_threshold: 0.01,
            boundary_cuts: None,
            measurements: &measurements,
        });
        assert!(verdict.passed);
        let checks: Vec<&str> = verdict.rows.iter().map(|r| r.check.as_str()).collect();
        assert_eq!(checks, ["material_errors", "reconstruction_error", "a", "b"]);
        assert_eq!(verdict.rows[1].target, "<= 0.01");
        assert_eq!(verdict.rows[2].target, "10 - 20");
    }

    #[test]
    fn single_defect_fails_regardless_of_measurements() {
        let measurements = [measurement("a", 15.0)];
        let defects = [defect()];
        let verdict = Verdict::evaluate(&VerdictInput {
            defects: &defects,
            anomaly_error: 0.0,
            anomaly_threshold: 0.01,
            boundary_cuts: None,
            measurements: &measurements,
        });
        assert!(!verdict.passed);
        assert!((verdict.rows[0].actual - 1.0).abs() < f64::EPSILON);
        assert_eq!(verdict.failures().count(), 1);
    }

    #[test]
    fn anomaly_threshold_is_inclusive() {
        let with_error = |anomaly_error| {
            Verdict::evaluate(&VerdictInput {
                defects: &[],
                anomaly_error,
                anomaly_threshold: 0.01,
                boundary_cuts: None,
                measurements: &[],
            })
        };
        assert!(with_error(0.01).passed);
        assert!(!with_error(0.011).passed);
    }

    #[test]
    fn out_of_tolerance_measurement_fails() {
        let measurements = [measurement("a", 15.0), measurement("b", 25.0)];
        let verdict = Verdict::evaluate(&VerdictInput {
            defects: &[],
            anomaly_error: 0.0,
            anomaly_threshold: 0.01,
            boundary_cuts: None,
            measurements: &measurements,
        });
        assert!(!verdict.passed);
        let failed: Vec<&str> = verdict.failures().map(|r| r.check.as_str()).collect();
        assert_eq!(failed, ["b"]);
    }

    #[test]
    fn boundary_cuts_row_only_when_stage_ran() {
        let cuts = [defect()];
        let verdict = Verdict::evaluate(&VerdictInput {
            defects: &[],
            anomaly_error: 0.0,
            anomaly_threshold: 0.01,
            boundary_cuts: Some(&cuts),
            measurements: &[],
        });
        assert!(!verdict.passed);
        assert_eq!(verdict.rows[2].check, "boundary_cuts");
    }

    #[test]
    fn rows_serialize_with_stable_keys() {
        let verdict = Verdict::evaluate(&VerdictInput {
            defects: &[],
            anomaly_error: 0.0,
            anomaly_threshold: 0.01,
            boundary_cuts: None,
            measurements: &[],
        });
        let json = serde_json::to_value(&verdict.rows[0]).unwrap_or_default();
        assert_eq!(json["check"], "material_errors");
        assert_eq!(json["result"], true);
        assert_eq!(json["target"], "0");
    }
}
