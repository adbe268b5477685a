//! Measurement schema: the named checks the engine evaluates.
//!
//! A schema is a JSON document loaded once at start-up:
//!
//! ```json
//! {
//!   "features": ["front_weft_circle", "back_weft_circle"],
//!   "checks": {
//!     "weft_edge": { "variance": [495.0, 505.0] },
//!     "warp_edge": { "variance": [695.0, 705.0] },
//!     "front_weft_circle": {
//!       "variance": [4.5, 5.5],
//!       "trust": [0.5, 1.5],
//!       "feature": {
//!         "template": { "template": "circle.png", "region": { "x0": 0.0, "x1": 0.3, "y0": 0.0, "y1": 0.3 } },
//!         "boundary_margin": [20, 20]
//!       }
//!     },
//!     "front_weft_circle_to_warp_cut": { "variance": [30.0, 40.0] },
//!     "circle_to_circle": { "variance": [400.0, 410.0] }
//!   }
//! }
//! ```
//!
//! Validation runs eagerly in [`MeasurementSchema::from_json`]; a schema
//! that passes validation has every check the engine will look up.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::geometry::EdgeAxis;
use crate::outline::OutlineConfig;
use crate::template::TemplateMatchConfig;
use crate::types::Band;

/// Check name of the top and bottom edge lengths.
pub const WEFT_EDGE: &str = "weft_edge";
/// Check name of the left and right edge lengths.
pub const WARP_EDGE: &str = "warp_edge";
/// Check name of the distance between the first two features' warp-edge
/// projections.
pub const CIRCLE_TO_CIRCLE: &str = "circle_to_circle";

/// Name of the check for the projection of `feature` onto the nearest
/// edge of `axis`, e.g. `front_weft_circle_to_warp_cut`.
#[must_use]
pub fn projection_check(feature: &str, axis: EdgeAxis) -> String {
    format!("{feature}_to_{}_cut", axis.as_str())
}

/// Name of the edge-length check for an axis.
#[must_use]
pub const fn edge_check(axis: EdgeAxis) -> &'static str {
    match axis {
        EdgeAxis::Weft => WEFT_EDGE,
        EdgeAxis::Warp => WARP_EDGE,
    }
}

/// Errors raised while loading or querying a schema.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The document is not valid JSON or does not match the schema shape.
    #[error("invalid measurement schema: {0}")]
    Parse(#[from] serde_json::Error),

    /// A check the engine requires is not defined.
    #[error("measurement schema has no check named `{0}`")]
    MissingCheck(String),

    /// A declared feature has no `feature` section.
    #[error("check `{0}` is listed as a feature but has no template binding")]
    NotAFeature(String),

    /// A feature is declared twice.
    #[error("feature `{0}` is declared more than once")]
    DuplicateFeature(String),

    /// A band has `lo > hi` or a non-finite bound.
    #[error("check `{check}` has an invalid {kind} band [{lo}, {hi}]")]
    InvalidBand {
        check: String,
        kind: &'static str,
        lo: f64,
        hi: f64,
    },

    /// A template search region is outside `[0, 1]` or empty.
    #[error("feature `{0}` has an invalid search region")]
    InvalidRegion(String),
}

/// Binding of a circular reference feature to its template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    /// How to find the feature.
    pub template: TemplateMatchConfig,
    /// Pixels added on each side of the matched box, `[dx, dy]`.
    #[serde(default)]
    pub boundary_margin: [u32; 2],
}

/// One named check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckSpec {
    /// Tolerance band in physical units.
    pub variance: Band,
    /// Trust band, as factors applied to the tolerance band.
    #[serde(default)]
    pub trust: Option<Band>,
    /// Template binding, for circular features.
    #[serde(default)]
    pub feature: Option<FeatureSpec>,
}

const fn default_binary_threshold() -> u8 {
    150
}

/// Immutable registry of named checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementSchema {
    #[serde(default)]
    outline: OutlineConfig,
    #[serde(default = "default_binary_threshold")]
    binary_threshold: u8,
    #[serde(default)]
    features: Vec<String>,
    checks: HashMap<String, CheckSpec>,
}

impl MeasurementSchema {
    /// Parse and validate a schema document.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Parse`] for malformed documents and the
    /// validation errors of [`validate`](Self::validate).
    pub fn from_json(text: &str) -> Result<Self, SchemaError> {
        let schema: Self = serde_json::from_str(text)?;
        schema.validate()?;
        Ok(schema)
    }

    /// Check that every name the engine looks up is present and every
    /// band and search region is well formed.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), SchemaError> {
        self.check(WEFT_EDGE)?;
        self.check(WARP_EDGE)?;

        for (i, name) in self.features.iter().enumerate() {
            if self.features[..i].contains(name) {
                return Err(SchemaError::DuplicateFeature(name.clone()));
            }
            let feature = self.feature(name)?;
            if !feature.template.region.is_valid() {
                return Err(SchemaError::InvalidRegion(name.clone()));
            }
        }

        if self.features.len() >= 2 {
            self.check(CIRCLE_TO_CIRCLE)?;
        }

        for (name, check) in &self.checks {
            let bands = [("variance", Some(check.variance)), ("trust", check.trust)];
            for (kind, band) in bands {
                if let Some(band) = band
                    && !band.is_valid()
                {
                    return Err(SchemaError::InvalidBand {
                        check: name.clone(),
                        kind,
                        lo: band.lo,
                        hi: band.hi,
                    });
                }
            }
        }
        Ok(())
    }

    /// Look up a check by name.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::MissingCheck`] if no such check exists.
    pub fn check(&self, name: &str) -> Result<&CheckSpec, SchemaError> {
        self.checks
            .get(name)
            .ok_or_else(|| SchemaError::MissingCheck(name.to_owned()))
    }

    /// Look up a check that is optional, such as a projection check.
    #[must_use]
    pub fn optional_check(&self, name: &str) -> Option<&CheckSpec> {
        self.checks.get(name)
    }

    /// Look up the template binding of a feature.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::MissingCheck`] or
    /// [`SchemaError::NotAFeature`].
    pub fn feature(&self, name: &str) -> Result<&FeatureSpec, SchemaError> {
        self.check(name)?
            .feature
            .as_ref()
            .ok_or_else(|| SchemaError::NotAFeature(name.to_owned()))
    }

    /// Declared circular features, in measurement order.
    #[must_use]
    pub fn features(&self) -> &[String] {
        &self.features
    }

    /// Outline scan parameters.
    #[must_use]
    pub const fn outline(&self) -> &OutlineConfig {
        &self.outline
    }

    /// Grey level at or below which a pixel counts as a feature pixel.
    #[must_use]
    pub const fn binary_threshold(&self) -> u8 {
        self.binary_threshold
    }

    /// Template and weight paths of every feature, as written in the
    /// document.
    pub fn template_paths(&self) -> impl Iterator<Item = (&str, &TemplateMatchConfig)> {
        self.features.iter().filter_map(|name| {
            self.checks
                .get(name)
                .and_then(|c| c.feature.as_ref())
                .map(|f| (name.as_str(), &f.template))
        })
    }
}
