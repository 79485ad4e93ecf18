//! Numeric figures that carry their provenance
//!
//! Every number the engine reports is one of measured, defaulted or
//! unavailable, so a presentation layer can always tell "zero because
//! measured zero" apart from "zero because the input was missing".

use crate::models::SourceCategory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a figure or resource could not be fully attributed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    SourceUnavailable,
    InvalidInput,
    InsufficientCoverage,
}

/// A number together with how it was obtained
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Figure {
    /// Derived only from live source data
    Measured { value: f64 },
    /// At least one input was a documented default
    Defaulted { value: f64 },
    /// At least one input was missing; no number is reported
    Unavailable { reason: ReasonCode },
}

impl Figure {
    pub fn measured(value: f64) -> Self {
        Figure::Measured { value }
    }

    pub fn defaulted(value: f64) -> Self {
        Figure::Defaulted { value }
    }

    pub fn unavailable(reason: ReasonCode) -> Self {
        Figure::Unavailable { reason }
    }

    /// The number, if one exists
    pub fn value(&self) -> Option<f64> {
        match self {
            Figure::Measured { value } | Figure::Defaulted { value } => Some(*value),
            Figure::Unavailable { .. } => None,
        }
    }

    pub fn is_measured(&self) -> bool {
        matches!(self, Figure::Measured { .. })
    }

    pub fn is_defaulted(&self) -> bool {
        matches!(self, Figure::Defaulted { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Figure::Unavailable { .. })
    }

    /// Reason code when unavailable
    pub fn reason(&self) -> Option<ReasonCode> {
        match self {
            Figure::Unavailable { reason } => Some(*reason),
            _ => None,
        }
    }

    /// Transform the value, keeping provenance
    pub fn map(self, f: impl FnOnce(f64) -> f64) -> Self {
        match self {
            Figure::Measured { value } => Figure::Measured { value: f(value) },
            Figure::Defaulted { value } => Figure::Defaulted { value: f(value) },
            unavailable => unavailable,
        }
    }

    /// Compute a figure from several inputs.
    ///
    /// The first unavailable input makes the result unavailable with that
    /// input's reason; otherwise any defaulted input makes it defaulted.
    pub fn derive(inputs: &[Figure], f: impl FnOnce(&[f64]) -> f64) -> Self {
        let mut values = Vec::with_capacity(inputs.len());
        let mut defaulted = false;

        for input in inputs {
            match input {
                Figure::Measured { value } => values.push(*value),
                Figure::Defaulted { value } => {
                    defaulted = true;
                    values.push(*value);
                }
                Figure::Unavailable { reason } => return Figure::Unavailable { reason: *reason },
            }
        }

        let value = f(&values);
        if defaulted {
            Figure::Defaulted { value }
        } else {
            Figure::Measured { value }
        }
    }

    /// Round the value to `decimals` places
    pub fn rounded(self, decimals: u32) -> Self {
        self.map(|v| crate::calculator::round_to(v, decimals))
    }
}

/// Coarse trust tag for a resource's figures
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// `high` only when both runtime and utilization came from live sources
    pub fn from_coverage(runtime_live: bool, utilization_live: bool) -> Self {
        match (runtime_live, utilization_live) {
            (true, true) => Confidence::High,
            (false, false) => Confidence::Low,
            _ => Confidence::Medium,
        }
    }

    /// One step lower, saturating at `low`
    pub fn downgrade(self) -> Self {
        match self {
            Confidence::High => Confidence::Medium,
            Confidence::Medium | Confidence::Low => Confidence::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

/// Non-fatal remarks attached to an enriched resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Annotation {
    /// A stale cached payload was served because the refresh failed
    StaleData {
        category: SourceCategory,
        fetched_at: DateTime<Utc>,
    },
    /// The source returned no data for the window
    InsufficientCoverage { category: SourceCategory },
    /// A default was used in place of source data
    DefaultApplied { category: SourceCategory, value: f64 },
    /// Cost split from a type-level billing total rather than priced per resource
    EstimatedCost { method: String },
}
