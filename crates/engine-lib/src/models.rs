//! Core data models for the attribution engine

use crate::error::{EngineError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state reported by the infrastructure provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    Running,
    Stopped,
}

/// A compute resource as listed by the infrastructure provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub resource_type: String,
    pub region: String,
    pub state: ResourceState,
    pub created_at: DateTime<Utc>,
}

/// Kind of an audit event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditEventKind {
    Start,
    Stop,
    /// Any event kind the engine does not attribute runtime to
    #[serde(other)]
    Other,
}

/// A start/stop record from the infrastructure audit log
///
/// The timestamp is kept as delivered (RFC 3339) and parsed during
/// runtime reconstruction, which is where malformed values are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub resource_id: String,
    pub kind: AuditEventKind,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

/// A half-open span `[start, end)` during which a resource drew power
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeInterval {
    pub resource_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl RuntimeInterval {
    /// Duration of the interval in hours
    pub fn hours(&self) -> f64 {
        hours_between(self.start, self.end)
    }
}

/// Power draw reference data for a resource type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerProfile {
    pub resource_type: String,
    pub min_watts: f64,
    pub avg_watts: f64,
    pub max_watts: f64,
}

/// Hour-aligned carbon intensity reading for a region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarbonSample {
    pub region: String,
    pub timestamp: DateTime<Utc>,
    pub intensity_g_per_kwh: f64,
}

/// Billed amount at region/service granularity
///
/// The billing source cannot be broken down per resource, so these samples
/// are only used for validation and the proportional allocation estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSample {
    pub region: String,
    pub service: String,
    pub timestamp: DateTime<Utc>,
    pub amount: f64,
}

/// Query window `[from, to]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    /// Create a window, rejecting empty or inverted ranges
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self> {
        if to <= from {
            return Err(EngineError::InvalidInput(format!(
                "window end {} is not after start {}",
                to.to_rfc3339(),
                from.to_rfc3339()
            )));
        }
        Ok(Self { from, to })
    }

    /// Window of `hours` ending at `to`
    pub fn ending_at(to: DateTime<Utc>, hours: i64) -> Result<Self> {
        Self::new(to - Duration::hours(hours), to)
    }

    /// Window length in hours
    pub fn duration_hours(&self) -> f64 {
        hours_between(self.from, self.to)
    }

    /// Clip `[start, end)` to the window; `None` when nothing remains
    pub fn clip(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = start.max(self.from);
        let end = end.min(self.to);
        (end > start).then_some((start, end))
    }

    /// Stable cache key segment
    pub fn cache_key(&self) -> String {
        format!("{}|{}", self.from.to_rfc3339(), self.to.to_rfc3339())
    }
}

/// Category of external data, each with its own freshness policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceCategory {
    Inventory,
    AuditLog,
    Utilization,
    CarbonIntensity,
    PowerProfile,
    Pricing,
    Ledger,
    CostSamples,
}

impl SourceCategory {
    pub const ALL: [SourceCategory; 8] = [
        SourceCategory::Inventory,
        SourceCategory::AuditLog,
        SourceCategory::Utilization,
        SourceCategory::CarbonIntensity,
        SourceCategory::PowerProfile,
        SourceCategory::Pricing,
        SourceCategory::Ledger,
        SourceCategory::CostSamples,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceCategory::Inventory => "inventory",
            SourceCategory::AuditLog => "audit_log",
            SourceCategory::Utilization => "utilization",
            SourceCategory::CarbonIntensity => "carbon_intensity",
            SourceCategory::PowerProfile => "power_profile",
            SourceCategory::Pricing => "pricing",
            SourceCategory::Ledger => "ledger",
            SourceCategory::CostSamples => "cost_samples",
        }
    }
}

impl fmt::Display for SourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) fn hours_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 3_600_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_window_rejects_inverted_range() {
        assert!(TimeWindow::new(at(5), at(5)).is_err());
        assert!(TimeWindow::new(at(6), at(5)).is_err());
        assert!(TimeWindow::new(at(5), at(6)).is_ok());
    }

    #[test]
    fn test_window_clip() {
        let window = TimeWindow::new(at(2), at(10)).unwrap();
        assert_eq!(window.clip(at(0), at(4)), Some((at(2), at(4))));
        assert_eq!(window.clip(at(8), at(12)), Some((at(8), at(10))));
        assert_eq!(window.clip(at(11), at(12)), None);
        assert_eq!(window.clip(at(4), at(4)), None);
        assert_eq!(window.duration_hours(), 8.0);
    }

    #[test]
    fn test_unknown_event_kind_deserializes() {
        let json = r#"{"resource_id":"i-1","kind":"reboot","timestamp":"2024-03-01T00:00:00Z"}"#;
        let event: AuditEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind, AuditEventKind::Other);
        assert!(event.actor.is_none());
    }

    #[test]
    fn test_category_serializes_snake_case() {
        let json = serde_json::to_string(&SourceCategory::CarbonIntensity).unwrap();
        assert_eq!(json, "\"carbon_intensity\"");
        assert_eq!(SourceCategory::AuditLog.to_string(), "audit_log");
    }
}
