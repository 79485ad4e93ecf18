//! Engine configuration
//!
//! All sections deserialize with defaults so a partial config file (or none
//! at all) yields a working engine.

use crate::error::{EngineError, Result};
use crate::models::SourceCategory;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub attribution: AttributionConfig,
    pub scenario: ScenarioConfig,
}

impl EngineConfig {
    /// Reject settings the engine cannot honour
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.attribution.validate()?;
        self.scenario.validate()
    }
}

/// Per-category cache freshness policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_inventory_ttl")]
    pub inventory_ttl_secs: u64,

    #[serde(default = "default_audit_log_ttl")]
    pub audit_log_ttl_secs: u64,

    #[serde(default = "default_utilization_ttl")]
    pub utilization_ttl_secs: u64,

    /// Carbon intensity moves hourly; keep this in tens of minutes
    #[serde(default = "default_carbon_intensity_ttl")]
    pub carbon_intensity_ttl_secs: u64,

    #[serde(default = "default_reference_ttl")]
    pub power_profile_ttl_secs: u64,

    #[serde(default = "default_reference_ttl")]
    pub pricing_ttl_secs: u64,

    #[serde(default = "default_billing_ttl")]
    pub ledger_ttl_secs: u64,

    #[serde(default = "default_billing_ttl")]
    pub cost_samples_ttl_secs: u64,

    /// Retention bound; oldest entries of a category are evicted first
    #[serde(default = "default_max_entries")]
    pub max_entries_per_category: usize,

    /// Optional JSON file the cache is loaded from and flushed to
    #[serde(default)]
    pub persistence_path: Option<PathBuf>,
}

fn default_inventory_ttl() -> u64 {
    5 * 60
}

fn default_audit_log_ttl() -> u64 {
    5 * 60
}

fn default_utilization_ttl() -> u64 {
    15 * 60
}

fn default_carbon_intensity_ttl() -> u64 {
    30 * 60
}

fn default_reference_ttl() -> u64 {
    7 * 24 * 60 * 60
}

fn default_billing_ttl() -> u64 {
    6 * 60 * 60
}

fn default_max_entries() -> usize {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            inventory_ttl_secs: default_inventory_ttl(),
            audit_log_ttl_secs: default_audit_log_ttl(),
            utilization_ttl_secs: default_utilization_ttl(),
            carbon_intensity_ttl_secs: default_carbon_intensity_ttl(),
            power_profile_ttl_secs: default_reference_ttl(),
            pricing_ttl_secs: default_reference_ttl(),
            ledger_ttl_secs: default_billing_ttl(),
            cost_samples_ttl_secs: default_billing_ttl(),
            max_entries_per_category: default_max_entries(),
            persistence_path: None,
        }
    }
}

impl CacheConfig {
    /// Time-to-live for a category
    pub fn ttl(&self, category: SourceCategory) -> Duration {
        let secs = match category {
            SourceCategory::Inventory => self.inventory_ttl_secs,
            SourceCategory::AuditLog => self.audit_log_ttl_secs,
            SourceCategory::Utilization => self.utilization_ttl_secs,
            SourceCategory::CarbonIntensity => self.carbon_intensity_ttl_secs,
            SourceCategory::PowerProfile => self.power_profile_ttl_secs,
            SourceCategory::Pricing => self.pricing_ttl_secs,
            SourceCategory::Ledger => self.ledger_ttl_secs,
            SourceCategory::CostSamples => self.cost_samples_ttl_secs,
        };
        Duration::from_secs(secs)
    }

    /// Same TTL for every category; handy for tests and dry runs
    pub fn uniform(ttl: Duration) -> Self {
        let secs = ttl.as_secs();
        Self {
            inventory_ttl_secs: secs,
            audit_log_ttl_secs: secs,
            utilization_ttl_secs: secs,
            carbon_intensity_ttl_secs: secs,
            power_profile_ttl_secs: secs,
            pricing_ttl_secs: secs,
            ledger_ttl_secs: secs,
            cost_samples_ttl_secs: secs,
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_entries_per_category == 0 {
            return Err(EngineError::Config(
                "cache.max_entries_per_category must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings for the per-resource attribution pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributionConfig {
    /// Utilization assumed when the source has no sample (percent)
    pub default_utilization_pct: f64,
    /// Maximum resources enriched concurrently
    pub max_concurrency: usize,
    /// Split type-level billed cost across resources whose unit price is missing
    pub proportional_allocation: bool,
}

/// Conservative utilization default: neither idle nor saturated
pub const DEFAULT_UTILIZATION_PCT: f64 = 50.0;

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            default_utilization_pct: DEFAULT_UTILIZATION_PCT,
            max_concurrency: 16,
            proportional_allocation: true,
        }
    }
}

impl AttributionConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.default_utilization_pct) {
            return Err(EngineError::Config(format!(
                "attribution.default_utilization_pct must be within 0-100, got {}",
                self.default_utilization_pct
            )));
        }
        if self.max_concurrency == 0 {
            return Err(EngineError::Config(
                "attribution.max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Savings caps and size thresholds for the scenario calculator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Ceiling for conservative strategies (percent)
    pub conservative_cap_pct: f64,
    /// Ceiling for moderate and aggressive strategies (percent)
    pub elevated_cap_pct: f64,
    /// Fleets with fewer included resources are treated as development
    pub min_resources: usize,
    /// Fleets with a smaller window cost are treated as development
    pub min_total_cost: f64,
    /// Fixed half-width of the reported uncertainty band (percentage points)
    pub uncertainty_half_width_pct: f64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            conservative_cap_pct: 15.0,
            elevated_cap_pct: 25.0,
            min_resources: 5,
            min_total_cost: 10.0,
            uncertainty_half_width_pct: 2.5,
        }
    }
}

impl ScenarioConfig {
    fn validate(&self) -> Result<()> {
        for (name, cap) in [
            ("conservative_cap_pct", self.conservative_cap_pct),
            ("elevated_cap_pct", self.elevated_cap_pct),
        ] {
            if !(0.0..=100.0).contains(&cap) {
                return Err(EngineError::Config(format!(
                    "scenario.{name} must be within 0-100, got {cap}"
                )));
            }
        }
        if self.conservative_cap_pct > self.elevated_cap_pct {
            return Err(EngineError::Config(
                "scenario.conservative_cap_pct cannot exceed scenario.elevated_cap_pct"
                    .to_string(),
            ));
        }
        if self.uncertainty_half_width_pct < 0.0 {
            return Err(EngineError::Config(
                "scenario.uncertainty_half_width_pct cannot be negative".to_string(),
            ));
        }
        Ok(())
    }
}
