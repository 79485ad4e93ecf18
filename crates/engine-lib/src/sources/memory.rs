//! In-memory data source backed by a JSON snapshot

use super::{async_trait, DataSource};
use crate::models::{
    AuditEvent, CarbonSample, CostSample, PowerProfile, Resource, SourceCategory,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Hourly price for a resource type in a region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitPrice {
    pub resource_type: String,
    pub region: String,
    pub hourly_price: f64,
}

/// Point-in-time export of every source category
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub resources: Vec<Resource>,
    pub audit_events: Vec<AuditEvent>,
    /// resource id -> mean utilization percent
    pub utilization: HashMap<String, f64>,
    pub power_profiles: Vec<PowerProfile>,
    pub prices: Vec<UnitPrice>,
    pub carbon_intensity: Vec<CarbonSample>,
    /// region -> billed total for the exported period
    pub ledger_totals: HashMap<String, f64>,
    pub cost_samples: Vec<CostSample>,
}

/// Data source serving a [`Snapshot`] from memory
///
/// Individual categories can be switched into a simulated outage, and every
/// call is counted per category.
#[derive(Debug, Default)]
pub struct InMemorySource {
    snapshot: Snapshot,
    failing: DashSet<SourceCategory>,
    calls: DashMap<SourceCategory, usize>,
}

impl InMemorySource {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            failing: DashSet::new(),
            calls: DashMap::new(),
        }
    }

    /// Load a snapshot exported as JSON
    pub fn from_snapshot_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read snapshot {:?}", path))?;
        let snapshot: Snapshot = serde_json::from_slice(&data)
            .with_context(|| format!("Failed to parse snapshot {:?}", path))?;

        info!(
            path = %path.display(),
            resources = snapshot.resources.len(),
            audit_events = snapshot.audit_events.len(),
            "Loaded data snapshot"
        );
        Ok(Self::new(snapshot))
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Make every call for `category` fail until [`restore_category`](Self::restore_category)
    pub fn fail_category(&self, category: SourceCategory) {
        self.failing.insert(category);
    }

    pub fn restore_category(&self, category: SourceCategory) {
        self.failing.remove(&category);
    }

    /// Number of calls served (or refused) for a category
    pub fn call_count(&self, category: SourceCategory) -> usize {
        self.calls.get(&category).map(|c| *c).unwrap_or(0)
    }

    fn check(&self, category: SourceCategory) -> Result<()> {
        *self.calls.entry(category).or_insert(0) += 1;
        if self.failing.contains(&category) {
            debug!(category = %category, "Simulated source outage");
            anyhow::bail!("{} source unavailable (simulated outage)", category);
        }
        Ok(())
    }
}

#[async_trait]
impl DataSource for InMemorySource {
    async fn list_resources(&self, region: &str) -> Result<Vec<Resource>> {
        self.check(SourceCategory::Inventory)?;
        Ok(self
            .snapshot
            .resources
            .iter()
            .filter(|r| r.region == region)
            .cloned()
            .collect())
    }

    async fn list_audit_events(
        &self,
        resource_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditEvent>> {
        self.check(SourceCategory::AuditLog)?;
        Ok(self
            .snapshot
            .audit_events
            .iter()
            .filter(|e| e.resource_id == resource_id)
            .filter(|e| match DateTime::parse_from_rfc3339(&e.timestamp) {
                Ok(ts) => {
                    let ts = ts.with_timezone(&Utc);
                    ts >= from && ts <= to
                }
                // Unparseable records are passed through so the
                // reconstructor can reject them explicitly.
                Err(_) => true,
            })
            .cloned()
            .collect())
    }

    async fn get_utilization(
        &self,
        resource_id: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Option<f64>> {
        self.check(SourceCategory::Utilization)?;
        Ok(self.snapshot.utilization.get(resource_id).copied())
    }

    async fn get_power_profile(&self, resource_type: &str) -> Result<PowerProfile> {
        self.check(SourceCategory::PowerProfile)?;
        self.snapshot
            .power_profiles
            .iter()
            .find(|p| p.resource_type == resource_type)
            .cloned()
            .with_context(|| format!("No power profile for resource type {}", resource_type))
    }

    async fn get_unit_price(&self, resource_type: &str, region: &str) -> Result<f64> {
        self.check(SourceCategory::Pricing)?;
        self.snapshot
            .prices
            .iter()
            .find(|p| p.resource_type == resource_type && p.region == region)
            .map(|p| p.hourly_price)
            .with_context(|| format!("No unit price for {} in {}", resource_type, region))
    }

    async fn get_carbon_intensity(
        &self,
        region: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CarbonSample>> {
        self.check(SourceCategory::CarbonIntensity)?;
        let mut samples: Vec<CarbonSample> = self
            .snapshot
            .carbon_intensity
            .iter()
            .filter(|s| s.region == region)
            .filter(|s| s.timestamp < to && s.timestamp + Duration::hours(1) > from)
            .cloned()
            .collect();
        samples.sort_by_key(|s| s.timestamp);
        Ok(samples)
    }

    async fn get_ledger_total(
        &self,
        region: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Option<f64>> {
        self.check(SourceCategory::Ledger)?;
        Ok(self.snapshot.ledger_totals.get(region).copied())
    }

    async fn list_cost_samples(
        &self,
        region: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CostSample>> {
        self.check(SourceCategory::CostSamples)?;
        Ok(self
            .snapshot
            .cost_samples
            .iter()
            .filter(|s| s.region == region && s.timestamp >= from && s.timestamp < to)
            .cloned()
            .collect())
    }
}
