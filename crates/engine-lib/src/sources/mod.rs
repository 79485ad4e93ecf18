//! External data sources
//!
//! The engine reads every category of external data through the single
//! [`DataSource`] trait. Concrete sources (cloud APIs, carbon feeds, billing
//! exports) implement it; [`InMemorySource`] backs tests and snapshot runs.

mod memory;

pub use memory::{InMemorySource, Snapshot, UnitPrice};

use crate::models::{AuditEvent, CarbonSample, CostSample, PowerProfile, Resource};
use anyhow::Result;
use chrono::{DateTime, Utc};

pub use async_trait::async_trait;

/// Collaborator interface the engine requires, one method per category
#[async_trait]
pub trait DataSource: Send + Sync {
    /// List resources deployed in a region
    async fn list_resources(&self, region: &str) -> Result<Vec<Resource>>;

    /// Audit events for one resource within `[from, to]`
    async fn list_audit_events(
        &self,
        resource_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditEvent>>;

    /// Mean utilization percent (0-100), `None` when no sample exists
    async fn get_utilization(
        &self,
        resource_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<f64>>;

    /// Power profile for a resource type
    async fn get_power_profile(&self, resource_type: &str) -> Result<PowerProfile>;

    /// Hourly on-demand price for a resource type in a region
    async fn get_unit_price(&self, resource_type: &str, region: &str) -> Result<f64>;

    /// Hour-aligned carbon intensity samples
    async fn get_carbon_intensity(
        &self,
        region: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CarbonSample>>;

    /// Billed total for the region, used only to validate calculated cost
    async fn get_ledger_total(
        &self,
        region: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<f64>>;

    /// Billed amounts by service; sources without a breakdown return nothing
    async fn list_cost_samples(
        &self,
        _region: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Vec<CostSample>> {
        Ok(Vec::new())
    }
}
