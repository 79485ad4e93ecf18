//! Proportional cost allocation
//!
//! The billing source only reports cost per service (resource type), never
//! per resource. When a resource has no unit price, its share of the type
//! total is estimated here. The result is an estimate and is always tagged
//! as such; it never raises confidence. Only measured runtime is a weight:
//! a resource without audit coverage has no evidence of running and never
//! receives a share.

use crate::models::CostSample;
use serde::{Deserialize, Serialize};

/// How a type-level total was split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStrategy {
    /// Weighted by each resource's measured runtime hours
    RuntimeRatio,
}

/// How a resource's cost figure was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum CostMethod {
    /// Unit price multiplied by runtime
    UnitPrice,
    /// Share of a type-level billed total
    ProportionalAllocation { strategy: AllocationStrategy },
}

impl CostMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostMethod::UnitPrice => "unit_price",
            CostMethod::ProportionalAllocation { .. } => "proportional_allocation",
        }
    }
}

/// One resource's share of a type-level total
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationShare {
    pub resource_id: String,
    pub amount: f64,
    pub strategy: AllocationStrategy,
}

/// Billed total for a resource type (service) from region-level samples
pub fn type_level_cost(samples: &[CostSample], resource_type: &str) -> Option<f64> {
    let matching: Vec<f64> = samples
        .iter()
        .filter(|s| s.service == resource_type)
        .map(|s| s.amount)
        .collect();

    if matching.is_empty() {
        None
    } else {
        Some(matching.iter().sum())
    }
}

/// Split `total` across `members` (resource id, measured runtime hours)
/// by runtime ratio.
///
/// Returns `None` when no member ran, leaving the total unattributed.
/// Otherwise shares sum to `total`.
pub fn allocate_type_cost(total: f64, members: &[(String, f64)]) -> Option<Vec<AllocationShare>> {
    let runtime_sum: f64 = members.iter().map(|(_, hours)| hours.max(0.0)).sum();
    if runtime_sum <= 0.0 {
        return None;
    }

    Some(
        members
            .iter()
            .map(|(id, hours)| AllocationShare {
                resource_id: id.clone(),
                amount: total * hours.max(0.0) / runtime_sum,
                strategy: AllocationStrategy::RuntimeRatio,
            })
            .collect(),
    )
}
