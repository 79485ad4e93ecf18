//! Attribution engine for fleet cost and carbon footprint
//!
//! This crate provides the core functionality for:
//! - Cached access to inventory, audit, utilization, carbon, power and pricing sources
//! - Runtime reconstruction from audit events
//! - Power, energy, CO2 and cost calculation with explicit provenance
//! - Per-resource attribution with confidence levels
//! - Savings scenarios bounded by billing-ledger validation
//! - Source health and observability

pub mod allocation;
pub mod calculator;
pub mod config;
pub mod error;
pub mod figure;
pub mod gateway;
pub mod health;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod runtime;
pub mod scenario;
pub mod sources;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use figure::{Annotation, Confidence, Figure, ReasonCode};
pub use gateway::{CachedSourceGateway, Fetched, Freshness};
pub use health::{HealthRegistry, SourceHealth, SourceStatus};
pub use models::*;
pub use observability::{EngineMetrics, StructuredLogger};
pub use orchestrator::{
    AttributionOrchestrator, AttributionOrchestratorBuilder, AttributionReport, EnrichedResource,
    FleetTotals,
};
pub use runtime::{Reconstruction, ReconstructionFlag, RuntimeReconstructor};
pub use scenario::{Scenario, ScenarioCalculator, ValidationBucket, ValidationFactor};
pub use sources::{DataSource, InMemorySource, Snapshot};
