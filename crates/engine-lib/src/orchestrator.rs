//! Attribution orchestrator
//!
//! One run enumerates a region's resources and enriches each independently
//! on its own task: carbon intensity, reconstructed runtime, utilization,
//! power profile and unit price are fetched through the gateway and turned
//! into figures with provenance. A failure for one resource is recorded on
//! that resource; only a failed inventory listing aborts the run.
//!
//! Aggregation (proportional allocation, totals, validation, scenarios and
//! rounding) happens after every resource task has finished. If the caller
//! drops the run, in-flight fetches still complete and populate the cache
//! but nothing is aggregated.

use crate::allocation::{allocate_type_cost, type_level_cost, CostMethod};
use crate::calculator::{
    self, round_currency, round_to, runtime_weighted_intensity, Footprint, FootprintInputs,
    PowerCarbonCalculator,
};
use crate::config::{AttributionConfig, EngineConfig};
use crate::error::{EngineError, Result};
use crate::figure::{Annotation, Confidence, Figure, ReasonCode};
use crate::gateway::{CachedSourceGateway, Fetched};
use crate::health::{HealthRegistry, SourceHealth, SourceStatus};
use crate::models::{Resource, RuntimeInterval, SourceCategory, TimeWindow};
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::runtime::{Reconstruction, ReconstructionFlag, RuntimeReconstructor};
use crate::scenario::{Scenario, ScenarioCalculator, ScenarioInput, ValidationFactor};
use crate::sources::DataSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::debug;

/// A source or input problem recorded against one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceFailure {
    pub reason: ReasonCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<SourceCategory>,
    pub message: String,
}

impl ResourceFailure {
    fn from_error(error: &EngineError) -> Self {
        Self {
            reason: error.reason_code(),
            category: error.category(),
            message: error.to_string(),
        }
    }
}

/// A resource with its runtime, utilization and computed figures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedResource {
    pub resource: Resource,
    pub intervals: Vec<RuntimeInterval>,
    pub runtime_hours: Figure,
    pub utilization_pct: Figure,
    pub carbon_intensity_g_per_kwh: Figure,
    pub effective_power_w: Figure,
    pub energy_kwh: Figure,
    pub co2_kg: Figure,
    pub cost: Figure,
    pub cost_method: CostMethod,
    pub confidence: Confidence,
    pub flags: BTreeSet<ReconstructionFlag>,
    pub annotations: Vec<Annotation>,
    pub failures: Vec<ResourceFailure>,
    /// Runtime could not be established; every figure is unavailable
    pub excluded: bool,
}

impl EnrichedResource {
    /// First failure reason, if the resource was excluded
    pub fn exclusion_reason(&self) -> Option<ReasonCode> {
        if !self.excluded {
            return None;
        }
        self.runtime_hours
            .reason()
            .or_else(|| self.failures.first().map(|f| f.reason))
    }

    fn rounded(mut self) -> Self {
        self.runtime_hours = self.runtime_hours.rounded(3);
        self.utilization_pct = self.utilization_pct.rounded(3);
        self.carbon_intensity_g_per_kwh = self.carbon_intensity_g_per_kwh.rounded(3);
        self.effective_power_w = self.effective_power_w.rounded(3);
        self.energy_kwh = self.energy_kwh.rounded(3);
        self.co2_kg = self.co2_kg.rounded(3);
        self.cost = self.cost.rounded(2);
        self
    }
}

/// Sum of one figure across the fleet, skipping unavailable values
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FigureTotal {
    pub total: f64,
    /// Resources whose figure was summed
    pub included: usize,
    /// Of those, how many were defaulted rather than measured
    pub defaulted: usize,
    /// Resources whose figure was unavailable
    pub skipped: usize,
}

impl FigureTotal {
    fn add(&mut self, figure: &Figure) {
        match figure.value() {
            Some(value) => {
                self.total += value;
                self.included += 1;
                if figure.is_defaulted() {
                    self.defaulted += 1;
                }
            }
            None => self.skipped += 1,
        }
    }

    fn rounded(mut self, decimals: u32) -> Self {
        self.total = round_to(self.total, decimals);
        self
    }
}

/// Fleet-wide totals, computed by summation over resources
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetTotals {
    pub resources_total: usize,
    pub resources_excluded: usize,
    pub runtime_hours: FigureTotal,
    pub energy_kwh: FigureTotal,
    pub co2_kg: FigureTotal,
    pub cost: FigureTotal,
}

impl FleetTotals {
    pub fn from_resources(resources: &[EnrichedResource]) -> Self {
        let mut totals = FleetTotals {
            resources_total: resources.len(),
            ..Default::default()
        };
        for r in resources {
            if r.excluded {
                totals.resources_excluded += 1;
            }
            totals.runtime_hours.add(&r.runtime_hours);
            totals.energy_kwh.add(&r.energy_kwh);
            totals.co2_kg.add(&r.co2_kg);
            totals.cost.add(&r.cost);
        }
        totals
    }

    fn rounded(self) -> Self {
        Self {
            runtime_hours: self.runtime_hours.rounded(3),
            energy_kwh: self.energy_kwh.rounded(3),
            co2_kg: self.co2_kg.rounded(3),
            cost: self.cost.rounded(2),
            ..self
        }
    }
}

/// How much of the fleet was attributed from live data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageSummary {
    pub high_confidence: usize,
    pub medium_confidence: usize,
    pub low_confidence: usize,
    pub excluded: usize,
    pub no_audit_coverage: usize,
    pub defaulted_utilization: usize,
    pub estimated_cost: usize,
    pub stale_categories: Vec<SourceCategory>,
    pub unavailable_categories: Vec<SourceCategory>,
    /// Categories that answered but had no data for some resources
    #[serde(default)]
    pub coverage_gap_categories: Vec<SourceCategory>,
}

impl CoverageSummary {
    fn build(
        resources: &[EnrichedResource],
        health: &BTreeMap<SourceCategory, SourceHealth>,
    ) -> Self {
        let mut summary = CoverageSummary::default();
        for r in resources {
            if r.excluded {
                summary.excluded += 1;
            }
            match r.confidence {
                Confidence::High => summary.high_confidence += 1,
                Confidence::Medium => summary.medium_confidence += 1,
                Confidence::Low => summary.low_confidence += 1,
            }
            if r.flags.contains(&ReconstructionFlag::NoAuditCoverage) {
                summary.no_audit_coverage += 1;
            }
            if r.utilization_pct.is_defaulted() {
                summary.defaulted_utilization += 1;
            }
            if matches!(r.cost_method, CostMethod::ProportionalAllocation { .. }) {
                summary.estimated_cost += 1;
            }
        }
        for (category, h) in health {
            if h.stale > 0 {
                summary.stale_categories.push(*category);
            }
            if h.unavailable > 0 {
                summary.unavailable_categories.push(*category);
            }
            if h.insufficient_coverage > 0 {
                summary.coverage_gap_categories.push(*category);
            }
        }
        summary
    }

    /// True when any resource or source fell short of full live coverage
    pub fn is_partial(&self) -> bool {
        self.excluded > 0
            || self.no_audit_coverage > 0
            || self.defaulted_utilization > 0
            || !self.stale_categories.is_empty()
            || !self.unavailable_categories.is_empty()
            || !self.coverage_gap_categories.is_empty()
    }
}

/// Result of one attribution run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionReport {
    pub region: String,
    pub window: TimeWindow,
    pub generated_at: DateTime<Utc>,
    pub resources: Vec<EnrichedResource>,
    pub totals: FleetTotals,
    pub validation: ValidationFactor,
    pub scenarios: Vec<Scenario>,
    pub source_health: BTreeMap<SourceCategory, SourceHealth>,
    pub coverage: CoverageSummary,
}

impl AttributionReport {
    pub fn resource(&self, id: &str) -> Option<&EnrichedResource> {
        self.resources.iter().find(|r| r.resource.id == id)
    }

    /// Worst source status seen during the run
    pub fn overall_health(&self) -> SourceStatus {
        crate::health::compute_status(&self.source_health)
    }
}

/// Shared state for the per-resource tasks of one run
struct RunContext {
    gateway: Arc<CachedSourceGateway>,
    health: HealthRegistry,
    window: TimeWindow,
    now: DateTime<Utc>,
    default_utilization_pct: f64,
    reconstructor: RuntimeReconstructor,
    calculator: PowerCarbonCalculator,
}

/// Per-resource outcome before fleet-level post-processing
struct Enrichment {
    record: EnrichedResource,
    /// Cost is unavailable because the unit price could not be fetched
    price_missing: bool,
}

/// Combines gateway, reconstructor, calculator and scenarios into runs
pub struct AttributionOrchestrator {
    gateway: Arc<CachedSourceGateway>,
    config: AttributionConfig,
    scenarios: ScenarioCalculator,
    metrics: EngineMetrics,
    logger: StructuredLogger,
}

impl AttributionOrchestrator {
    pub fn builder() -> AttributionOrchestratorBuilder {
        AttributionOrchestratorBuilder::new()
    }

    pub fn gateway(&self) -> &Arc<CachedSourceGateway> {
        &self.gateway
    }

    /// Attribute every resource in `region` over `window`
    pub async fn run(&self, region: &str, window: TimeWindow) -> Result<AttributionReport> {
        self.run_at(region, window, Utc::now()).await
    }

    /// Attribute as of `now`, which bounds intervals still open at the end
    pub async fn run_at(
        &self,
        region: &str,
        window: TimeWindow,
        now: DateTime<Utc>,
    ) -> Result<AttributionReport> {
        let started = Instant::now();
        let health = HealthRegistry::new();

        let inventory = self.gateway.resources(region).await;
        health.record(SourceCategory::Inventory, &inventory).await;
        let resources = inventory?.value;

        self.metrics.set_fleet_resources(resources.len() as i64);
        self.logger.log_run_started(
            region,
            &window.from.to_rfc3339(),
            &window.to.to_rfc3339(),
            resources.len(),
        );

        let ctx = Arc::new(RunContext {
            gateway: Arc::clone(&self.gateway),
            health: health.clone(),
            window,
            now,
            default_utilization_pct: self.config.default_utilization_pct,
            reconstructor: RuntimeReconstructor::new(),
            calculator: PowerCarbonCalculator::new(),
        });

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut handles = Vec::with_capacity(resources.len());
        for resource in &resources {
            let ctx = Arc::clone(&ctx);
            let semaphore = Arc::clone(&semaphore);
            let resource = resource.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                enrich(&ctx, resource).await
            }));
        }

        let mut enrichments = Vec::with_capacity(handles.len());
        for (resource, handle) in resources.into_iter().zip(handles) {
            match handle.await {
                Ok(enrichment) => enrichments.push(enrichment),
                Err(e) => enrichments.push(failed_enrichment(
                    resource,
                    ReasonCode::SourceUnavailable,
                    format!("enrichment task failed: {}", e),
                )),
            }
        }

        if self.config.proportional_allocation {
            self.allocate_missing_costs(region, &window, &health, &mut enrichments)
                .await;
        }

        let mut records: Vec<EnrichedResource> =
            enrichments.into_iter().map(|e| e.record).collect();
        records.sort_by(|a, b| a.resource.id.cmp(&b.resource.id));

        for record in &records {
            if record.excluded {
                let reason = record
                    .exclusion_reason()
                    .unwrap_or(ReasonCode::SourceUnavailable);
                let details = record
                    .failures
                    .first()
                    .map(|f| f.message.as_str())
                    .unwrap_or("runtime unavailable");
                self.metrics.inc_resources_skipped(reason);
                self.logger
                    .log_resource_skipped(&record.resource.id, reason, details);
            } else {
                self.metrics.inc_resources_enriched();
                self.logger.log_resource_enriched(
                    &record.resource.id,
                    record.confidence,
                    record.runtime_hours.value(),
                    record.cost.value(),
                    record.co2_kg.value(),
                );
            }
        }

        // Totals and validation use unrounded figures
        let totals = FleetTotals::from_resources(&records);

        let ledger = self.gateway.ledger_total(region, &window).await;
        health.record(SourceCategory::Ledger, &ledger).await;
        let ledger_total = ledger.ok().and_then(|fetched| fetched.value);

        // Allocated costs are derived from billing itself and cannot validate it
        let (priced_total, estimated) = records.iter().fold((0.0, 0), |(sum, n), r| {
            match (r.cost_method, r.cost.value()) {
                (CostMethod::UnitPrice, Some(cost)) => (sum + cost, n),
                (CostMethod::ProportionalAllocation { .. }, _) => (sum, n + 1),
                _ => (sum, n),
            }
        });
        let validation =
            ValidationFactor::compute(ledger_total, priced_total).excluding_estimates(estimated);

        let scenarios = self.scenarios.calculate(&ScenarioInput {
            total_cost: totals.cost.total,
            total_co2_kg: totals.co2_kg.total,
            resources_included: totals.resources_total - totals.resources_excluded,
            validation,
        });

        let source_health = health.snapshot().await;
        let coverage = CoverageSummary::build(&records, &source_health);

        self.logger.log_run_completed(
            region,
            totals.resources_total - totals.resources_excluded,
            totals.resources_excluded,
            totals.cost.total,
            totals.co2_kg.total,
            validation.bucket.as_str(),
            started.elapsed().as_millis(),
        );
        self.metrics
            .observe_run_latency(started.elapsed().as_secs_f64());

        Ok(AttributionReport {
            region: region.to_string(),
            window,
            generated_at: now,
            resources: records.into_iter().map(EnrichedResource::rounded).collect(),
            totals: totals.rounded(),
            validation: ValidationFactor {
                calculated_total: round_currency(validation.calculated_total),
                factor: validation.factor.map(|f| round_to(f, 3)),
                ..validation
            },
            scenarios: scenarios.into_iter().map(Scenario::rounded).collect(),
            source_health,
            coverage,
        })
    }

    /// Reconstruct one resource's runtime through the gateway
    pub async fn reconstruct_runtime(
        &self,
        resource: &Resource,
        window: &TimeWindow,
        now: DateTime<Utc>,
    ) -> Result<Reconstruction> {
        let events = self.gateway.audit_events(&resource.id, window).await?;
        RuntimeReconstructor::new().reconstruct(resource, &events.value, window, now)
    }

    /// Estimate cost for resources whose unit price was unavailable by
    /// splitting the billed type-level total across same-type resources
    async fn allocate_missing_costs(
        &self,
        region: &str,
        window: &TimeWindow,
        health: &HealthRegistry,
        enrichments: &mut [Enrichment],
    ) {
        if !enrichments.iter().any(|e| e.price_missing) {
            return;
        }

        let samples = self.gateway.cost_samples(region, window).await;
        health.record(SourceCategory::CostSamples, &samples).await;
        let samples = match samples {
            Ok(fetched) => fetched.value,
            Err(_) => return,
        };

        let mut by_type: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, e) in enrichments.iter().enumerate() {
            if !e.record.excluded {
                by_type
                    .entry(e.record.resource.resource_type.clone())
                    .or_default()
                    .push(idx);
            }
        }

        for (resource_type, members) in by_type {
            if !members.iter().any(|&idx| enrichments[idx].price_missing) {
                continue;
            }
            let Some(type_total) = type_level_cost(&samples, &resource_type) else {
                continue;
            };

            // Resources without audit coverage carry no runtime evidence
            let measured: Vec<usize> = members
                .into_iter()
                .filter(|&idx| enrichments[idx].record.runtime_hours.is_measured())
                .collect();
            let weights: Vec<(String, f64)> = measured
                .iter()
                .map(|&idx| {
                    let record = &enrichments[idx].record;
                    (
                        record.resource.id.clone(),
                        record.runtime_hours.value().unwrap_or(0.0),
                    )
                })
                .collect();

            let Some(shares) = allocate_type_cost(type_total, &weights) else {
                debug!(
                    resource_type = %resource_type,
                    "No measured runtime for resource type, type-level cost left unattributed"
                );
                continue;
            };

            for (share, &idx) in shares.into_iter().zip(measured.iter()) {
                let enrichment = &mut enrichments[idx];
                if !enrichment.price_missing {
                    continue;
                }
                let record = &mut enrichment.record;
                let method = CostMethod::ProportionalAllocation {
                    strategy: share.strategy,
                };
                record.cost = Figure::defaulted(share.amount);
                record.cost_method = method;
                record.confidence = record.confidence.downgrade();
                record.annotations.push(Annotation::EstimatedCost {
                    method: method.as_str().to_string(),
                });
            }
        }
    }
}

/// Run the per-resource pipeline
async fn enrich(ctx: &RunContext, resource: Resource) -> Enrichment {
    let mut annotations = Vec::new();
    let mut failures = Vec::new();

    // Carbon intensity for the resource's region
    let carbon = ctx
        .gateway
        .carbon_intensity(&resource.region, &ctx.window)
        .await;
    let carbon_samples = match carbon {
        Ok(fetched) if fetched.value.is_empty() => {
            ctx.health
                .set_insufficient_coverage(
                    SourceCategory::CarbonIntensity,
                    format!("no samples for {}", resource.region),
                )
                .await;
            annotations.push(Annotation::InsufficientCoverage {
                category: SourceCategory::CarbonIntensity,
            });
            None
        }
        Ok(fetched) => {
            note_freshness(ctx, SourceCategory::CarbonIntensity, &fetched, &mut annotations).await;
            Some(fetched.value)
        }
        Err(e) => {
            ctx.health
                .set_unavailable(SourceCategory::CarbonIntensity, e.to_string())
                .await;
            failures.push(ResourceFailure::from_error(&e));
            None
        }
    };

    // Runtime from the audit log
    let mut flags = BTreeSet::new();
    let mut intervals = Vec::new();
    let mut runtime_live = false;
    let runtime_hours = match ctx.gateway.audit_events(&resource.id, &ctx.window).await {
        Ok(fetched) => {
            match ctx
                .reconstructor
                .reconstruct(&resource, &fetched.value, &ctx.window, ctx.now)
            {
                Ok(reconstruction) if reconstruction.has_audit_coverage => {
                    note_freshness(ctx, SourceCategory::AuditLog, &fetched, &mut annotations)
                        .await;
                    flags = reconstruction.flags;
                    intervals = reconstruction.intervals;
                    runtime_live = true;
                    Figure::measured(reconstruction.total_hours)
                }
                Ok(reconstruction) => {
                    ctx.health
                        .set_insufficient_coverage(
                            SourceCategory::AuditLog,
                            format!("no audit events for {}", resource.id),
                        )
                        .await;
                    flags = reconstruction.flags;
                    annotations.push(Annotation::InsufficientCoverage {
                        category: SourceCategory::AuditLog,
                    });
                    // Unknown runtime, never assumed uptime
                    Figure::defaulted(0.0)
                }
                Err(e) => {
                    ctx.health
                        .set_unavailable(SourceCategory::AuditLog, e.to_string())
                        .await;
                    failures.push(ResourceFailure {
                        reason: e.reason_code(),
                        category: Some(SourceCategory::AuditLog),
                        message: e.to_string(),
                    });
                    Figure::unavailable(e.reason_code())
                }
            }
        }
        Err(e) => {
            ctx.health
                .set_unavailable(SourceCategory::AuditLog, e.to_string())
                .await;
            failures.push(ResourceFailure::from_error(&e));
            Figure::unavailable(e.reason_code())
        }
    };

    if runtime_hours.is_unavailable() {
        let reason = runtime_hours
            .reason()
            .unwrap_or(ReasonCode::SourceUnavailable);
        let mut enrichment = failed_enrichment(resource, reason, String::new());
        enrichment.record.failures = failures;
        enrichment.record.annotations = annotations;
        return enrichment;
    }

    // Utilization, defaulted only when the source has nothing
    let mut utilization_pct = match ctx.gateway.utilization(&resource.id, &ctx.window).await {
        Ok(Fetched {
            value: Some(pct),
            freshness,
        }) => {
            let fetched = Fetched {
                value: pct,
                freshness,
            };
            note_freshness(ctx, SourceCategory::Utilization, &fetched, &mut annotations).await;
            Figure::measured(pct)
        }
        Ok(_) => {
            ctx.health
                .set_insufficient_coverage(
                    SourceCategory::Utilization,
                    format!("no utilization sample for {}", resource.id),
                )
                .await;
            annotations.push(Annotation::InsufficientCoverage {
                category: SourceCategory::Utilization,
            });
            default_utilization(ctx, &mut annotations)
        }
        Err(e) => {
            ctx.health
                .set_unavailable(SourceCategory::Utilization, e.to_string())
                .await;
            failures.push(ResourceFailure::from_error(&e));
            default_utilization(ctx, &mut annotations)
        }
    };

    let profile = match ctx.gateway.power_profile(&resource.resource_type).await {
        Ok(fetched) => {
            note_freshness(ctx, SourceCategory::PowerProfile, &fetched, &mut annotations).await;
            Some(fetched.value)
        }
        Err(e) => {
            ctx.health
                .set_unavailable(SourceCategory::PowerProfile, e.to_string())
                .await;
            failures.push(ResourceFailure::from_error(&e));
            None
        }
    };

    let mut price_missing = false;
    let hourly_price = match ctx
        .gateway
        .unit_price(&resource.resource_type, &resource.region)
        .await
    {
        Ok(fetched) if !fetched.value.is_finite() || fetched.value < 0.0 => {
            let e = EngineError::InvalidInput(format!(
                "unit price {} for {} is invalid",
                fetched.value, resource.resource_type
            ));
            ctx.health
                .set_unavailable(SourceCategory::Pricing, e.to_string())
                .await;
            failures.push(ResourceFailure {
                reason: e.reason_code(),
                category: Some(SourceCategory::Pricing),
                message: e.to_string(),
            });
            Figure::unavailable(ReasonCode::InvalidInput)
        }
        Ok(fetched) => {
            note_freshness(ctx, SourceCategory::Pricing, &fetched, &mut annotations).await;
            Figure::measured(fetched.value)
        }
        Err(e) => {
            ctx.health
                .set_unavailable(SourceCategory::Pricing, e.to_string())
                .await;
            failures.push(ResourceFailure::from_error(&e));
            price_missing = true;
            Figure::unavailable(e.reason_code())
        }
    };

    let carbon_intensity_g_per_kwh = match &carbon_samples {
        Some(samples) => match runtime_weighted_intensity(samples, &intervals) {
            Some(intensity) => Figure::measured(intensity),
            None => Figure::unavailable(ReasonCode::InsufficientCoverage),
        },
        None if failures
            .iter()
            .any(|f| f.category == Some(SourceCategory::CarbonIntensity)) =>
        {
            Figure::unavailable(ReasonCode::SourceUnavailable)
        }
        None => Figure::unavailable(ReasonCode::InsufficientCoverage),
    };

    let inputs = FootprintInputs {
        runtime_hours,
        utilization_pct,
        carbon_intensity_g_per_kwh,
        hourly_price,
    };

    let footprint = match ctx.calculator.compute(profile.as_ref(), &inputs) {
        Ok(footprint) => footprint,
        Err(e) => {
            // Out-of-range utilization or power draw: only the power-derived
            // figures are lost, cost still stands
            failures.push(ResourceFailure {
                reason: e.reason_code(),
                category: Some(SourceCategory::Utilization),
                message: e.to_string(),
            });
            let invalid = Figure::unavailable(e.reason_code());
            utilization_pct = invalid;
            Footprint {
                effective_power_w: invalid,
                energy_kwh: invalid,
                co2_kg: invalid,
                cost: Figure::derive(&[hourly_price, runtime_hours], |v| {
                    calculator::cost(v[0], v[1])
                }),
            }
        }
    };

    let confidence = Confidence::from_coverage(runtime_live, utilization_pct.is_measured());

    Enrichment {
        record: EnrichedResource {
            resource,
            intervals,
            runtime_hours,
            utilization_pct,
            carbon_intensity_g_per_kwh,
            effective_power_w: footprint.effective_power_w,
            energy_kwh: footprint.energy_kwh,
            co2_kg: footprint.co2_kg,
            cost: footprint.cost,
            cost_method: CostMethod::UnitPrice,
            confidence,
            flags,
            annotations,
            failures,
            excluded: false,
        },
        price_missing,
    }
}

fn default_utilization(ctx: &RunContext, annotations: &mut Vec<Annotation>) -> Figure {
    annotations.push(Annotation::DefaultApplied {
        category: SourceCategory::Utilization,
        value: ctx.default_utilization_pct,
    });
    Figure::defaulted(ctx.default_utilization_pct)
}

/// Record a successful fetch in the health map, annotating stale payloads
async fn note_freshness<T>(
    ctx: &RunContext,
    category: SourceCategory,
    fetched: &Fetched<T>,
    annotations: &mut Vec<Annotation>,
) {
    match fetched.stale_since() {
        Some(fetched_at) => {
            ctx.health
                .set_stale(
                    category,
                    format!("serving payload fetched at {}", fetched_at.to_rfc3339()),
                )
                .await;
            annotations.push(Annotation::StaleData {
                category,
                fetched_at,
            });
        }
        None => ctx.health.set_available(category).await,
    }
}

/// Record for a resource whose runtime could not be established
fn failed_enrichment(resource: Resource, reason: ReasonCode, message: String) -> Enrichment {
    let unavailable = Figure::unavailable(reason);
    let failures = if message.is_empty() {
        Vec::new()
    } else {
        vec![ResourceFailure {
            reason,
            category: None,
            message,
        }]
    };

    Enrichment {
        record: EnrichedResource {
            resource,
            intervals: Vec::new(),
            runtime_hours: unavailable,
            utilization_pct: unavailable,
            carbon_intensity_g_per_kwh: unavailable,
            effective_power_w: unavailable,
            energy_kwh: unavailable,
            co2_kg: unavailable,
            cost: unavailable,
            cost_method: CostMethod::UnitPrice,
            confidence: Confidence::Low,
            flags: BTreeSet::new(),
            annotations: Vec::new(),
            failures,
            excluded: true,
        },
        price_missing: false,
    }
}

/// Builder for [`AttributionOrchestrator`]
pub struct AttributionOrchestratorBuilder {
    source: Option<Arc<dyn DataSource>>,
    gateway: Option<Arc<CachedSourceGateway>>,
    config: EngineConfig,
}

impl AttributionOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            gateway: None,
            config: EngineConfig::default(),
        }
    }

    /// Data source; a gateway is created over it using the cache config
    pub fn source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Use an existing gateway (and its cache) instead of creating one
    pub fn gateway(mut self, gateway: Arc<CachedSourceGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.config.attribution.max_concurrency = max;
        self
    }

    pub fn default_utilization(mut self, pct: f64) -> Self {
        self.config.attribution.default_utilization_pct = pct;
        self
    }

    pub fn proportional_allocation(mut self, enabled: bool) -> Self {
        self.config.attribution.proportional_allocation = enabled;
        self
    }

    pub fn build(self) -> Result<AttributionOrchestrator> {
        self.config.validate()?;

        let gateway = match (self.gateway, self.source) {
            (Some(gateway), _) => gateway,
            (None, Some(source)) => Arc::new(CachedSourceGateway::new(
                source,
                self.config.cache.clone(),
            )?),
            (None, None) => {
                return Err(EngineError::Config(
                    "a data source or gateway is required".to_string(),
                ))
            }
        };

        Ok(AttributionOrchestrator {
            gateway,
            config: self.config.attribution,
            scenarios: ScenarioCalculator::new(self.config.scenario),
            metrics: EngineMetrics::new(),
            logger: StructuredLogger::new("orchestrator"),
        })
    }
}

impl Default for AttributionOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuditEvent, AuditEventKind, CarbonSample, PowerProfile, ResourceState};
    use crate::sources::{InMemorySource, Snapshot, UnitPrice};
    use chrono::{Duration, TimeZone};

    fn at(hour: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::hours(hour)
    }

    fn resource(id: &str, resource_type: &str) -> Resource {
        Resource {
            id: id.to_string(),
            resource_type: resource_type.to_string(),
            region: "eu-west-1".to_string(),
            state: ResourceState::Running,
            created_at: at(-100),
        }
    }

    fn event(id: &str, kind: AuditEventKind, hour: i64) -> AuditEvent {
        AuditEvent {
            resource_id: id.to_string(),
            kind,
            timestamp: at(hour).to_rfc3339(),
            actor: None,
        }
    }

    fn snapshot() -> Snapshot {
        Snapshot {
            resources: vec![resource("i-a", "m5.large"), resource("i-b", "m5.large")],
            audit_events: vec![
                event("i-a", AuditEventKind::Start, 0),
                event("i-a", AuditEventKind::Stop, 10),
                event("i-b", AuditEventKind::Start, 4),
                event("i-b", AuditEventKind::Stop, 8),
            ],
            utilization: [("i-a".to_string(), 100.0)].into_iter().collect(),
            power_profiles: vec![PowerProfile {
                resource_type: "m5.large".to_string(),
                min_watts: 50.0,
                avg_watts: 100.0,
                max_watts: 150.0,
            }],
            prices: vec![UnitPrice {
                resource_type: "m5.large".to_string(),
                region: "eu-west-1".to_string(),
                hourly_price: 0.5,
            }],
            carbon_intensity: (0..24)
                .map(|h| CarbonSample {
                    region: "eu-west-1".to_string(),
                    timestamp: at(h),
                    intensity_g_per_kwh: 400.0,
                })
                .collect(),
            ..Default::default()
        }
    }

    fn day() -> TimeWindow {
        TimeWindow::new(at(0), at(24)).unwrap()
    }

    fn orchestrator(source: Arc<InMemorySource>) -> AttributionOrchestrator {
        AttributionOrchestrator::builder()
            .source(source)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_source() {
        let result = AttributionOrchestratorBuilder::new().build();
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let source = Arc::new(InMemorySource::new(Snapshot::default()));
        let result = AttributionOrchestrator::builder()
            .source(source)
            .default_utilization(120.0)
            .build();
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn test_confidence_tracks_live_inputs() {
        let source = Arc::new(InMemorySource::new(snapshot()));
        let report = orchestrator(source).run_at("eu-west-1", day(), at(48)).await.unwrap();

        let a = report.resource("i-a").unwrap();
        assert_eq!(a.confidence, Confidence::High);
        assert_eq!(a.runtime_hours, Figure::measured(10.0));
        assert_eq!(a.cost, Figure::measured(5.0));
        // 100 W * 10 h = 1 kWh at 400 g/kWh
        assert_eq!(a.co2_kg, Figure::measured(0.4));

        let b = report.resource("i-b").unwrap();
        assert_eq!(b.confidence, Confidence::Medium);
        assert_eq!(b.utilization_pct, Figure::defaulted(50.0));
        assert!(b.co2_kg.is_defaulted());
        assert!(b
            .annotations
            .iter()
            .any(|a| matches!(a, Annotation::DefaultApplied { .. })));
    }

    #[tokio::test]
    async fn test_totals_are_sums_of_resources() {
        let source = Arc::new(InMemorySource::new(snapshot()));
        let report = orchestrator(source).run_at("eu-west-1", day(), at(48)).await.unwrap();

        let sum: f64 = report.resources.iter().filter_map(|r| r.cost.value()).sum();
        assert!((report.totals.cost.total - sum).abs() < 1e-9);
        assert_eq!(report.totals.cost.total, 7.0);
        assert_eq!(report.totals.cost.included, 2);
        assert_eq!(report.totals.cost.skipped, 0);
    }

    #[tokio::test]
    async fn test_inventory_failure_aborts_run() {
        let source = Arc::new(InMemorySource::new(snapshot()));
        source.fail_category(SourceCategory::Inventory);

        let err = orchestrator(source)
            .run_at("eu-west-1", day(), at(48))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_audit_outage_isolated_per_resource() {
        let source = Arc::new(InMemorySource::new(snapshot()));
        source.fail_category(SourceCategory::AuditLog);

        let report = orchestrator(source).run_at("eu-west-1", day(), at(48)).await.unwrap();

        assert_eq!(report.resources.len(), 2);
        for r in &report.resources {
            assert!(r.excluded);
            assert_eq!(r.cost, Figure::unavailable(ReasonCode::SourceUnavailable));
            assert_eq!(r.exclusion_reason(), Some(ReasonCode::SourceUnavailable));
        }
        assert_eq!(report.totals.cost.skipped, 2);
        assert_eq!(
            report.source_health[&SourceCategory::AuditLog].status,
            SourceStatus::Unavailable
        );
    }

    #[tokio::test]
    async fn test_missing_price_falls_back_to_allocation() {
        let mut snap = snapshot();
        snap.prices.clear();
        snap.cost_samples = vec![crate::models::CostSample {
            region: "eu-west-1".to_string(),
            service: "m5.large".to_string(),
            timestamp: at(1),
            amount: 28.0,
        }];
        let source = Arc::new(InMemorySource::new(snap));

        let report = orchestrator(source).run_at("eu-west-1", day(), at(48)).await.unwrap();

        // 10h and 4h of runtime split 28.00 as 20.00 / 8.00
        let a = report.resource("i-a").unwrap();
        assert_eq!(a.cost, Figure::defaulted(20.0));
        assert_eq!(a.confidence, Confidence::Medium);
        assert!(matches!(a.cost_method, CostMethod::ProportionalAllocation { .. }));

        let b = report.resource("i-b").unwrap();
        assert_eq!(b.cost, Figure::defaulted(8.0));
        assert_eq!(b.confidence, Confidence::Low);
        assert_eq!(report.coverage.estimated_cost, 2);
    }

    #[tokio::test]
    async fn test_silent_resources_receive_no_allocated_cost() {
        let mut snap = snapshot();
        snap.audit_events.clear();
        snap.prices.clear();
        snap.cost_samples = vec![crate::models::CostSample {
            region: "eu-west-1".to_string(),
            service: "m5.large".to_string(),
            timestamp: at(1),
            amount: 40.0,
        }];
        let source = Arc::new(InMemorySource::new(snap));

        let report = orchestrator(source).run_at("eu-west-1", day(), at(48)).await.unwrap();

        // No measured runtime anywhere: the type-level cost stays unattributed
        for r in &report.resources {
            assert!(r.flags.contains(&ReconstructionFlag::NoAuditCoverage));
            assert_eq!(r.cost, Figure::unavailable(ReasonCode::SourceUnavailable));
            assert_eq!(r.cost_method, CostMethod::UnitPrice);
        }
        assert_eq!(report.totals.cost.total, 0.0);
        assert_eq!(report.totals.cost.skipped, 2);
        assert_eq!(report.coverage.estimated_cost, 0);
    }

    #[tokio::test]
    async fn test_silent_resource_excluded_from_allocation_weights() {
        let mut snap = snapshot();
        snap.audit_events.retain(|e| e.resource_id == "i-a");
        snap.prices.clear();
        snap.cost_samples = vec![crate::models::CostSample {
            region: "eu-west-1".to_string(),
            service: "m5.large".to_string(),
            timestamp: at(1),
            amount: 28.0,
        }];
        let source = Arc::new(InMemorySource::new(snap));

        let report = orchestrator(source).run_at("eu-west-1", day(), at(48)).await.unwrap();

        assert_eq!(report.resource("i-a").unwrap().cost, Figure::defaulted(28.0));
        let b = report.resource("i-b").unwrap();
        assert_eq!(b.cost, Figure::unavailable(ReasonCode::SourceUnavailable));
        assert_eq!(b.cost_method, CostMethod::UnitPrice);
        assert_eq!(report.coverage.estimated_cost, 1);
    }

    #[tokio::test]
    async fn test_negative_price_marks_pricing_unavailable() {
        let mut snap = snapshot();
        snap.prices[0].hourly_price = -1.0;
        let source = Arc::new(InMemorySource::new(snap));

        let report = orchestrator(source).run_at("eu-west-1", day(), at(48)).await.unwrap();

        let a = report.resource("i-a").unwrap();
        assert_eq!(a.cost, Figure::unavailable(ReasonCode::InvalidInput));
        assert!(a.co2_kg.is_measured());
        assert!(a.failures.iter().any(|f| f.category == Some(SourceCategory::Pricing)
            && f.reason == ReasonCode::InvalidInput));

        let pricing = &report.source_health[&SourceCategory::Pricing];
        assert_eq!(pricing.status, SourceStatus::Unavailable);
        assert_eq!(pricing.unavailable, 2);
        assert!(report
            .coverage
            .unavailable_categories
            .contains(&SourceCategory::Pricing));
    }

    #[tokio::test]
    async fn test_missing_price_without_allocation() {
        let mut snap = snapshot();
        snap.prices.clear();
        let source = Arc::new(InMemorySource::new(snap));
        let orchestrator = AttributionOrchestrator::builder()
            .source(source)
            .proportional_allocation(false)
            .build()
            .unwrap();

        let report = orchestrator.run_at("eu-west-1", day(), at(48)).await.unwrap();
        let a = report.resource("i-a").unwrap();
        assert_eq!(a.cost, Figure::unavailable(ReasonCode::SourceUnavailable));
        // CO2 does not depend on price
        assert!(a.co2_kg.is_measured());
        assert!(!a.excluded);
    }

    #[tokio::test]
    async fn test_no_carbon_samples_leaves_co2_unavailable() {
        let mut snap = snapshot();
        snap.carbon_intensity.clear();
        let source = Arc::new(InMemorySource::new(snap));

        let report = orchestrator(source).run_at("eu-west-1", day(), at(48)).await.unwrap();
        let a = report.resource("i-a").unwrap();
        assert_eq!(a.co2_kg, Figure::unavailable(ReasonCode::InsufficientCoverage));
        assert_eq!(a.cost, Figure::measured(5.0));
        assert_eq!(report.totals.co2_kg.skipped, 2);
    }

    #[tokio::test]
    async fn test_invalid_utilization_only_loses_power_figures() {
        let mut snap = snapshot();
        snap.utilization.insert("i-b".to_string(), 130.0);
        let source = Arc::new(InMemorySource::new(snap));

        let report = orchestrator(source).run_at("eu-west-1", day(), at(48)).await.unwrap();
        let b = report.resource("i-b").unwrap();
        assert_eq!(b.co2_kg, Figure::unavailable(ReasonCode::InvalidInput));
        assert_eq!(b.cost, Figure::measured(2.0));
        assert!(b.failures.iter().any(|f| f.reason == ReasonCode::InvalidInput));
    }
}
