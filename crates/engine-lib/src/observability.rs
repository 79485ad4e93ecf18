//! Observability for the attribution engine
//!
//! Provides:
//! - Prometheus metrics (fetch latency, cache outcomes, enrichment counts, run latency)
//! - Structured logging with tracing

use crate::figure::{Confidence, ReasonCode};
use crate::models::SourceCategory;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Histogram buckets for source fetch latency (in seconds)
const FETCH_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Histogram buckets for whole attribution runs (in seconds)
const RUN_LATENCY_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

struct EngineMetricsInner {
    fetch_latency_seconds: HistogramVec,
    cache_lookups: IntCounterVec,
    resources_enriched: IntCounter,
    resources_skipped: IntCounterVec,
    run_latency_seconds: Histogram,
    fleet_resources: IntGauge,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            fetch_latency_seconds: register_histogram_vec!(
                "footprint_engine_fetch_latency_seconds",
                "Time spent loading data from an external source",
                &["category"],
                FETCH_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register fetch_latency_seconds"),

            cache_lookups: register_int_counter_vec!(
                "footprint_engine_cache_lookups_total",
                "Cache lookups by category and outcome (hit, loaded, stale, failed)",
                &["category", "outcome"]
            )
            .expect("Failed to register cache_lookups"),

            resources_enriched: register_int_counter!(
                "footprint_engine_resources_enriched_total",
                "Resources attributed with at least a cost or CO2 figure"
            )
            .expect("Failed to register resources_enriched"),

            resources_skipped: register_int_counter_vec!(
                "footprint_engine_resources_skipped_total",
                "Resources excluded from attribution, by reason",
                &["reason"]
            )
            .expect("Failed to register resources_skipped"),

            run_latency_seconds: register_histogram!(
                "footprint_engine_run_latency_seconds",
                "Wall time of a complete attribution run",
                RUN_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register run_latency_seconds"),

            fleet_resources: register_int_gauge!(
                "footprint_engine_fleet_resources",
                "Resources listed by the most recent attribution run"
            )
            .expect("Failed to register fleet_resources"),
        }
    }
}

/// Outcome of a cache lookup, used as a metric label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Loaded,
    Stale,
    Failed,
}

impl CacheOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            CacheOutcome::Hit => "hit",
            CacheOutcome::Loaded => "loaded",
            CacheOutcome::Stale => "stale",
            CacheOutcome::Failed => "failed",
        }
    }
}

/// Engine metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct EngineMetrics {
    _private: (),
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EngineMetricsInner {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new)
    }

    pub fn observe_fetch_latency(&self, category: SourceCategory, duration_secs: f64) {
        self.inner()
            .fetch_latency_seconds
            .with_label_values(&[category.as_str()])
            .observe(duration_secs);
    }

    pub fn record_cache_outcome(&self, category: SourceCategory, outcome: CacheOutcome) {
        self.inner()
            .cache_lookups
            .with_label_values(&[category.as_str(), outcome.as_str()])
            .inc();
    }

    pub fn inc_resources_enriched(&self) {
        self.inner().resources_enriched.inc();
    }

    pub fn inc_resources_skipped(&self, reason: ReasonCode) {
        let label = match reason {
            ReasonCode::SourceUnavailable => "source_unavailable",
            ReasonCode::InvalidInput => "invalid_input",
            ReasonCode::InsufficientCoverage => "insufficient_coverage",
        };
        self.inner().resources_skipped.with_label_values(&[label]).inc();
    }

    pub fn observe_run_latency(&self, duration_secs: f64) {
        self.inner().run_latency_seconds.observe(duration_secs);
    }

    pub fn set_fleet_resources(&self, count: i64) {
        self.inner().fleet_resources.set(count);
    }
}

/// Structured logger for engine events
#[derive(Clone)]
pub struct StructuredLogger {
    component: String,
}

impl StructuredLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    /// Log the start of an attribution run
    pub fn log_run_started(&self, region: &str, from: &str, to: &str, resources: usize) {
        info!(
            event = "attribution_started",
            component = %self.component,
            region = %region,
            from = %from,
            to = %to,
            resources = resources,
            "Attribution run started"
        );
    }

    /// Log a resource that produced figures
    pub fn log_resource_enriched(
        &self,
        resource_id: &str,
        confidence: Confidence,
        runtime_hours: Option<f64>,
        cost: Option<f64>,
        co2_kg: Option<f64>,
    ) {
        debug!(
            event = "resource_enriched",
            component = %self.component,
            resource_id = %resource_id,
            confidence = confidence.as_str(),
            runtime_hours = ?runtime_hours,
            cost = ?cost,
            co2_kg = ?co2_kg,
            "Resource attributed"
        );
    }

    /// Log a resource excluded from attribution
    pub fn log_resource_skipped(&self, resource_id: &str, reason: ReasonCode, details: &str) {
        warn!(
            event = "resource_skipped",
            component = %self.component,
            resource_id = %resource_id,
            reason = ?reason,
            details = %details,
            "Resource excluded from attribution"
        );
    }

    /// Log a stale payload served after a failed refresh
    pub fn log_stale_fallback(
        &self,
        category: SourceCategory,
        key: &str,
        fetched_at: &str,
        error: &str,
    ) {
        warn!(
            event = "stale_fallback",
            component = %self.component,
            category = %category,
            key = %key,
            fetched_at = %fetched_at,
            error = %error,
            "Source refresh failed, serving stale cached payload"
        );
    }

    /// Log a failed fetch with nothing cached to fall back on
    pub fn log_source_unavailable(&self, category: SourceCategory, key: &str, error: &str) {
        warn!(
            event = "source_unavailable",
            component = %self.component,
            category = %category,
            key = %key,
            error = %error,
            "Source fetch failed and no cached payload exists"
        );
    }

    /// Log the completion of an attribution run
    pub fn log_run_completed(
        &self,
        region: &str,
        included: usize,
        skipped: usize,
        total_cost: f64,
        total_co2_kg: f64,
        validation_bucket: &str,
        elapsed_ms: u128,
    ) {
        info!(
            event = "attribution_completed",
            component = %self.component,
            region = %region,
            included = included,
            skipped = skipped,
            total_cost = total_cost,
            total_co2_kg = total_co2_kg,
            validation_bucket = %validation_bucket,
            elapsed_ms = elapsed_ms,
            "Attribution run completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_metrics_creation() {
        // Metrics live in the global Prometheus registry; repeated handles
        // share one registration.
        let metrics = EngineMetrics::new();
        let again = EngineMetrics::new();

        metrics.observe_fetch_latency(SourceCategory::Pricing, 0.01);
        metrics.record_cache_outcome(SourceCategory::Pricing, CacheOutcome::Hit);
        again.record_cache_outcome(SourceCategory::Pricing, CacheOutcome::Stale);
        metrics.inc_resources_enriched();
        metrics.inc_resources_skipped(ReasonCode::InvalidInput);
        metrics.observe_run_latency(0.2);
        metrics.set_fleet_resources(4);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("gateway");
        assert_eq!(logger.component, "gateway");
    }
}
