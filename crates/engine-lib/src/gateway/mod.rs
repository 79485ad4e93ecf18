//! Cached source gateway
//!
//! Uniform accessor over every external source. A read returns a cached
//! payload while it is younger than its category TTL; otherwise the loader
//! runs. When the loader fails the previous payload (however old) is served
//! marked stale, and only when nothing was ever cached does the failure
//! propagate. No substitute values are ever synthesized here.

mod cache;

pub use cache::{CacheEntry, CacheKey, CacheStore};

use crate::config::CacheConfig;
use crate::error::{EngineError, Result};
use crate::models::{
    AuditEvent, CarbonSample, CostSample, PowerProfile, Resource, SourceCategory, TimeWindow,
};
use crate::observability::{CacheOutcome, EngineMetrics, StructuredLogger};
use crate::sources::DataSource;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Where a returned payload came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Freshness {
    /// Served from cache within its TTL; the loader was not called
    Cached,
    /// Loaded live from the source during this call
    Loaded,
    /// Refresh failed; an expired payload was served
    Stale { fetched_at: DateTime<Utc> },
}

/// A payload with its freshness annotation
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub value: T,
    pub freshness: Freshness,
}

impl<T> Fetched<T> {
    pub fn is_stale(&self) -> bool {
        matches!(self.freshness, Freshness::Stale { .. })
    }

    /// Fetch time of the stale payload, if stale
    pub fn stale_since(&self) -> Option<DateTime<Utc>> {
        match self.freshness {
            Freshness::Stale { fetched_at } => Some(fetched_at),
            _ => None,
        }
    }
}

/// Gateway enforcing per-category freshness over a [`DataSource`]
pub struct CachedSourceGateway {
    source: Arc<dyn DataSource>,
    store: Arc<CacheStore>,
    config: CacheConfig,
    metrics: EngineMetrics,
    logger: StructuredLogger,
}

impl CachedSourceGateway {
    /// Create a gateway, loading the persisted cache if one is configured
    pub fn new(source: Arc<dyn DataSource>, config: CacheConfig) -> Result<Self> {
        let store = match &config.persistence_path {
            Some(path) => CacheStore::with_persistence(path.clone(), config.max_entries_per_category)
                .map_err(|e| EngineError::Config(format!("{:#}", e)))?,
            None => CacheStore::new(config.max_entries_per_category),
        };
        Ok(Self::with_store(source, config, Arc::new(store)))
    }

    /// Create a gateway over an existing store
    pub fn with_store(source: Arc<dyn DataSource>, config: CacheConfig, store: Arc<CacheStore>) -> Self {
        Self {
            source,
            store,
            config,
            metrics: EngineMetrics::new(),
            logger: StructuredLogger::new("gateway"),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Persist the cache if persistence is configured
    pub fn flush(&self) -> anyhow::Result<()> {
        self.store.flush()
    }

    /// Return the payload for `(category, key)`, invoking `loader` only when
    /// no fresh entry exists.
    ///
    /// The loader runs on its own task and writes the cache itself, so an
    /// abandoned caller still leaves the result for later requests.
    pub async fn fetch<T, F, Fut>(
        &self,
        category: SourceCategory,
        key: &str,
        loader: F,
    ) -> Result<Fetched<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let cache_key = CacheKey::new(category, key);

        if let Some(hit) = self.cached(&cache_key) {
            self.metrics.record_cache_outcome(category, CacheOutcome::Hit);
            return Ok(hit);
        }

        let lock = self.store.key_lock(&cache_key);
        let _guard = lock.lock().await;

        // Another caller may have loaded the key while we waited
        if let Some(hit) = self.cached(&cache_key) {
            self.metrics.record_cache_outcome(category, CacheOutcome::Hit);
            return Ok(hit);
        }

        let ttl = self.config.ttl(category);
        let store = Arc::clone(&self.store);
        let entry_key = cache_key.clone();
        let pending = loader();
        let started = Instant::now();

        let task = tokio::spawn(async move {
            let value = pending.await?;
            let payload = serde_json::to_value(&value)
                .map_err(|e| anyhow::anyhow!("Failed to encode payload: {}", e))?;
            store.insert(CacheEntry::new(entry_key, payload, Utc::now(), ttl));
            Ok::<T, anyhow::Error>(value)
        });

        let outcome = match task.await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("Loader task failed: {}", e)),
        };
        self.metrics
            .observe_fetch_latency(category, started.elapsed().as_secs_f64());

        match outcome {
            Ok(value) => {
                debug!(category = %category, key = %key, "Loaded from source");
                self.metrics.record_cache_outcome(category, CacheOutcome::Loaded);
                Ok(Fetched {
                    value,
                    freshness: Freshness::Loaded,
                })
            }
            Err(e) => self.fallback(&cache_key, e),
        }
    }

    /// Fresh cached payload, if any
    fn cached<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<Fetched<T>> {
        let entry = self.store.get(key)?;
        if !entry.is_fresh(Utc::now()) {
            return None;
        }

        match serde_json::from_value(entry.payload) {
            Ok(value) => Some(Fetched {
                value,
                freshness: Freshness::Cached,
            }),
            Err(e) => {
                warn!(category = %key.category, key = %key.key, error = %e, "Discarding undecodable cache entry");
                None
            }
        }
    }

    /// Serve the previous payload after a failed load, or report the source unavailable
    fn fallback<T: DeserializeOwned>(&self, key: &CacheKey, error: anyhow::Error) -> Result<Fetched<T>> {
        let reason = format!("{:#}", error);

        if let Some(entry) = self.store.get(key) {
            let fetched_at = entry.fetched_at;
            let fresh = entry.is_fresh(Utc::now());

            match serde_json::from_value(entry.payload) {
                Ok(value) if fresh => {
                    // Written by a concurrent load between our check and failure
                    self.metrics.record_cache_outcome(key.category, CacheOutcome::Hit);
                    return Ok(Fetched {
                        value,
                        freshness: Freshness::Cached,
                    });
                }
                Ok(value) => {
                    self.metrics.record_cache_outcome(key.category, CacheOutcome::Stale);
                    self.logger.log_stale_fallback(
                        key.category,
                        &key.key,
                        &fetched_at.to_rfc3339(),
                        &reason,
                    );
                    return Ok(Fetched {
                        value,
                        freshness: Freshness::Stale { fetched_at },
                    });
                }
                Err(e) => {
                    warn!(category = %key.category, key = %key.key, error = %e, "Stale cache entry is undecodable");
                }
            }
        }

        self.metrics.record_cache_outcome(key.category, CacheOutcome::Failed);
        self.logger.log_source_unavailable(key.category, &key.key, &reason);
        Err(EngineError::SourceUnavailable {
            category: key.category,
            key: key.key.clone(),
            reason,
        })
    }

    pub async fn resources(&self, region: &str) -> Result<Fetched<Vec<Resource>>> {
        let source = Arc::clone(&self.source);
        let region_owned = region.to_string();
        self.fetch(SourceCategory::Inventory, region, move || async move {
            source.list_resources(&region_owned).await
        })
        .await
    }

    pub async fn audit_events(
        &self,
        resource_id: &str,
        window: &TimeWindow,
    ) -> Result<Fetched<Vec<AuditEvent>>> {
        let source = Arc::clone(&self.source);
        let id = resource_id.to_string();
        let (from, to) = (window.from, window.to);
        let key = format!("{}|{}", resource_id, window.cache_key());
        self.fetch(SourceCategory::AuditLog, &key, move || async move {
            source.list_audit_events(&id, from, to).await
        })
        .await
    }

    pub async fn utilization(
        &self,
        resource_id: &str,
        window: &TimeWindow,
    ) -> Result<Fetched<Option<f64>>> {
        let source = Arc::clone(&self.source);
        let id = resource_id.to_string();
        let (from, to) = (window.from, window.to);
        let key = format!("{}|{}", resource_id, window.cache_key());
        self.fetch(SourceCategory::Utilization, &key, move || async move {
            source.get_utilization(&id, from, to).await
        })
        .await
    }

    pub async fn power_profile(&self, resource_type: &str) -> Result<Fetched<PowerProfile>> {
        let source = Arc::clone(&self.source);
        let resource_type_owned = resource_type.to_string();
        self.fetch(SourceCategory::PowerProfile, resource_type, move || async move {
            source.get_power_profile(&resource_type_owned).await
        })
        .await
    }

    pub async fn unit_price(&self, resource_type: &str, region: &str) -> Result<Fetched<f64>> {
        let source = Arc::clone(&self.source);
        let resource_type_owned = resource_type.to_string();
        let region_owned = region.to_string();
        let key = format!("{}|{}", resource_type, region);
        self.fetch(SourceCategory::Pricing, &key, move || async move {
            source
                .get_unit_price(&resource_type_owned, &region_owned)
                .await
        })
        .await
    }

    pub async fn carbon_intensity(
        &self,
        region: &str,
        window: &TimeWindow,
    ) -> Result<Fetched<Vec<CarbonSample>>> {
        let source = Arc::clone(&self.source);
        let region_owned = region.to_string();
        let (from, to) = (window.from, window.to);
        let key = format!("{}|{}", region, window.cache_key());
        self.fetch(SourceCategory::CarbonIntensity, &key, move || async move {
            source.get_carbon_intensity(&region_owned, from, to).await
        })
        .await
    }

    pub async fn ledger_total(
        &self,
        region: &str,
        window: &TimeWindow,
    ) -> Result<Fetched<Option<f64>>> {
        let source = Arc::clone(&self.source);
        let region_owned = region.to_string();
        let (from, to) = (window.from, window.to);
        let key = format!("{}|{}", region, window.cache_key());
        self.fetch(SourceCategory::Ledger, &key, move || async move {
            source.get_ledger_total(&region_owned, from, to).await
        })
        .await
    }

    pub async fn cost_samples(
        &self,
        region: &str,
        window: &TimeWindow,
    ) -> Result<Fetched<Vec<CostSample>>> {
        let source = Arc::clone(&self.source);
        let region_owned = region.to_string();
        let (from, to) = (window.from, window.to);
        let key = format!("{}|{}", region, window.cache_key());
        self.fetch(SourceCategory::CostSamples, &key, move || async move {
            source.list_cost_samples(&region_owned, from, to).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{InMemorySource, Snapshot};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn gateway_with(config: CacheConfig) -> CachedSourceGateway {
        let source: Arc<dyn DataSource> = Arc::new(InMemorySource::new(Snapshot::default()));
        CachedSourceGateway::new(source, config).unwrap()
    }

    /// Loader that counts invocations and returns a fixed value or error
    fn counting_loader(
        calls: &Arc<AtomicUsize>,
        result: std::result::Result<f64, &'static str>,
    ) -> impl FnOnce() -> std::pin::Pin<Box<dyn Future<Output = anyhow::Result<f64>> + Send>> {
        let calls = Arc::clone(calls);
        move || {
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                result.map_err(|e| anyhow::anyhow!(e))
            })
        }
    }

    #[tokio::test]
    async fn test_fresh_entry_never_invokes_loader() {
        let gateway = gateway_with(CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let first = gateway
            .fetch(SourceCategory::Pricing, "m5.large|eu", counting_loader(&calls, Ok(0.096)))
            .await
            .unwrap();
        assert_eq!(first.freshness, Freshness::Loaded);

        let second = gateway
            .fetch(SourceCategory::Pricing, "m5.large|eu", counting_loader(&calls, Ok(9.99)))
            .await
            .unwrap();

        assert_eq!(second.value, 0.096);
        assert_eq!(second.freshness, Freshness::Cached);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refreshed() {
        let gateway = gateway_with(CacheConfig::uniform(Duration::ZERO));
        let calls = Arc::new(AtomicUsize::new(0));

        gateway
            .fetch(SourceCategory::CarbonIntensity, "eu", counting_loader(&calls, Ok(210.0)))
            .await
            .unwrap();
        let refreshed = gateway
            .fetch(SourceCategory::CarbonIntensity, "eu", counting_loader(&calls, Ok(190.0)))
            .await
            .unwrap();

        assert_eq!(refreshed.value, 190.0);
        assert_eq!(refreshed.freshness, Freshness::Loaded);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_serves_stale() {
        let gateway = gateway_with(CacheConfig::uniform(Duration::ZERO));
        let calls = Arc::new(AtomicUsize::new(0));

        gateway
            .fetch(SourceCategory::Ledger, "eu", counting_loader(&calls, Ok(120.0)))
            .await
            .unwrap();
        let stale = gateway
            .fetch(SourceCategory::Ledger, "eu", counting_loader(&calls, Err("billing API down")))
            .await
            .unwrap();

        assert_eq!(stale.value, 120.0);
        assert!(stale.is_stale());
        assert!(stale.stale_since().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_without_cache_propagates() {
        let gateway = gateway_with(CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let err = gateway
            .fetch(SourceCategory::PowerProfile, "m5.large", counting_loader(&calls, Err("catalog down")))
            .await
            .unwrap_err();

        match err {
            EngineError::SourceUnavailable { category, key, reason } => {
                assert_eq!(category, SourceCategory::PowerProfile);
                assert_eq!(key, "m5.large");
                assert!(reason.contains("catalog down"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(gateway.store().is_empty());
    }

    #[tokio::test]
    async fn test_ttl_is_per_category() {
        let mut config = CacheConfig::uniform(Duration::from_secs(3600));
        config.carbon_intensity_ttl_secs = 0;
        let gateway = gateway_with(config);
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            gateway
                .fetch(SourceCategory::CarbonIntensity, "eu", counting_loader(&calls, Ok(1.0)))
                .await
                .unwrap();
            gateway
                .fetch(SourceCategory::PowerProfile, "eu", counting_loader(&calls, Ok(1.0)))
                .await
                .unwrap();
        }

        // carbon loaded twice, power profile once
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_concurrent_same_key_loads_once() {
        let gateway = Arc::new(gateway_with(CacheConfig::default()));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gateway = Arc::clone(&gateway);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                gateway
                    .fetch(SourceCategory::Pricing, "shared", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<f64, anyhow::Error>(0.5)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().value, 0.5);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_miss_on_one_key_does_not_block_another() {
        let gateway = Arc::new(gateway_with(CacheConfig::default()));
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let slow_gateway = Arc::clone(&gateway);
        let slow = tokio::spawn(async move {
            slow_gateway
                .fetch(SourceCategory::Pricing, "slow", move || async move {
                    let _ = release_rx.await;
                    Ok::<f64, anyhow::Error>(1.0)
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let fast = tokio::time::timeout(
            Duration::from_secs(1),
            gateway.fetch(SourceCategory::Pricing, "fast", || async {
                Ok::<f64, anyhow::Error>(2.0)
            }),
        )
        .await
        .expect("fetch for another key should not wait on the slow key")
        .unwrap();
        assert_eq!(fast.value, 2.0);

        release_tx.send(()).unwrap();
        assert_eq!(slow.await.unwrap().unwrap().value, 1.0);
    }

    #[tokio::test]
    async fn test_abandoned_fetch_still_populates_cache() {
        let gateway = gateway_with(CacheConfig::default());
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            gateway.fetch(SourceCategory::PowerProfile, "c5.xlarge", move || async move {
                let _ = release_rx.await;
                Ok::<f64, anyhow::Error>(120.0)
            }),
        )
        .await;
        assert!(abandoned.is_err());

        release_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let key = CacheKey::new(SourceCategory::PowerProfile, "c5.xlarge");
        assert!(gateway.store().get(&key).is_some());
    }

    #[tokio::test]
    async fn test_typed_accessors_use_source() {
        let snapshot = Snapshot {
            power_profiles: vec![PowerProfile {
                resource_type: "m5.large".to_string(),
                min_watts: 20.0,
                avg_watts: 60.0,
                max_watts: 110.0,
            }],
            ..Default::default()
        };
        let source = Arc::new(InMemorySource::new(snapshot));
        let gateway = CachedSourceGateway::new(source.clone(), CacheConfig::default()).unwrap();

        let profile = gateway.power_profile("m5.large").await.unwrap();
        assert_eq!(profile.value.avg_watts, 60.0);
        gateway.power_profile("m5.large").await.unwrap();
        assert_eq!(source.call_count(SourceCategory::PowerProfile), 1);

        assert!(gateway.unit_price("m5.large", "eu-west-1").await.is_err());
    }
}
