//! Source health tracking
//!
//! Records, per source category, whether the data used in an attribution
//! run came from a live fetch, a stale cached payload, or was unavailable.

use crate::error::Result;
use crate::gateway::Fetched;
use crate::models::SourceCategory;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a source category
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    /// Every lookup was served fresh or by a live fetch
    Available,
    /// At least one lookup fell back to an expired cached payload
    Stale,
    /// At least one lookup failed with nothing to fall back on
    Unavailable,
}

impl SourceStatus {
    /// Returns true if the category produced any data at all
    pub fn is_usable(&self) -> bool {
        matches!(self, SourceStatus::Available | SourceStatus::Stale)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Available => "available",
            SourceStatus::Stale => "stale",
            SourceStatus::Unavailable => "unavailable",
        }
    }
}

/// Lookup counters and worst observed status for one category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceHealth {
    pub status: SourceStatus,
    pub available: u32,
    pub stale: u32,
    pub unavailable: u32,
    /// Lookups that succeeded but had nothing for the resource
    #[serde(default)]
    pub insufficient_coverage: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl SourceHealth {
    fn new() -> Self {
        Self {
            status: SourceStatus::Available,
            available: 0,
            stale: 0,
            unavailable: 0,
            insufficient_coverage: 0,
            message: None,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    fn observe(&mut self, status: SourceStatus, message: Option<String>) {
        match status {
            SourceStatus::Available => self.available += 1,
            SourceStatus::Stale => self.stale += 1,
            SourceStatus::Unavailable => self.unavailable += 1,
        }
        if status >= self.status {
            self.status = status;
            if message.is_some() {
                self.message = message;
            }
        }
        self.last_check_timestamp = chrono::Utc::now().timestamp();
    }

    /// A source that answered with no data is reachable; only the gap is counted
    fn observe_gap(&mut self, message: String) {
        self.insufficient_coverage += 1;
        if self.message.is_none() {
            self.message = Some(message);
        }
        self.last_check_timestamp = chrono::Utc::now().timestamp();
    }

    /// True when some lookups succeeded and some failed or came back empty
    pub fn is_partial(&self) -> bool {
        self.insufficient_coverage > 0
            || (self.unavailable > 0 && (self.available > 0 || self.stale > 0))
    }
}

/// Worst status across a set of categories
pub fn compute_status(sources: &BTreeMap<SourceCategory, SourceHealth>) -> SourceStatus {
    sources
        .values()
        .map(|h| h.status)
        .max()
        .unwrap_or(SourceStatus::Available)
}

/// Health registry for one attribution run
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    sources: Arc<RwLock<HashMap<SourceCategory, SourceHealth>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one lookup outcome for a category
    pub async fn observe(
        &self,
        category: SourceCategory,
        status: SourceStatus,
        message: Option<String>,
    ) {
        let mut sources = self.sources.write().await;
        sources
            .entry(category)
            .or_insert_with(SourceHealth::new)
            .observe(status, message);
    }

    pub async fn set_available(&self, category: SourceCategory) {
        self.observe(category, SourceStatus::Available, None).await;
    }

    pub async fn set_stale(&self, category: SourceCategory, message: impl Into<String>) {
        self.observe(category, SourceStatus::Stale, Some(message.into()))
            .await;
    }

    pub async fn set_unavailable(&self, category: SourceCategory, message: impl Into<String>) {
        self.observe(category, SourceStatus::Unavailable, Some(message.into()))
            .await;
    }

    /// Record a successful lookup that had no data for one resource
    pub async fn set_insufficient_coverage(
        &self,
        category: SourceCategory,
        message: impl Into<String>,
    ) {
        let mut sources = self.sources.write().await;
        sources
            .entry(category)
            .or_insert_with(SourceHealth::new)
            .observe_gap(message.into());
    }

    /// Record the outcome of a gateway fetch
    pub async fn record<T>(&self, category: SourceCategory, outcome: &Result<Fetched<T>>) {
        match outcome {
            Ok(fetched) => match fetched.stale_since() {
                Some(fetched_at) => {
                    self.set_stale(
                        category,
                        format!("serving payload fetched at {}", fetched_at.to_rfc3339()),
                    )
                    .await
                }
                None => self.set_available(category).await,
            },
            Err(e) => self.set_unavailable(category, e.to_string()).await,
        }
    }

    /// Current per-category health
    pub async fn snapshot(&self) -> BTreeMap<SourceCategory, SourceHealth> {
        let sources = self.sources.read().await;
        sources.iter().map(|(k, v)| (*k, v.clone())).collect()
    }

    /// Worst status across all categories seen so far
    pub async fn overall(&self) -> SourceStatus {
        compute_status(&self.snapshot().await)
    }
}
