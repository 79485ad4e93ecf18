//! CLI subcommands

pub mod report;
pub mod runtime;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use engine_lib::{AttributionOrchestrator, EngineConfig, InMemorySource, TimeWindow};
use std::path::Path;
use std::sync::Arc;

/// Snapshot-backed source plus an orchestrator over it
pub struct Session {
    pub source: Arc<InMemorySource>,
    pub orchestrator: AttributionOrchestrator,
}

impl Session {
    pub fn open(snapshot: &Path, config: EngineConfig) -> Result<Self> {
        let source = Arc::new(InMemorySource::from_snapshot_file(snapshot)?);
        let orchestrator = AttributionOrchestrator::builder()
            .source(source.clone())
            .config(config)
            .build()
            .context("Failed to build attribution engine")?;

        Ok(Self {
            source,
            orchestrator,
        })
    }

    /// Persist the cache if the configuration enables it
    pub fn close(&self) -> Result<()> {
        self.orchestrator
            .gateway()
            .flush()
            .context("Failed to persist cache")
    }
}

pub fn window(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<TimeWindow> {
    TimeWindow::new(from, to).context("Invalid time window")
}
