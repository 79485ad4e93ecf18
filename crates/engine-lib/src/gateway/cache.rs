//! Multi-source cache store
//!
//! Entries are keyed by `(category, key)` and hold a type-erased JSON
//! payload with its fetch time and the category TTL at fetch time:
//! - Per-key fetch locks so a miss never blocks other keys
//! - Bounded retention per category with oldest-first eviction
//! - Optional JSON persistence with atomic writes

use crate::models::SourceCategory;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Cache key: category plus a category-specific key string
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub category: SourceCategory,
    pub key: String,
}

impl CacheKey {
    pub fn new(category: SourceCategory, key: impl Into<String>) -> Self {
        Self {
            category,
            key: key.into(),
        }
    }
}

/// A cached payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub category: SourceCategory,
    pub key: String,
    pub payload: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl CacheEntry {
    pub fn new(
        key: CacheKey,
        payload: serde_json::Value,
        fetched_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            category: key.category,
            key: key.key,
            payload,
            fetched_at,
            ttl_secs: ttl.as_secs(),
        }
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.category, self.key.clone())
    }

    /// True while the entry is younger than its TTL
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let age = now - self.fetched_at;
        age.num_milliseconds() < (self.ttl_secs as i64).saturating_mul(1000)
    }
}

/// Concurrent cache of source payloads
pub struct CacheStore {
    entries: DashMap<CacheKey, CacheEntry>,
    locks: DashMap<CacheKey, Arc<Mutex<()>>>,
    /// Entry count per category, kept in step with `entries`
    counts: DashMap<SourceCategory, usize>,
    max_entries_per_category: usize,
    persistence_path: Option<PathBuf>,
    dirty: AtomicBool,
}

impl CacheStore {
    /// Create an in-memory store
    pub fn new(max_entries_per_category: usize) -> Self {
        Self {
            entries: DashMap::new(),
            locks: DashMap::new(),
            counts: DashMap::new(),
            max_entries_per_category: max_entries_per_category.max(1),
            persistence_path: None,
            dirty: AtomicBool::new(false),
        }
    }

    /// Create a store backed by a JSON file, loading existing entries
    pub fn with_persistence(path: PathBuf, max_entries_per_category: usize) -> Result<Self> {
        let mut store = Self::new(max_entries_per_category);
        store.persistence_path = Some(path.clone());

        if path.exists() {
            if let Err(e) = store.load_from_disk(&path) {
                warn!(error = %e, "Failed to load persisted cache, starting empty");
            }
        }

        Ok(store)
    }

    /// Current entry for a key, fresh or not
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.get(key).map(|r| r.value().clone())
    }

    /// Insert or replace an entry; the latest write wins
    pub fn insert(&self, entry: CacheEntry) {
        self.store_entry(entry);
        self.dirty.store(true, Ordering::Release);
    }

    fn store_entry(&self, entry: CacheEntry) {
        let category = entry.category;
        if self.entries.insert(entry.cache_key(), entry).is_some() {
            return;
        }
        let held = {
            let mut count = self.counts.entry(category).or_insert(0);
            *count += 1;
            *count
        };
        if held > self.max_entries_per_category {
            self.evict_over_capacity(category);
        }
    }

    /// Fetch lock for a key, created on first use
    pub fn key_lock(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries held for a category
    pub fn category_len(&self, category: SourceCategory) -> usize {
        self.counts.get(&category).map(|c| *c).unwrap_or(0)
    }

    /// Evict the oldest entries of a category beyond the retention bound
    fn evict_over_capacity(&self, category: SourceCategory) {
        let mut held: Vec<(CacheKey, DateTime<Utc>)> = self
            .entries
            .iter()
            .filter(|r| r.key().category == category)
            .map(|r| (r.key().clone(), r.value().fetched_at))
            .collect();

        if held.len() <= self.max_entries_per_category {
            return;
        }

        held.sort_by_key(|(_, fetched_at)| *fetched_at);
        let excess = held.len() - self.max_entries_per_category;
        for (key, _) in held.into_iter().take(excess) {
            debug!(category = %key.category, key = %key.key, "Evicting cache entry");
            if self.entries.remove(&key).is_some() {
                if let Some(mut count) = self.counts.get_mut(&key.category) {
                    *count = count.saturating_sub(1);
                }
            }
            // A lock still held by an in-flight fetch must survive eviction
            self.locks.remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
        }
    }

    /// Write entries to disk if persistence is enabled and anything changed
    pub fn flush(&self) -> Result<()> {
        let Some(path) = self.persistence_path.as_ref() else {
            return Ok(());
        };
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        if let Err(e) = self.save_to_disk(path) {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        debug!(path = %path.display(), entries = self.len(), "Cache flushed to disk");
        Ok(())
    }

    fn save_to_disk(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let entries: Vec<CacheEntry> = self.entries.iter().map(|r| r.value().clone()).collect();
        let json = serde_json::to_vec(&entries).context("Failed to serialize cache entries")?;

        let temp_path = path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .with_context(|| format!("Failed to create temp file {:?}", temp_path))?;

        file.write_all(&json).context("Failed to write cache data")?;
        file.sync_all().context("Failed to sync cache file")?;

        std::fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

        Ok(())
    }

    fn load_from_disk(&self, path: &Path) -> Result<()> {
        let data =
            std::fs::read(path).with_context(|| format!("Failed to read cache file {:?}", path))?;
        let entries: Vec<CacheEntry> =
            serde_json::from_slice(&data).context("Failed to deserialize cache file")?;

        for entry in entries {
            self.store_entry(entry);
        }

        info!(path = %path.display(), entries = self.len(), "Loaded cache from disk");
        Ok(())
    }
}
