//! Memory Backend Module
//!
//! In-process store combining a HashMap with LRU tracking and TTL expiration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::clock::{system_clock, Clock};
use crate::error::Result;
use crate::storage::{CacheEntry, RecencyOrder, StorageAdapter};

// == Memory Store ==
/// Synchronous store behind the memory adapter's lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Key-value storage
    entries: HashMap<String, CacheEntry>,
    /// LRU access order
    recency: RecencyOrder,
    /// Maximum number of entries, None = unbounded
    max_entries: Option<usize>,
    /// Entries dropped to make room
    evictions: u64,
}

impl MemoryStore {
    // == Constructor ==
    /// Creates a store, optionally bounded to `max_entries`.
    pub fn new(max_entries: Option<usize>) -> Self {
        Self {
            max_entries,
            ..Self::default()
        }
    }

    // == Set ==
    /// Upserts an entry, evicting the least recently used key when full.
    pub fn set(&mut self, key: &str, entry: CacheEntry) {
        let is_overwrite = self.entries.contains_key(key);

        if let Some(max) = self.max_entries {
            while !is_overwrite && self.entries.len() >= max.max(1) {
                match self.recency.pop_oldest() {
                    Some(evicted) => {
                        self.entries.remove(&evicted);
                        self.evictions += 1;
                    }
                    None => break,
                }
            }
        }

        self.entries.insert(key.to_string(), entry);
        self.recency.touch(key);
    }

    // == Get ==
    /// Returns the live entry, purging it first if it has expired.
    pub fn get(&mut self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        if self.purge_if_expired(key, now) {
            return None;
        }
        let entry = self.entries.get(key)?.clone();
        self.recency.touch(key);
        Some(entry)
    }

    // == Delete ==
    /// Removes an entry, returning true only if it was live.
    pub fn delete(&mut self, key: &str, now: DateTime<Utc>) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.recency.remove(key);
                !entry.is_expired_at(now)
            }
            None => false,
        }
    }

    // == Exists ==
    pub fn exists(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired_at(now))
    }

    // == Touch ==
    /// Restarts a live entry's lifetime with a new TTL.
    pub fn touch(&mut self, key: &str, ttl: Option<Duration>, now: DateTime<Utc>) -> bool {
        if self.purge_if_expired(key, now) {
            return false;
        }
        match self.entries.remove(key) {
            Some(entry) => {
                self.entries.insert(key.to_string(), entry.retimed(ttl, now));
                self.recency.touch(key);
                true
            }
            None => false,
        }
    }

    // == Purge Expired ==
    /// Removes all expired entries, returning how many were removed.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.entries.remove(key);
            self.recency.remove(key);
        }
        expired.len()
    }

    fn purge_if_expired(&mut self, key: &str, now: DateTime<Utc>) -> bool {
        let expired = self
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_expired_at(now));
        if expired {
            self.entries.remove(key);
            self.recency.remove(key);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }
}

// == Memory Adapter ==
/// Storage adapter over an in-process `MemoryStore`.
#[derive(Clone)]
pub struct MemoryAdapter {
    store: Arc<RwLock<MemoryStore>>,
    clock: Arc<dyn Clock>,
}

impl MemoryAdapter {
    /// Creates an unbounded memory adapter on the system clock.
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// Creates a memory adapter holding at most `max_entries` keys.
    pub fn with_capacity(max_entries: Option<usize>) -> Self {
        Self {
            store: Arc::new(RwLock::new(MemoryStore::new(max_entries))),
            clock: system_clock(),
        }
    }

    /// Replaces the clock used for expiry checks.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Removes every expired entry now.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        self.store.write().await.purge_expired(now)
    }

    /// Number of stored entries, expired-but-unpurged included.
    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.is_empty()
    }

    pub async fn evictions(&self) -> u64 {
        self.store.read().await.evictions()
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let now = self.clock.now();
        Ok(self.store.write().await.get(key, now))
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<()> {
        self.store.write().await.set(key, entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = self.clock.now();
        Ok(self.store.write().await.delete(key, now))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = self.clock.now();
        Ok(self.store.read().await.exists(key, now))
    }

    async fn touch(&self, key: &str, ttl: Option<Duration>) -> Result<bool> {
        let now = self.clock.now();
        Ok(self.store.write().await.touch(key, ttl, now))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<CacheEntry>>> {
        let now = self.clock.now();
        let mut store = self.store.write().await;
        Ok(keys.iter().map(|key| store.get(key, now)).collect())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
