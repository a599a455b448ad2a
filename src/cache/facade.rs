//! Cache Façade
//!
//! Combines a codec, a storage adapter and the key lock registry into the
//! get-or-compute API application code calls.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{CacheStats, StatsSnapshot};
use crate::clock::{system_clock, Clock};
use crate::codec::{Codec, JsonCodec};
use crate::config::{CacheConfig, LockTimeoutPolicy};
use crate::error::{CacheError, Result};
use crate::key;
use crate::registry::{Acquired, KeyLockRegistry, LeaderGuard};
use crate::storage::{CacheEntry, StorageAdapter};

/// Result of one storage read, decoded.
enum Lookup<V> {
    Hit(V),
    Negative,
    Miss,
}

/// What a fallback run produced, plus the outcome of persisting it.
struct Produced<V> {
    value: Option<V>,
    bytes: Option<Bytes>,
    write_error: Option<CacheError>,
}

// == Cache ==
/// Backend-agnostic cache with per-key stampede protection.
///
/// Cloning is cheap and clones share storage, in-flight state and stats.
#[derive(Clone)]
pub struct Cache<C = JsonCodec> {
    adapter: Arc<dyn StorageAdapter>,
    codec: C,
    registry: KeyLockRegistry,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    stats: Arc<CacheStats>,
}

impl Cache<JsonCodec> {
    // == Constructor ==
    /// Creates a JSON-encoding cache over `adapter`.
    ///
    /// Fails with `CacheError::InvalidConfig` if `config` does not validate.
    pub fn new(adapter: Arc<dyn StorageAdapter>, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            adapter,
            codec: JsonCodec,
            registry: KeyLockRegistry::new(),
            config,
            clock: system_clock(),
            stats: Arc::new(CacheStats::new()),
        })
    }

    /// Cache key for one call of a memoized function, see [`key::value_key`].
    ///
    /// ```ignore
    /// let key = Cache::value_key(function_key(&load_user), &(42u64,))?;
    /// let user = cache.get_or_set(&key, None, || load_user(42)).await?;
    /// ```
    pub fn value_key<A: Serialize + ?Sized>(namespace: &str, args: &A) -> Result<String> {
        key::value_key(namespace, args)
    }
}

impl<C: Codec> Cache<C> {
    /// Switches the wire format.
    pub fn with_codec<D: Codec>(self, codec: D) -> Cache<D> {
        Cache {
            adapter: self.adapter,
            codec,
            registry: self.registry,
            config: self.config,
            clock: self.clock,
            stats: self.stats,
        }
    }

    /// Replaces the clock used to timestamp new entries.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn registry(&self) -> &KeyLockRegistry {
        &self.registry
    }

    pub fn backend_type(&self) -> &'static str {
        self.adapter.backend_type()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    // == Get Or Set ==
    /// Returns the cached value for `key`, computing it with `fallback` on a miss.
    ///
    /// Concurrent misses on the same key run `fallback` once; the other
    /// callers receive the same value or the same error. `ttl` of None
    /// uses the configured default. A negative marker counts as a miss here.
    pub async fn get_or_set<V, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fallback: F,
    ) -> Result<V>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        let wrapped = || async move { fallback().await.map(Some) };
        match self.resolve_cycle(key, ttl, wrapped, false).await? {
            Some(value) => Ok(value),
            None => Err(CacheError::fallback(anyhow::anyhow!(
                "fallback for {key} produced no value"
            ))),
        }
    }

    /// Like [`Cache::get_or_set`], for fallbacks that may find nothing.
    ///
    /// `Ok(None)` from the fallback is returned as `None` and, when
    /// negative caching is enabled, remembered for `negative_cache_ttl`.
    pub async fn get_or_set_optional<V, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fallback: F,
    ) -> Result<Option<V>>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<V>>>,
    {
        self.resolve_cycle(key, ttl, fallback, true).await
    }

    async fn resolve_cycle<V, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fallback: F,
        accept_negative: bool,
    ) -> Result<Option<V>>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<V>>>,
    {
        loop {
            match self.lookup::<V>(key).await? {
                Lookup::Hit(value) => return Ok(Some(value)),
                Lookup::Negative if accept_negative => return Ok(None),
                _ => {}
            }

            let handle = match self.registry.acquire(key) {
                Acquired::Leader(guard) => {
                    return self.lead(guard, key, ttl, fallback, accept_negative).await
                }
                Acquired::Follower(handle) => handle,
            };

            debug!("Waiting on in-flight resolution of {}", key);
            return match handle.wait(self.config.lock_timeout).await {
                Ok(Some(bytes)) => {
                    self.stats.record_coalesced();
                    self.codec.decode(key, &bytes).map(Some)
                }
                Ok(None) if accept_negative => {
                    self.stats.record_coalesced();
                    Ok(None)
                }
                // The leader was an optional caller that found nothing;
                // go through acquire again so one waiter leads the next round.
                Ok(None) => continue,
                Err(err @ CacheError::LockTimeout { .. }) => {
                    self.stats.record_lock_timeout();
                    warn!("{}", err);
                    match self.config.on_lock_timeout {
                        LockTimeoutPolicy::Fail => Err(err),
                        LockTimeoutPolicy::RetryDirect => {
                            self.retry_direct(key, ttl, fallback, accept_negative).await
                        }
                    }
                }
                Err(err) => Err(err),
            };
        }
    }

    // == Leader Path ==
    async fn lead<V, F, Fut>(
        &self,
        guard: LeaderGuard,
        key: &str,
        ttl: Option<Duration>,
        fallback: F,
        accept_negative: bool,
    ) -> Result<Option<V>>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<V>>>,
    {
        // A previous leader may have written between our miss and acquire.
        match self.read_entry(key).await {
            Ok(Some(entry)) if !entry.is_negative || accept_negative => {
                let bytes = (!entry.is_negative).then_some(entry.value);
                let decoded = match &bytes {
                    Some(raw) => self.codec.decode(key, raw).map(Some),
                    None => Ok(None),
                };
                guard.complete(match &decoded {
                    Ok(_) => Ok(bytes),
                    Err(err) => Err(err.clone()),
                });
                return decoded;
            }
            Ok(_) => {}
            Err(err) => {
                guard.complete(Err(err.clone()));
                return Err(err);
            }
        }

        let limit = self.config.max_resolution;
        let produced = tokio::time::timeout(limit, guard.scope(self.produce(key, ttl, fallback)))
            .await
            .unwrap_or_else(|_| {
                Err(CacheError::ResolutionTimeout {
                    key: key.to_string(),
                    limit,
                })
            });

        match produced {
            Ok(produced) => {
                guard.complete(Ok(produced.bytes.clone()));
                self.finish(key, produced)
            }
            Err(err) => {
                guard.complete(Err(err.clone()));
                Err(err)
            }
        }
    }

    /// Re-attempts a timed-out follower's cycle without waiting again.
    async fn retry_direct<V, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fallback: F,
        accept_negative: bool,
    ) -> Result<Option<V>>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<V>>>,
    {
        match self.lookup::<V>(key).await? {
            Lookup::Hit(value) => return Ok(Some(value)),
            Lookup::Negative if accept_negative => return Ok(None),
            _ => {}
        }

        match self.registry.acquire(key) {
            Acquired::Leader(guard) => self.lead(guard, key, ttl, fallback, accept_negative).await,
            Acquired::Follower(_) => {
                warn!("{} still in flight, computing directly", key);
                self.compute_direct(key, ttl, fallback).await
            }
        }
    }

    /// Runs the fallback outside the registry, bounded by `max_resolution`.
    async fn compute_direct<V, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fallback: F,
    ) -> Result<Option<V>>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<V>>>,
    {
        let limit = self.config.max_resolution;
        let produced = tokio::time::timeout(limit, self.produce(key, ttl, fallback))
            .await
            .map_err(|_| CacheError::ResolutionTimeout {
                key: key.to_string(),
                limit,
            })??;
        self.finish(key, produced)
    }

    /// Runs the fallback, encodes the result and writes it.
    ///
    /// Write failures are captured rather than returned: the computed value
    /// is correct whether or not it was cached.
    async fn produce<V, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fallback: F,
    ) -> Result<Produced<V>>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<V>>>,
    {
        self.stats.record_fallback();
        let value = fallback().await.map_err(CacheError::fallback)?;
        let now = self.clock.now();

        let (bytes, entry) = match &value {
            Some(v) => {
                let bytes = self.codec.encode(v)?;
                let entry = CacheEntry::new(bytes.clone(), self.effective_ttl(ttl), now);
                (Some(bytes), Some(entry))
            }
            None => (
                None,
                self.config
                    .negative_cache_ttl
                    .map(|neg| CacheEntry::negative(Some(neg), now)),
            ),
        };

        let write_error = match entry {
            Some(entry) => self.adapter.set(key, entry).await.err(),
            None => None,
        };

        Ok(Produced {
            value,
            bytes,
            write_error,
        })
    }

    fn finish<V>(&self, key: &str, produced: Produced<V>) -> Result<Option<V>> {
        match produced.write_error {
            None => Ok(produced.value),
            Some(err) => {
                self.stats.record_write_error();
                if self.config.best_effort_writes {
                    warn!("Failed to cache {}: {}", key, err);
                    Ok(produced.value)
                } else {
                    Err(err)
                }
            }
        }
    }

    // == Reads ==
    /// Reads the live entry, applying fail-open and the read-time expiry check.
    async fn read_entry(&self, key: &str) -> Result<Option<CacheEntry>> {
        let entry = match self.adapter.get(key).await {
            Ok(entry) => entry,
            Err(err) if err.is_backend() && self.config.fail_open_reads => {
                self.stats.record_read_error();
                warn!(
                    "{} read of {} failed, treating as miss: {}",
                    self.adapter.backend_type(),
                    key,
                    err
                );
                None
            }
            Err(err) => return Err(err),
        };
        let now = self.clock.now();
        Ok(entry.filter(|e| !e.is_expired_at(now)))
    }

    async fn lookup<V: DeserializeOwned>(&self, key: &str) -> Result<Lookup<V>> {
        let entry = self.read_entry(key).await?;
        self.classify(key, entry)
    }

    fn classify<V: DeserializeOwned>(
        &self,
        key: &str,
        entry: Option<CacheEntry>,
    ) -> Result<Lookup<V>> {
        match entry {
            None => {
                self.stats.record_miss();
                debug!("Cache miss: {}", key);
                Ok(Lookup::Miss)
            }
            Some(entry) if entry.is_negative => {
                self.stats.record_negative_hit();
                debug!("Negative hit: {}", key);
                Ok(Lookup::Negative)
            }
            Some(entry) => {
                self.stats.record_hit();
                debug!("Cache hit: {}", key);
                self.codec.decode(key, &entry.value).map(Lookup::Hit)
            }
        }
    }

    /// Returns the cached value, or None when absent, expired or negative.
    pub async fn get<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>> {
        Ok(match self.lookup(key).await? {
            Lookup::Hit(value) => Some(value),
            Lookup::Negative | Lookup::Miss => None,
        })
    }

    /// Fetches several keys, in order.
    pub async fn get_many<V: DeserializeOwned>(&self, keys: &[String]) -> Result<Vec<Option<V>>> {
        let entries = match self.adapter.get_many(keys).await {
            Ok(entries) => entries,
            Err(err) if err.is_backend() && self.config.fail_open_reads => {
                self.stats.record_read_error();
                warn!("bulk read failed, treating as misses: {}", err);
                vec![None; keys.len()]
            }
            Err(err) => return Err(err),
        };
        if entries.len() != keys.len() {
            return Err(CacheError::BackendUnavailable(format!(
                "{} bulk read returned {} entries for {} keys",
                self.adapter.backend_type(),
                entries.len(),
                keys.len()
            )));
        }

        let now = self.clock.now();
        keys.iter()
            .zip(entries)
            .map(|(key, entry)| {
                let entry = entry.filter(|e| !e.is_expired_at(now));
                Ok(match self.classify(key, entry)? {
                    Lookup::Hit(value) => Some(value),
                    Lookup::Negative | Lookup::Miss => None,
                })
            })
            .collect()
    }

    // == Writes ==
    /// Encodes and stores `value`, bypassing the lock registry.
    pub async fn set<V: Serialize>(
        &self,
        key: &str,
        value: &V,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let bytes = self.codec.encode(value)?;
        let entry = CacheEntry::new(bytes, self.effective_ttl(ttl), self.clock.now());
        self.adapter.set(key, entry).await
    }

    /// Stores several values with the same TTL.
    ///
    /// Everything is encoded before the first write, so an unencodable
    /// value leaves storage untouched.
    pub async fn set_many<V: Serialize>(
        &self,
        items: &[(String, V)],
        ttl: Option<Duration>,
    ) -> Result<()> {
        let ttl = self.effective_ttl(ttl);
        let now = self.clock.now();
        let encoded = items
            .iter()
            .map(|(key, value)| Ok((key, self.codec.encode(value)?)))
            .collect::<Result<Vec<_>>>()?;

        for (key, bytes) in encoded {
            self.adapter.set(key, CacheEntry::new(bytes, ttl, now)).await?;
        }
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.adapter.delete(key).await
    }

    pub async fn delete_many(&self, keys: &[String]) -> Result<usize> {
        self.adapter.delete_many(keys).await
    }

    /// True when a live, non-negative value is stored for `key`.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self
            .read_entry(key)
            .await?
            .is_some_and(|entry| !entry.is_negative))
    }

    /// Restarts `key`'s lifetime with a new TTL without rewriting its value.
    pub async fn touch(&self, key: &str, ttl: Option<Duration>) -> Result<bool> {
        self.adapter.touch(key, self.effective_ttl(ttl)).await
    }

    fn effective_ttl(&self, ttl: Option<Duration>) -> Option<Duration> {
        ttl.or(self.config.default_ttl)
    }
}
