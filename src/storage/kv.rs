//! Key-Value Backend Module
//!
//! Maps the adapter contract onto the command set of a remote key-value
//! server. Each value is stored as one framed blob (see `CacheEntry::to_frame`)
//! so the entry metadata travels with it; the server's own expiry is set
//! alongside so it can reclaim memory on its schedule.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::clock::{system_clock, Clock};
use crate::error::{CacheError, Result};
use crate::storage::{CacheEntry, StorageAdapter};

/// Commands a remote key-value driver must provide.
///
/// Semantics follow the usual server commands: `set` with `px` behaves like
/// `SET key value PX ms`, and `set_if_exists` behaves like `SET ... XX`: it
/// writes only when the key is still present and reports whether it did.
#[async_trait]
pub trait KvClient: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    async fn set(&self, key: &str, value: Bytes, px: Option<Duration>) -> Result<()>;

    async fn del(&self, keys: &[String]) -> Result<u64>;

    async fn set_if_exists(&self, key: &str, value: Bytes, px: Option<Duration>) -> Result<bool>;

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.get(key).await?);
        }
        Ok(out)
    }
}

#[async_trait]
impl<T: KvClient + ?Sized> KvClient for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Bytes, px: Option<Duration>) -> Result<()> {
        (**self).set(key, value, px).await
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        (**self).del(keys).await
    }

    async fn set_if_exists(&self, key: &str, value: Bytes, px: Option<Duration>) -> Result<bool> {
        (**self).set_if_exists(key, value, px).await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        (**self).mget(keys).await
    }
}

/// Storage adapter for a remote key-value server.
pub struct KvAdapter<C> {
    client: C,
    clock: Arc<dyn Clock>,
    key_prefix: Option<String>,
    op_timeout: Option<Duration>,
}

impl<C: KvClient> KvAdapter<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            clock: system_clock(),
            key_prefix: None,
            op_timeout: None,
        }
    }

    /// Namespaces every key as `{prefix}:{key}`.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Fails any single command that takes longer than `timeout`.
    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = Some(timeout);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    fn full_key(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{prefix}:{key}"),
            None => key.to_string(),
        }
    }

    async fn call<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        match self.op_timeout {
            Some(limit) => tokio::time::timeout(limit, op)
                .await
                .map_err(|_| CacheError::BackendTimeout(limit))?,
            None => op.await,
        }
    }

    /// Parses a fetched frame and applies the read-time expiry check.
    fn live_entry(&self, key: &str, frame: Option<Bytes>) -> Result<Option<CacheEntry>> {
        let Some(frame) = frame else {
            return Ok(None);
        };
        let entry = CacheEntry::from_frame(key, frame)?;
        if entry.is_expired_at(self.clock.now()) {
            debug!("kv entry {} expired but not yet reclaimed", key);
            return Ok(None);
        }
        Ok(Some(entry))
    }
}

#[async_trait]
impl<C: KvClient> StorageAdapter for KvAdapter<C> {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let full = self.full_key(key);
        let frame = self.call(self.client.get(&full)).await?;
        self.live_entry(key, frame)
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<()> {
        let full = self.full_key(key);
        // The server expiry is derived from the entry so both agree.
        let px = entry.ttl_remaining(self.clock.now());
        if px == Some(Duration::ZERO) {
            self.call(self.client.del(&[full])).await?;
            return Ok(());
        }
        self.call(self.client.set(&full, entry.to_frame(), px)).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let full = self.full_key(key);
        Ok(self.call(self.client.del(&[full])).await? > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn touch(&self, key: &str, ttl: Option<Duration>) -> Result<bool> {
        let Some(entry) = self.get(key).await? else {
            return Ok(false);
        };

        let full = self.full_key(key);
        if ttl == Some(Duration::ZERO) {
            self.call(self.client.del(&[full])).await?;
            return Ok(true);
        }

        // Rewrite the whole frame only if the key is still there, so a key
        // that lapsed since the read is never recreated.
        let retimed = entry.retimed(ttl, self.clock.now());
        self.call(self.client.set_if_exists(&full, retimed.to_frame(), ttl))
            .await
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<CacheEntry>>> {
        let full: Vec<String> = keys.iter().map(|k| self.full_key(k)).collect();
        let frames = self.call(self.client.mget(&full)).await?;
        if frames.len() != keys.len() {
            return Err(CacheError::BackendUnavailable(format!(
                "MGET returned {} values for {} keys",
                frames.len(),
                keys.len()
            )));
        }
        keys.iter()
            .zip(frames)
            .map(|(key, frame)| self.live_entry(key, frame))
            .collect()
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let full: Vec<String> = keys.iter().map(|k| self.full_key(k)).collect();
        let removed = self.call(self.client.del(&full)).await?;
        Ok(usize::try_from(removed).unwrap_or(usize::MAX))
    }

    fn backend_type(&self) -> &'static str {
        "kv"
    }
}
