//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use herdcache::storage::{CacheDocument, DocumentCollection, KvClient};
use herdcache::{CacheEntry, CacheError, Clock, ManualClock, Result, StorageAdapter};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herdcache=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

// == Fake Key-Value Server ==
/// In-memory stand-in for a key-value server.
///
/// Keys past their server expiry behave as absent for every command, the
/// way a real server's lazy expiry does.
#[derive(Default)]
pub struct FakeKvServer {
    data: Mutex<HashMap<String, (Vec<u8>, Option<DateTime<Utc>>)>>,
    clock: ManualClock,
    pub down: AtomicBool,
    pub latency: Mutex<Option<Duration>>,
    pub commands: AtomicUsize,
    /// Drops the key right after the next GET returns it
    pub lapse_after_get: AtomicBool,
}

type Slots = HashMap<String, (Vec<u8>, Option<DateTime<Utc>>)>;

impl FakeKvServer {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            ..Self::default()
        }
    }

    /// Locks the keyspace after reclaiming expired keys.
    fn live(&self) -> std::sync::MutexGuard<'_, Slots> {
        let now = self.clock.now();
        let mut data = self.data.lock().unwrap();
        data.retain(|_, (_, expiry)| expiry.map_or(true, |at| now < at));
        data
    }

    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.live().get(key).map(|(v, _)| v.clone())
    }

    pub fn native_expiry(&self, key: &str) -> Option<DateTime<Utc>> {
        self.live().get(key).and_then(|(_, exp)| *exp)
    }

    async fn command(&self) -> Result<()> {
        self.commands.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(CacheError::BackendUnavailable("connection refused".into()));
        }
        Ok(())
    }

    fn deadline(&self, ttl: Duration) -> DateTime<Utc> {
        self.clock.now() + chrono::Duration::from_std(ttl).unwrap()
    }
}

#[async_trait]
impl KvClient for FakeKvServer {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.command().await?;
        let mut data = self.live();
        let value = data.get(key).map(|(v, _)| Bytes::from(v.clone()));
        if self.lapse_after_get.swap(false, Ordering::SeqCst) {
            data.remove(key);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: Bytes, px: Option<Duration>) -> Result<()> {
        self.command().await?;
        let expiry = px.map(|ttl| self.deadline(ttl));
        self.live().insert(key.to_string(), (value.to_vec(), expiry));
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        self.command().await?;
        let mut data = self.live();
        Ok(keys.iter().filter(|k| data.remove(*k).is_some()).count() as u64)
    }

    async fn set_if_exists(&self, key: &str, value: Bytes, px: Option<Duration>) -> Result<bool> {
        self.command().await?;
        let expiry = px.map(|ttl| self.deadline(ttl));
        Ok(match self.live().get_mut(key) {
            Some(slot) => {
                *slot = (value.to_vec(), expiry);
                true
            }
            None => false,
        })
    }
}

// == Fake Document Collection ==
#[derive(Default)]
pub struct FakeCollection {
    docs: Mutex<HashMap<String, CacheDocument>>,
}

impl FakeCollection {
    pub fn document(&self, id: &str) -> Option<CacheDocument> {
        self.docs.lock().unwrap().get(id).cloned()
    }
}

#[async_trait]
impl DocumentCollection for FakeCollection {
    async fn find_by_id(&self, id: &str) -> Result<Option<CacheDocument>> {
        Ok(self.document(id))
    }

    async fn upsert(&self, doc: CacheDocument) -> Result<()> {
        self.docs.lock().unwrap().insert(doc.id.clone(), doc);
        Ok(())
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool> {
        Ok(self.docs.lock().unwrap().remove(id).is_some())
    }

    async fn update_expiry(
        &self,
        id: &str,
        created_at: DateTime<Utc>,
        ttl_ms: Option<u64>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        Ok(match self.docs.lock().unwrap().get_mut(id) {
            Some(doc) => {
                doc.created_at = created_at;
                doc.ttl_ms = ttl_ms;
                doc.expires_at = expires_at;
                true
            }
            None => false,
        })
    }
}

// == Fault Injection ==
/// Wraps an adapter and fails reads and/or writes on demand.
pub struct FlakyAdapter {
    inner: Arc<dyn StorageAdapter>,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    pub writes: AtomicUsize,
}

impl FlakyAdapter {
    pub fn new(inner: Arc<dyn StorageAdapter>) -> Self {
        Self {
            inner,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    fn check(flag: &AtomicBool) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            Err(CacheError::BackendUnavailable("injected failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StorageAdapter for FlakyAdapter {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Self::check(&self.fail_reads)?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.fail_writes)?;
        self.inner.set(key, entry).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Self::check(&self.fail_writes)?;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Self::check(&self.fail_reads)?;
        self.inner.exists(key).await
    }

    async fn touch(&self, key: &str, ttl: Option<Duration>) -> Result<bool> {
        Self::check(&self.fail_writes)?;
        self.inner.touch(key, ttl).await
    }

    fn backend_type(&self) -> &'static str {
        "flaky"
    }
}
