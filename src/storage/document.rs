//! Document Store Backend Module
//!
//! Maps the adapter contract onto single-document operations of a
//! document database: find by id, upsert, delete by id, and a partial
//! update of the expiry fields. No query language is used.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{system_clock, Clock};
use crate::error::Result;
use crate::storage::{CacheEntry, StorageAdapter};

/// Document shape persisted per cache key.
///
/// `expires_at` is denormalized so the store can run its own TTL index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub value: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub ttl_ms: Option<u64>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub negative: bool,
}

impl CacheDocument {
    pub fn from_entry(id: &str, entry: &CacheEntry) -> Self {
        Self {
            id: id.to_string(),
            value: entry.value.to_vec(),
            created_at: entry.created_at,
            ttl_ms: entry.ttl.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            expires_at: entry.expires_at(),
            negative: entry.is_negative,
        }
    }

    pub fn into_entry(self) -> CacheEntry {
        CacheEntry {
            value: Bytes::from(self.value),
            created_at: self.created_at,
            ttl: self.ttl_ms.map(Duration::from_millis),
            is_negative: self.negative,
        }
    }
}

/// Single-collection operations a document database driver must provide.
#[async_trait]
pub trait DocumentCollection: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<CacheDocument>>;

    async fn upsert(&self, doc: CacheDocument) -> Result<()>;

    async fn delete_by_id(&self, id: &str) -> Result<bool>;

    /// Updates only the timing fields; false if the document is missing.
    async fn update_expiry(
        &self,
        id: &str,
        created_at: DateTime<Utc>,
        ttl_ms: Option<u64>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool>;
}

#[async_trait]
impl<T: DocumentCollection + ?Sized> DocumentCollection for Arc<T> {
    async fn find_by_id(&self, id: &str) -> Result<Option<CacheDocument>> {
        (**self).find_by_id(id).await
    }

    async fn upsert(&self, doc: CacheDocument) -> Result<()> {
        (**self).upsert(doc).await
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool> {
        (**self).delete_by_id(id).await
    }

    async fn update_expiry(
        &self,
        id: &str,
        created_at: DateTime<Utc>,
        ttl_ms: Option<u64>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        (**self)
            .update_expiry(id, created_at, ttl_ms, expires_at)
            .await
    }
}

/// Storage adapter for a document database collection.
pub struct DocumentAdapter<C> {
    collection: C,
    clock: Arc<dyn Clock>,
}

impl<C: DocumentCollection> DocumentAdapter<C> {
    pub fn new(collection: C) -> Self {
        Self {
            collection,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn collection(&self) -> &C {
        &self.collection
    }

    async fn live_document(&self, key: &str) -> Result<Option<CacheEntry>> {
        let entry = self
            .collection
            .find_by_id(key)
            .await?
            .map(CacheDocument::into_entry);
        Ok(entry.filter(|e| !e.is_expired_at(self.clock.now())))
    }
}

#[async_trait]
impl<C: DocumentCollection> StorageAdapter for DocumentAdapter<C> {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.live_document(key).await
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<()> {
        self.collection
            .upsert(CacheDocument::from_entry(key, &entry))
            .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let was_live = self.live_document(key).await?.is_some();
        let removed = self.collection.delete_by_id(key).await?;
        Ok(removed && was_live)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live_document(key).await?.is_some())
    }

    async fn touch(&self, key: &str, ttl: Option<Duration>) -> Result<bool> {
        let Some(entry) = self.live_document(key).await? else {
            return Ok(false);
        };
        let retimed = CacheDocument::from_entry(key, &entry.retimed(ttl, self.clock.now()));
        self.collection
            .update_expiry(key, retimed.created_at, retimed.ttl_ms, retimed.expires_at)
            .await
    }

    fn backend_type(&self) -> &'static str {
        "document"
    }
}
