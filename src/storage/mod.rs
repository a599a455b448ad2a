//! Storage Module
//!
//! The byte-level adapter contract every backend implements, and the
//! backends shipped with the crate.

mod document;
mod entry;
mod fs;
mod kv;
mod lru;
mod memory;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

pub use document::{CacheDocument, DocumentAdapter, DocumentCollection};
pub use entry::{timing_fields, CacheEntry, FRAME_HEADER_LEN, FRAME_TIMING_OFFSET};
pub use fs::FileAdapter;
pub use kv::{KvAdapter, KvClient};
pub use lru::RecencyOrder;
pub use memory::{MemoryAdapter, MemoryStore};

/// Raw storage operations against one physical store.
///
/// Implementations never return an expired entry from `get` and report
/// expired entries as absent from `exists` and `touch`, even when the
/// backend has not purged them yet. I/O failures are reported as
/// `CacheError::BackendUnavailable` or `CacheError::BackendTimeout`.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Fetches the live entry for `key`.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Upserts `entry`; its `ttl` governs expiry.
    async fn set(&self, key: &str, entry: CacheEntry) -> Result<()>;

    /// Removes `key`, returning true if a live entry was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Checks for a live entry.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Replaces the TTL of a live entry, restarting its lifetime now.
    async fn touch(&self, key: &str, ttl: Option<Duration>) -> Result<bool>;

    /// Fetches several keys, in order.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<CacheEntry>>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.get(key).await?);
        }
        Ok(out)
    }

    /// Removes several keys, returning how many live entries were removed.
    async fn delete_many(&self, keys: &[String]) -> Result<usize> {
        let mut removed = 0;
        for key in keys {
            if self.delete(key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Short backend name for logs.
    fn backend_type(&self) -> &'static str;
}
