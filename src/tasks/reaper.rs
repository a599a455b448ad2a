//! Expiry Reaper Task
//!
//! Background task that periodically removes expired entries from backends
//! that do not reclaim them on their own.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::storage::{FileAdapter, MemoryAdapter};

/// Backends with an eager purge pass.
#[async_trait]
pub trait PurgeExpired: Send + Sync {
    /// Removes expired entries, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize>;
}

#[async_trait]
impl PurgeExpired for MemoryAdapter {
    async fn purge_expired(&self) -> Result<usize> {
        Ok(MemoryAdapter::purge_expired(self).await)
    }
}

#[async_trait]
impl PurgeExpired for FileAdapter {
    async fn purge_expired(&self) -> Result<usize> {
        FileAdapter::purge_expired(self).await
    }
}

/// Spawns a task that purges expired entries every `interval`.
///
/// Reads re-check expiry regardless, so the reaper only bounds how long
/// dead entries occupy memory or disk. Abort the returned handle to stop it.
///
/// # Example
/// ```ignore
/// let adapter = Arc::new(MemoryAdapter::new());
/// let reaper = spawn_reaper(adapter.clone(), Duration::from_secs(1));
/// // Later, during shutdown:
/// reaper.abort();
/// ```
pub fn spawn_reaper<P>(backend: Arc<P>, interval: Duration) -> JoinHandle<()>
where
    P: PurgeExpired + ?Sized + 'static,
{
    tokio::spawn(async move {
        info!("Starting expiry reaper with interval of {:?}", interval);

        loop {
            tokio::time::sleep(interval).await;

            match backend.purge_expired().await {
                Ok(0) => debug!("Reaper: no expired entries found"),
                Ok(removed) => info!("Reaper: removed {} expired entries", removed),
                Err(e) => warn!("Reaper pass failed: {}", e),
            }
        }
    })
}
