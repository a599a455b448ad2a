//! Filesystem Backend Module
//!
//! Stores each key as one framed file under a base directory. File names
//! are xxh3 hashes of the key, fanned out into 256 subdirectories.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_128;

use crate::clock::{system_clock, Clock};
use crate::error::Result;
use crate::storage::{timing_fields, CacheEntry, StorageAdapter, FRAME_TIMING_OFFSET};

/// Storage adapter writing one file per key.
pub struct FileAdapter {
    base_path: PathBuf,
    clock: Arc<dyn Clock>,
    temp_seq: AtomicU64,
}

impl FileAdapter {
    /// Creates the adapter, creating `base_path` if needed.
    pub async fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;
        Ok(Self {
            base_path,
            clock: system_clock(),
            temp_seq: AtomicU64::new(0),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn file_path(&self, key: &str) -> PathBuf {
        let hash = format!("{:032x}", xxh3_128(key.as_bytes()));
        self.base_path.join(&hash[0..2]).join(hash)
    }

    async fn read_entry(&self, key: &str, path: &Path) -> Result<Option<CacheEntry>> {
        match fs::read(path).await {
            Ok(raw) => CacheEntry::from_frame(key, Bytes::from(raw)).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads the entry, lazily removing the file when it has expired.
    async fn live_entry(&self, key: &str) -> Result<Option<CacheEntry>> {
        let path = self.file_path(key);
        let Some(entry) = self.read_entry(key, &path).await? else {
            return Ok(None);
        };
        if entry.is_expired_at(self.clock.now()) {
            remove_quietly(&path).await?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    /// Removes every expired file under the base directory.
    pub async fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut removed = 0;

        let mut shards = fs::read_dir(&self.base_path).await?;
        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut files = fs::read_dir(shard.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let path = file.path();
                if path.extension().is_some_and(|ext| ext == "tmp") {
                    continue;
                }
                let label = path.display().to_string();
                match self.read_entry(&label, &path).await {
                    Ok(Some(entry)) if entry.is_expired_at(now) => {
                        remove_quietly(&path).await?;
                        removed += 1;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Skipping unreadable cache file {}: {}", label, e),
                }
            }
        }
        Ok(removed)
    }
}

async fn remove_quietly(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl StorageAdapter for FileAdapter {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.live_entry(key).await
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<()> {
        let path = self.file_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Atomic replace via a uniquely named temp file
        let seq = self.temp_seq.fetch_add(1, Ordering::Relaxed);
        let temp_path = path.with_extension(format!("{}.{seq}.tmp", std::process::id()));
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&entry.to_frame()).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        debug!("Wrote cache file for {}", key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let was_live = self.live_entry(key).await?.is_some();
        let removed = remove_quietly(&self.file_path(key)).await?;
        Ok(removed && was_live)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live_entry(key).await?.is_some())
    }

    async fn touch(&self, key: &str, ttl: Option<Duration>) -> Result<bool> {
        if self.live_entry(key).await?.is_none() {
            return Ok(false);
        }

        // Patch only the timing header in place
        let timing = timing_fields(self.clock.now(), ttl);
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .open(self.file_path(key))
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(FRAME_TIMING_OFFSET as u64)).await?;
        file.write_all(&timing).await?;
        file.sync_all().await?;
        Ok(true)
    }

    fn backend_type(&self) -> &'static str {
        "filesystem"
    }
}
