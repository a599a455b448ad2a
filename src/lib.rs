//! herdcache - A backend-agnostic cache with stampede protection
//!
//! Reads and writes typed values through one [`Cache`] while the bytes live
//! in memory, on disk, or in a remote key-value or document store. Concurrent
//! misses on the same key are coalesced so the fallback runs once.
//!
//! ```ignore
//! let cache = Cache::new(Arc::new(MemoryAdapter::new()), CacheConfig::default())?;
//! let user: User = cache
//!     .get_or_set("user:42", Some(Duration::from_secs(60)), || load_user(42))
//!     .await?;
//! ```

pub mod cache;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod key;
pub mod registry;
pub mod storage;
pub mod tasks;


pub use cache::{Cache, StatsSnapshot};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{BincodeCodec, Codec, JsonCodec};
pub use config::{CacheConfig, LockTimeoutPolicy};
pub use error::{CacheError, Result};
pub use key::{function_key, value_key};
pub use registry::{Acquired, KeyLockRegistry};
pub use storage::{CacheEntry, MemoryAdapter, StorageAdapter};
pub use tasks::spawn_reaper;
