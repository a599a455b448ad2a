//! Key Lock Registry
//!
//! Per-key single-flight arbitration. The first caller to miss on a key
//! becomes its leader; everyone else arriving while the leader runs
//! subscribes to a one-shot result channel and reuses the leader's outcome.
//!
//! Each key owns an independent slot in a sharded map, so resolutions of
//! unrelated keys never contend with each other. A leader publishes its
//! result exactly once: explicitly through [`LeaderGuard::complete`], or as
//! [`CacheError::ResolutionAborted`] when the guard is dropped unfinished
//! (cancelled task, panic, early return).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{CacheError, Result};

/// Outcome shared with followers: encoded value, `None` for "no value",
/// or the leader's failure.
pub type Resolution = Result<Option<Bytes>>;

tokio::task_local! {
    /// Keys the current task is resolving as leader.
    static HELD_KEYS: Vec<String>;
}

struct Flight {
    id: u64,
    tx: watch::Sender<Option<Resolution>>,
}

/// Result of [`KeyLockRegistry::acquire`].
pub enum Acquired {
    Leader(LeaderGuard),
    Follower(WaitHandle),
}

impl Acquired {
    pub fn is_leader(&self) -> bool {
        matches!(self, Acquired::Leader(_))
    }
}

// == Registry ==
/// Arena of in-flight resolutions keyed by cache key.
#[derive(Clone, Default)]
pub struct KeyLockRegistry {
    inflight: Arc<DashMap<String, Arc<Flight>>>,
    next_id: Arc<AtomicU64>,
}

impl KeyLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // == Acquire ==
    /// Makes the caller leader of `key`, or a follower of the current leader.
    ///
    /// Called from inside a leader scope for the same key (see
    /// [`LeaderGuard::scope`]), it returns a re-entrant leader guard instead
    /// of waiting on itself.
    pub fn acquire(&self, key: &str) -> Acquired {
        if holds_key(key) {
            debug!("re-entrant acquire for {}", key);
            return Acquired::Leader(LeaderGuard::reentrant(key));
        }

        match self.inflight.entry(key.to_string()) {
            Entry::Occupied(slot) => {
                let rx = slot.get().tx.subscribe();
                Acquired::Follower(WaitHandle {
                    key: key.to_string(),
                    rx,
                })
            }
            Entry::Vacant(slot) => {
                let (tx, _) = watch::channel(None);
                let flight = Arc::new(Flight {
                    id: self.next_id.fetch_add(1, Ordering::Relaxed),
                    tx,
                });
                slot.insert(flight.clone());
                Acquired::Leader(LeaderGuard {
                    key: key.to_string(),
                    owned: Some((self.inflight.clone(), flight)),
                })
            }
        }
    }

    /// Whether a resolution for `key` is in flight.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inflight.contains_key(key)
    }

    /// Number of keys currently being resolved.
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }
}

fn holds_key(key: &str) -> bool {
    HELD_KEYS
        .try_with(|held| held.iter().any(|k| k == key))
        .unwrap_or(false)
}

// == Leader Guard ==
/// Leadership over one key's resolution.
pub struct LeaderGuard {
    key: String,
    owned: Option<(Arc<DashMap<String, Arc<Flight>>>, Arc<Flight>)>,
}

impl LeaderGuard {
    fn reentrant(key: &str) -> Self {
        Self {
            key: key.to_string(),
            owned: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// True when nested inside an outer leader for the same key.
    pub fn is_reentrant(&self) -> bool {
        self.owned.is_none()
    }

    /// Runs `fut` with this key marked as held by the current task, so a
    /// nested `acquire` of the same key does not wait on itself.
    pub async fn scope<F: std::future::Future>(&self, fut: F) -> F::Output {
        let mut held = HELD_KEYS.try_with(Clone::clone).unwrap_or_default();
        held.push(self.key.clone());
        HELD_KEYS.scope(held, fut).await
    }

    // == Complete ==
    /// Clears the in-flight marker and broadcasts `resolution` to followers.
    pub fn complete(mut self, resolution: Resolution) {
        self.release(resolution);
    }

    fn release(&mut self, resolution: Resolution) {
        let Some((inflight, flight)) = self.owned.take() else {
            return;
        };
        // Clear first so callers arriving after this point read storage.
        inflight.remove_if(&self.key, |_, current| current.id == flight.id);
        let waiters = flight.tx.receiver_count();
        flight.tx.send_replace(Some(resolution));
        if waiters > 0 {
            debug!("released {} to {} waiter(s)", self.key, waiters);
        }
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        if self.owned.is_some() {
            warn!("leader for {} abandoned its resolution", self.key);
            let key = self.key.clone();
            self.release(Err(CacheError::ResolutionAborted { key }));
        }
    }
}

// == Wait Handle ==
/// A follower's subscription to the leader's result.
pub struct WaitHandle {
    key: String,
    rx: watch::Receiver<Option<Resolution>>,
}

impl WaitHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Waits for the leader's result for at most `timeout`.
    ///
    /// Timing out leaves the leader running.
    pub async fn wait(mut self, timeout: Duration) -> Resolution {
        let outcome = tokio::time::timeout(timeout, self.rx.wait_for(Option::is_some)).await;
        match outcome {
            Err(_) => Err(CacheError::LockTimeout {
                key: self.key.clone(),
                waited: timeout,
            }),
            Ok(Err(_)) => Err(CacheError::ResolutionAborted {
                key: self.key.clone(),
            }),
            Ok(Ok(seen)) => (*seen).clone().unwrap_or_else(|| {
                Err(CacheError::ResolutionAborted {
                    key: self.key.clone(),
                })
            }),
        }
    }
}
