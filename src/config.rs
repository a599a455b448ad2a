//! Configuration Module
//!
//! Cache behavior knobs, loadable from environment variables or any serde source.

use std::env;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{CacheError, Result};

// == Lock Timeout Policy ==
/// What a follower does when the leader does not finish within `lock_timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockTimeoutPolicy {
    /// Re-read storage and compute directly if the key is still unresolved
    RetryDirect,
    /// Surface `CacheError::LockTimeout` to the caller
    Fail,
}

impl LockTimeoutPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "retry-direct" | "retry_direct" => Some(Self::RetryDirect),
            "fail" => Some(Self::Fail),
            _ => None,
        }
    }
}

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied when a write does not specify one, None = never expire
    #[serde(with = "opt_secs")]
    pub default_ttl: Option<Duration>,
    /// TTL for negative markers, None = negative caching disabled
    #[serde(with = "opt_secs")]
    pub negative_cache_ttl: Option<Duration>,
    /// How long a follower waits for the leader
    #[serde(with = "millis")]
    pub lock_timeout: Duration,
    /// Follower behavior once `lock_timeout` elapses
    pub on_lock_timeout: LockTimeoutPolicy,
    /// Hard upper bound on one leader resolution (fallback plus write)
    #[serde(with = "millis")]
    pub max_resolution: Duration,
    /// Treat backend read failures as misses instead of errors
    pub fail_open_reads: bool,
    /// Log and swallow backend write failures after a successful fallback
    pub best_effort_writes: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Some(Duration::from_secs(300)),
            negative_cache_ttl: None,
            lock_timeout: Duration::from_secs(5),
            on_lock_timeout: LockTimeoutPolicy::Fail,
            max_resolution: Duration::from_secs(30),
            fail_open_reads: false,
            best_effort_writes: false,
        }
    }
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_DEFAULT_TTL` - Default TTL in seconds, 0 = never expire (default: 300)
    /// - `CACHE_NEGATIVE_TTL` - Negative marker TTL in seconds, 0 = disabled (default: 0)
    /// - `CACHE_LOCK_TIMEOUT_MS` - Follower wait in milliseconds (default: 5000)
    /// - `CACHE_ON_LOCK_TIMEOUT` - `retry-direct` or `fail` (default: fail)
    /// - `CACHE_MAX_RESOLUTION_MS` - Leader resolution limit in milliseconds (default: 30000)
    /// - `CACHE_FAIL_OPEN` - Treat read failures as misses (default: false)
    /// - `CACHE_BEST_EFFORT_WRITES` - Swallow write failures (default: false)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            default_ttl: env_parse::<u64>("CACHE_DEFAULT_TTL")
                .map(secs_or_disabled)
                .unwrap_or(defaults.default_ttl),
            negative_cache_ttl: env_parse::<u64>("CACHE_NEGATIVE_TTL")
                .map(secs_or_disabled)
                .unwrap_or(defaults.negative_cache_ttl),
            lock_timeout: env_parse::<u64>("CACHE_LOCK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            on_lock_timeout: env::var("CACHE_ON_LOCK_TIMEOUT")
                .ok()
                .and_then(|v| LockTimeoutPolicy::parse(&v))
                .unwrap_or(defaults.on_lock_timeout),
            max_resolution: env_parse::<u64>("CACHE_MAX_RESOLUTION_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_resolution),
            fail_open_reads: env_parse("CACHE_FAIL_OPEN").unwrap_or(defaults.fail_open_reads),
            best_effort_writes: env_parse("CACHE_BEST_EFFORT_WRITES")
                .unwrap_or(defaults.best_effort_writes),
        }
    }

    /// Set the default TTL.
    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Enable negative caching with the given TTL, or disable it with None.
    pub fn with_negative_cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.negative_cache_ttl = ttl;
        self
    }

    /// Set the follower wait limit.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the follower timeout policy.
    pub fn with_on_lock_timeout(mut self, policy: LockTimeoutPolicy) -> Self {
        self.on_lock_timeout = policy;
        self
    }

    /// Set the leader resolution limit.
    pub fn with_max_resolution(mut self, limit: Duration) -> Self {
        self.max_resolution = limit;
        self
    }

    /// Enable or disable fail-open reads.
    pub fn with_fail_open_reads(mut self, enabled: bool) -> Self {
        self.fail_open_reads = enabled;
        self
    }

    /// Enable or disable best-effort writes.
    pub fn with_best_effort_writes(mut self, enabled: bool) -> Self {
        self.best_effort_writes = enabled;
        self
    }

    // == Validate ==
    /// Rejects zero durations where they would make the cache unusable.
    pub fn validate(&self) -> Result<()> {
        if self.default_ttl == Some(Duration::ZERO) {
            return Err(CacheError::InvalidConfig(
                "default_ttl must be positive or None".to_string(),
            ));
        }
        if self.negative_cache_ttl == Some(Duration::ZERO) {
            return Err(CacheError::InvalidConfig(
                "negative_cache_ttl must be positive or None".to_string(),
            ));
        }
        if self.lock_timeout.is_zero() {
            return Err(CacheError::InvalidConfig(
                "lock_timeout must be positive".to_string(),
            ));
        }
        if self.max_resolution.is_zero() {
            return Err(CacheError::InvalidConfig(
                "max_resolution must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn secs_or_disabled(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

mod opt_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.and_then(super::secs_or_disabled))
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
