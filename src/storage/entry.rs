//! Cache Entry Module
//!
//! Defines the stored entry with its TTL metadata, plus the framed byte
//! layout used by backends that can only hold a single blob per key.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};

use crate::error::{CacheError, Result};

// == Frame Layout ==
// magic (1) | flags (1) | created_at unix ms (i64 BE) | ttl ms (u64 BE, MAX = none) | value
const FRAME_MAGIC: u8 = 0xC7;
const FLAG_NEGATIVE: u8 = 0b0000_0001;
const NO_TTL: u64 = u64::MAX;

/// Length of the frame header preceding the value bytes.
pub const FRAME_HEADER_LEN: usize = 18;

/// Offset of the timing fields rewritten by `touch`.
pub const FRAME_TIMING_OFFSET: usize = 2;

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// The encoded value, empty for negative markers
    pub value: Bytes,
    /// When the entry was written or last touched
    pub created_at: DateTime<Utc>,
    /// Lifetime from `created_at`, None = no expiration
    pub ttl: Option<Duration>,
    /// Marks a cached "no value" result
    pub is_negative: bool,
}

impl CacheEntry {
    // == Constructors ==
    /// Creates a new entry holding `value`.
    pub fn new(value: Bytes, ttl: Option<Duration>, now: DateTime<Utc>) -> Self {
        Self {
            value,
            created_at: now,
            ttl,
            is_negative: false,
        }
    }

    /// Creates a negative marker recording that the key has no value.
    pub fn negative(ttl: Option<Duration>, now: DateTime<Utc>) -> Self {
        Self {
            value: Bytes::new(),
            created_at: now,
            ttl,
            is_negative: true,
        }
    }

    // == Expiry ==
    /// Absolute expiry time, None when the entry never expires.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.ttl.map(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|d| self.created_at.checked_add_signed(d))
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
    }

    /// Checks if the entry has expired at `now`.
    ///
    /// Boundary condition: expired once `now >= created_at + ttl`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(expires) => now >= expires,
            None => false,
        }
    }

    /// Returns the remaining TTL at `now`, or None if no expiration is set.
    ///
    /// Returns `Some(Duration::ZERO)` once expired.
    pub fn ttl_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at()
            .map(|expires| (expires - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// Restarts the entry's lifetime at `now` with a new TTL, keeping the value.
    pub fn retimed(mut self, ttl: Option<Duration>, now: DateTime<Utc>) -> Self {
        self.created_at = now;
        self.ttl = ttl;
        self
    }

    // == Framing ==
    /// Serializes the entry, header first.
    pub fn to_frame(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + self.value.len());
        buf.put_u8(FRAME_MAGIC);
        buf.put_u8(if self.is_negative { FLAG_NEGATIVE } else { 0 });
        buf.put_slice(&timing_fields(self.created_at, self.ttl));
        buf.put_slice(&self.value);
        buf.freeze()
    }

    /// Parses a frame produced by `to_frame`.
    pub fn from_frame(key: &str, frame: Bytes) -> Result<Self> {
        let corrupt = |reason: &str| CacheError::CorruptValue {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        if frame.len() < FRAME_HEADER_LEN {
            return Err(corrupt("frame shorter than header"));
        }

        let mut header = &frame[..FRAME_HEADER_LEN];
        if header.get_u8() != FRAME_MAGIC {
            return Err(corrupt("bad frame magic"));
        }
        let flags = header.get_u8();
        let created_ms = header.get_i64();
        let ttl_ms = header.get_u64();

        let created_at = Utc
            .timestamp_millis_opt(created_ms)
            .single()
            .ok_or_else(|| corrupt("created_at out of range"))?;
        let ttl = (ttl_ms != NO_TTL).then(|| Duration::from_millis(ttl_ms));

        Ok(Self {
            value: frame.slice(FRAME_HEADER_LEN..),
            created_at,
            ttl,
            is_negative: flags & FLAG_NEGATIVE != 0,
        })
    }
}

/// Encodes the created_at and ttl header fields.
pub fn timing_fields(created_at: DateTime<Utc>, ttl: Option<Duration>) -> [u8; 16] {
    let mut out = [0u8; 16];
    let ttl_ms = ttl
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(NO_TTL - 1))
        .unwrap_or(NO_TTL);
    out[..8].copy_from_slice(&created_at.timestamp_millis().to_be_bytes());
    out[8..].copy_from_slice(&ttl_ms.to_be_bytes());
    out
}
