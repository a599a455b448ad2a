//! Background Tasks Module
//!
//! Contains background tasks that run alongside a cache backend.
//!
//! # Tasks
//! - Reaper: Removes expired entries at a configured interval

mod reaper;

pub use reaper::{spawn_reaper, PurgeExpired};
