//! Cache Module
//!
//! The façade application code talks to, and its statistics.

mod facade;
mod stats;

// Re-export public types
pub use facade::Cache;
pub use stats::{CacheStats, StatsSnapshot};
