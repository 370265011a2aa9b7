//! Metrics retrieval and caching.
//!
//! This module provides the per-entity cache used by every consumer:
//! - A [`CacheRegistry`] hands out one shared entry per entity key
//! - Entries merge persisted history with live upstream pages
//! - Concurrent requests for the same entity join a single retrieval cycle
//! - Subscribers are notified of every loading/loaded transition

mod entry;
mod registry;
mod storage;
#[cfg(test)]
pub mod testing;
mod traits;

pub use registry::CacheRegistry;
pub use storage::SqliteStorage;
pub use traits::{
  EntrySnapshot, MetricsStore, Page, RetrievalSettings, UpstreamProvider, DEFAULT_MAX_PAGES,
  DEFAULT_STALE_HOURS,
};
