//! Collaborator contracts and the state types handed to subscribers.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;

use crate::error::MetricsError;
use crate::metrics::{EntityKey, MetricRecord, MetricSample, RecordFilter};

/// Default staleness window: persisted data younger than this skips the live fetch.
pub const DEFAULT_STALE_HOURS: i64 = 24;

/// Default ceiling on upstream pages fetched in one retrieval cycle.
pub const DEFAULT_MAX_PAGES: u32 = 100;

/// Trait for persisted metric stores.
pub trait MetricsStore: Send + Sync + 'static {
  /// Records matching `filter`, ascending by timestamp.
  fn query(&self, filter: &RecordFilter) -> Result<Vec<MetricRecord>>;

  /// Upsert records.
  fn write(&self, records: &[MetricRecord]) -> Result<()>;
}

/// One page of upstream samples.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
  pub samples: Vec<MetricSample>,
  /// Cursor of the following page, `None` on the last page
  pub next_cursor: Option<u32>,
}

/// Paginated source of live metrics.
pub trait UpstreamProvider: Send + Sync + 'static {
  /// Fetch one page of samples for `key`, starting from the first page when
  /// `cursor` is `None`.
  ///
  /// Fails with [`MetricsError::NotFound`] when the entity does not exist, and
  /// with a transient kind on network or rate-limit failures.
  fn fetch_page(
    &self,
    key: &EntityKey,
    cursor: Option<u32>,
    credential: Option<&str>,
  ) -> impl Future<Output = std::result::Result<Page, MetricsError>> + Send;
}

/// Tunables of a retrieval cycle.
#[derive(Debug, Clone)]
pub struct RetrievalSettings {
  /// Persisted data younger than this is used without a live fetch
  pub stale_after: Duration,
  /// Upper bound on pages fetched per cycle
  pub max_pages: u32,
  /// Forwarded to the provider untouched
  pub credential: Option<String>,
}

impl Default for RetrievalSettings {
  fn default() -> Self {
    Self {
      stale_after: Duration::hours(DEFAULT_STALE_HOURS),
      max_pages: DEFAULT_MAX_PAGES,
      credential: None,
    }
  }
}

/// What subscribers observe of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySnapshot {
  /// Ascending by timestamp, unique timestamps
  pub samples: Arc<[MetricSample]>,
  /// When the last successful refresh completed
  pub last_updated: Option<DateTime<Utc>>,
  pub is_loading: bool,
  /// The last refresh hit the page ceiling
  pub incomplete: bool,
}

impl EntrySnapshot {
  pub fn latest(&self) -> Option<&MetricSample> {
    self.samples.last()
  }
}
