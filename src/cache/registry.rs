//! Process-wide mapping from entity key to cache entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use super::entry::{CacheEntry, RetrievalContext};
use super::traits::{MetricsStore, RetrievalSettings, UpstreamProvider};
use crate::metrics::EntityKey;
use crate::report::ErrorReporter;

/// Owns every [`CacheEntry`] of the process.
///
/// Entries are created on first request and live as long as the registry;
/// there is no eviction. Keys are normalized, so requests for the same entity
/// always reach the same entry and share its fetches.
pub struct CacheRegistry<S, P> {
  context: Arc<RetrievalContext<S, P>>,
  entries: Mutex<HashMap<EntityKey, Arc<CacheEntry<S, P>>>>,
}

impl<S: MetricsStore, P: UpstreamProvider> CacheRegistry<S, P> {
  pub fn new(
    store: Arc<S>,
    provider: Arc<P>,
    reporter: Arc<dyn ErrorReporter>,
    settings: RetrievalSettings,
  ) -> Self {
    Self {
      context: Arc::new(RetrievalContext {
        store,
        provider,
        reporter,
        settings,
      }),
      entries: Mutex::new(HashMap::new()),
    }
  }

  /// The entry for `key`, created empty if this is the first request.
  pub fn get_or_create(&self, key: &EntityKey) -> Arc<CacheEntry<S, P>> {
    let mut entries = self
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner);

    let entry = entries.entry(key.clone()).or_insert_with(|| {
      debug!(%key, "creating cache entry");
      Arc::new(CacheEntry::new(key.clone(), Arc::clone(&self.context)))
    });
    Arc::clone(entry)
  }

  #[allow(dead_code)]
  pub fn len(&self) -> usize {
    self
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  #[allow(dead_code)]
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
