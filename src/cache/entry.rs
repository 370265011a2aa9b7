//! Per-entity metrics cache entry.
//!
//! An entry owns the latest known series of one [`EntityKey`], the loading
//! flag and the handle of the retrieval cycle in flight. Subscribers are
//! notified on every transition; they never fetch anything themselves.

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::traits::{EntrySnapshot, MetricsStore, RetrievalSettings, UpstreamProvider};
use crate::error::MetricsError;
use crate::metrics::{
  changed_samples, merge_samples, reduce_samples, series_from_records, EntityKey, MetricRecord,
  MetricSample,
};
use crate::report::ErrorReporter;

/// Completes when the retrieval cycle it was obtained for has notified
/// subscribers and written fetched samples back. Dropping it does not cancel
/// the cycle.
pub type RetrievalHandle = Shared<BoxFuture<'static, ()>>;

/// Callback invoked with the entry state after every transition.
pub type Callback = Box<dyn Fn(&EntrySnapshot) + Send + Sync>;

/// Collaborators shared by every entry of a registry.
pub(crate) struct RetrievalContext<S, P> {
  pub(crate) store: Arc<S>,
  pub(crate) provider: Arc<P>,
  pub(crate) reporter: Arc<dyn ErrorReporter>,
  pub(crate) settings: RetrievalSettings,
}

/// State of an entry at a given version.
#[derive(Debug, Clone)]
struct Notification {
  version: u64,
  snapshot: EntrySnapshot,
}

struct EntryState {
  samples: Arc<[MetricSample]>,
  last_updated: Option<chrono::DateTime<Utc>>,
  incomplete: bool,
  in_flight: Option<RetrievalHandle>,
  /// Bumped on every transition
  version: u64,
}

impl EntryState {
  fn notification(&self) -> Notification {
    Notification {
      version: self.version,
      snapshot: EntrySnapshot {
        samples: Arc::clone(&self.samples),
        last_updated: self.last_updated,
        is_loading: self.in_flight.is_some(),
        incomplete: self.incomplete,
      },
    }
  }
}

struct Subscriber {
  active: AtomicBool,
  /// Version of the last state delivered; held while the callback runs
  delivered: Mutex<Option<u64>>,
  callback: Callback,
}

impl Subscriber {
  /// Invoke the callback unless unsubscribed or already past this version.
  fn deliver(&self, notification: &Notification) {
    if !self.active.load(Ordering::Acquire) {
      return;
    }

    let mut delivered = self
      .delivered
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    if delivered.is_some_and(|version| version >= notification.version) {
      return;
    }
    // Unsubscribed while waiting for another delivery to finish
    if !self.active.load(Ordering::Acquire) {
      return;
    }

    *delivered = Some(notification.version);
    let result = panic::catch_unwind(AssertUnwindSafe(|| (self.callback)(&notification.snapshot)));
    if result.is_err() {
      warn!(version = notification.version, "subscriber callback panicked");
    }
  }
}

type SubscriberList = Mutex<Vec<(u64, Arc<Subscriber>)>>;

/// Handle returned by [`CacheEntry::subscribe`].
///
/// Dropping the handle unsubscribes as well.
pub struct Subscription {
  id: u64,
  subscriber: Arc<Subscriber>,
  list: Weak<SubscriberList>,
}

impl Subscription {
  /// Stop receiving notifications. Safe to call from inside a callback.
  pub fn unsubscribe(&self) {
    self.subscriber.active.store(false, Ordering::Release);
    if let Some(list) = self.list.upgrade() {
      lock(&list).retain(|(id, _)| *id != self.id);
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.unsubscribe();
  }
}

/// Result of the fetch part of a cycle.
struct CycleOutcome {
  samples: Vec<MetricSample>,
  /// Live data was fetched, or persisted data was fresh enough
  refreshed: bool,
  incomplete: bool,
  write_back: Option<JoinHandle<()>>,
}

struct LiveFetch {
  samples: Vec<MetricSample>,
  incomplete: bool,
}

/// Long-lived holder of one entity's metrics.
///
/// Entries are only created by [`CacheRegistry`](super::CacheRegistry).
pub struct CacheEntry<S, P> {
  key: EntityKey,
  context: Arc<RetrievalContext<S, P>>,
  state: Mutex<EntryState>,
  subscribers: Arc<SubscriberList>,
  next_subscriber: AtomicU64,
}

impl<S: MetricsStore, P: UpstreamProvider> CacheEntry<S, P> {
  pub(crate) fn new(key: EntityKey, context: Arc<RetrievalContext<S, P>>) -> Self {
    Self {
      key,
      context,
      state: Mutex::new(EntryState {
        samples: Arc::from(Vec::new()),
        last_updated: None,
        incomplete: false,
        in_flight: None,
        version: 0,
      }),
      subscribers: Arc::new(Mutex::new(Vec::new())),
      next_subscriber: AtomicU64::new(0),
    }
  }

  /// Current state, without side effects.
  pub fn current_snapshot(&self) -> EntrySnapshot {
    lock(&self.state).notification().snapshot
  }

  /// Register `callback` for every future transition.
  ///
  /// The callback is invoked once right away with the current state so late
  /// subscribers never wait for a fetch to see existing data.
  pub fn subscribe(&self, callback: impl Fn(&EntrySnapshot) + Send + Sync + 'static) -> Subscription {
    let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
    let subscriber = Arc::new(Subscriber {
      active: AtomicBool::new(true),
      delivered: Mutex::new(None),
      callback: Box::new(callback),
    });

    lock(&self.subscribers).push((id, Arc::clone(&subscriber)));

    let current = lock(&self.state).notification();
    subscriber.deliver(&current);

    Subscription {
      id,
      subscriber,
      list: Arc::downgrade(&self.subscribers),
    }
  }

  #[allow(dead_code)]
  pub fn subscriber_count(&self) -> usize {
    lock(&self.subscribers).len()
  }

  /// Make sure the entry holds data, starting a retrieval cycle if needed.
  ///
  /// Joins the cycle in flight if there is one. Does nothing when a cycle
  /// completed within the staleness window. Must be called from within a
  /// Tokio runtime.
  pub fn ensure_loaded(self: &Arc<Self>) -> RetrievalHandle {
    let mut state = lock(&self.state);
    if let Some(handle) = &state.in_flight {
      return handle.clone();
    }

    let recent = state
      .last_updated
      .is_some_and(|at| Utc::now() - at < self.context.settings.stale_after);
    if recent {
      return futures::future::ready(()).boxed().shared();
    }

    self.start_cycle(&mut state)
  }

  /// Start a retrieval cycle even if the entry is up to date.
  ///
  /// Joins the cycle in flight if there is one.
  pub fn refresh(self: &Arc<Self>) -> RetrievalHandle {
    let mut state = lock(&self.state);
    if let Some(handle) = &state.in_flight {
      return handle.clone();
    }
    self.start_cycle(&mut state)
  }

  fn start_cycle(self: &Arc<Self>, state: &mut EntryState) -> RetrievalHandle {
    let entry = Arc::clone(self);
    let task = tokio::spawn(async move { entry.run_cycle().await });

    let key = self.key.clone();
    let handle = async move {
      if let Err(e) = task.await {
        warn!(%key, error = %e, "retrieval task ended abnormally");
      }
    }
    .boxed()
    .shared();

    state.in_flight = Some(handle.clone());
    state.version += 1;
    debug!(key = %self.key, version = state.version, "retrieval cycle started");

    handle
  }

  async fn run_cycle(self: Arc<Self>) {
    let mut guard = CycleGuard {
      entry: Arc::clone(&self),
      armed: true,
    };

    let (loading, previous, previous_incomplete) = {
      let state = lock(&self.state);
      (
        state.notification(),
        Arc::clone(&state.samples),
        state.incomplete,
      )
    };
    self.notify(&loading);

    let outcome = self.retrieve(&previous, previous_incomplete).await;

    let mut write_back = None;
    let finished = {
      let mut state = lock(&self.state);
      match outcome {
        Ok(outcome) => {
          state.samples = Arc::from(outcome.samples);
          state.incomplete = outcome.incomplete;
          if outcome.refreshed {
            state.last_updated = Some(Utc::now());
          }
          write_back = outcome.write_back;
        }
        Err(error) => self.context.reporter.report(&error),
      }
      state.in_flight = None;
      state.version += 1;
      guard.armed = false;
      state.notification()
    };

    info!(
      key = %self.key,
      samples = finished.snapshot.samples.len(),
      incomplete = finished.snapshot.incomplete,
      "retrieval cycle finished"
    );
    self.notify(&finished);

    if let Some(write) = write_back {
      if let Err(e) = write.await {
        warn!(key = %self.key, error = %e, "write-back task ended abnormally");
      }
    }
  }

  /// Read persisted data, fetch live data when stale, and merge.
  ///
  /// Errors leave the previous snapshot in place.
  async fn retrieve(
    &self,
    previous: &[MetricSample],
    previous_incomplete: bool,
  ) -> Result<CycleOutcome, MetricsError> {
    let records = self
      .context
      .store
      .query(&self.key.filter())
      .map_err(|e| MetricsError::StoreRead {
        key: self.key.to_string(),
        message: format!("{:#}", e),
      })?;
    let persisted = series_from_records(&self.key, &records);

    if self.is_fresh(&persisted) {
      debug!(key = %self.key, "persisted metrics are fresh");
      return Ok(CycleOutcome {
        samples: persisted,
        refreshed: true,
        incomplete: false,
        write_back: None,
      });
    }

    match self.fetch_live().await {
      Ok(live) => {
        let merged = merge_samples(&persisted, &live.samples);
        let write_back = self.persist(changed_samples(&persisted, &live.samples));
        Ok(CycleOutcome {
          samples: merged,
          refreshed: true,
          incomplete: live.incomplete,
          write_back,
        })
      }
      Err(error) => {
        // Fall back to persisted data without losing anything fetched earlier.
        warn!(key = %self.key, %error, "live fetch failed, keeping persisted metrics");
        self.context.reporter.report(&error);
        Ok(CycleOutcome {
          samples: merge_samples(&persisted, previous),
          refreshed: false,
          incomplete: previous_incomplete,
          write_back: None,
        })
      }
    }
  }

  fn is_fresh(&self, persisted: &[MetricSample]) -> bool {
    let now = Utc::now().timestamp();
    persisted
      .last()
      .is_some_and(|latest| now - latest.timestamp < self.context.settings.stale_after.num_seconds())
  }

  /// Page through the upstream provider until it runs out or the ceiling is hit.
  ///
  /// Any failure other than not-found discards every page fetched so far.
  async fn fetch_live(&self) -> Result<LiveFetch, MetricsError> {
    let settings = &self.context.settings;
    let mut fetched = Vec::new();
    let mut cursor = None;
    let mut pages = 0u32;

    loop {
      let page = match self
        .context
        .provider
        .fetch_page(&self.key, cursor, settings.credential.as_deref())
        .await
      {
        Ok(page) => page,
        Err(MetricsError::NotFound { .. }) => {
          debug!(key = %self.key, pages, "entity not found upstream, stopping pagination");
          break;
        }
        Err(error) => return Err(error),
      };

      pages += 1;
      fetched.extend(page.samples);

      match page.next_cursor {
        None => break,
        Some(_) if pages >= settings.max_pages => {
          self
            .context
            .reporter
            .report(&MetricsError::ExhaustedPagination {
              key: self.key.to_string(),
              pages,
            });
          return Ok(LiveFetch {
            samples: reduce_samples(fetched),
            incomplete: true,
          });
        }
        Some(next) => cursor = Some(next),
      }
    }

    Ok(LiveFetch {
      samples: reduce_samples(fetched),
      incomplete: false,
    })
  }

  /// Write new samples back to the store on the blocking pool.
  ///
  /// Failures are reported, never returned.
  fn persist(&self, samples: Vec<MetricSample>) -> Option<JoinHandle<()>> {
    if samples.is_empty() {
      return None;
    }

    let records: Vec<MetricRecord> = samples
      .iter()
      .map(|sample| MetricRecord::from_sample(&self.key, sample))
      .collect();
    let store = Arc::clone(&self.context.store);
    let reporter = Arc::clone(&self.context.reporter);
    let key = self.key.clone();

    Some(tokio::task::spawn_blocking(move || match store.write(&records) {
      Ok(()) => debug!(%key, records = records.len(), "persisted fetched metrics"),
      Err(e) => reporter.report(&MetricsError::PersistenceWrite {
        key: key.to_string(),
        message: format!("{:#}", e),
      }),
    }))
  }

  fn notify(&self, notification: &Notification) {
    // Deliver to a copy so callbacks may unsubscribe while we iterate.
    let subscribers: Vec<Arc<Subscriber>> = lock(&self.subscribers)
      .iter()
      .map(|(_, subscriber)| Arc::clone(subscriber))
      .collect();

    for subscriber in subscribers {
      subscriber.deliver(notification);
    }
  }
}

/// Ends the cycle in flight if its task unwinds before publishing a result.
struct CycleGuard<S: MetricsStore, P: UpstreamProvider> {
  entry: Arc<CacheEntry<S, P>>,
  armed: bool,
}

impl<S: MetricsStore, P: UpstreamProvider> Drop for CycleGuard<S, P> {
  fn drop(&mut self) {
    if !self.armed {
      return;
    }

    let aborted = {
      let mut state = lock(&self.entry.state);
      state.in_flight = None;
      state.version += 1;
      state.notification()
    };
    warn!(key = %self.entry.key, "retrieval cycle aborted, keeping previous snapshot");
    self.entry.notify(&aborted);
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
