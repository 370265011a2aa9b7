//! In-memory collaborators for tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

use super::traits::{MetricsStore, Page, UpstreamProvider};
use crate::error::MetricsError;
use crate::metrics::{EntityKey, MetricRecord, MetricSample, RecordFilter};
use crate::report::ErrorReporter;

/// Store keeping records in a vector.
#[derive(Default)]
pub struct MemoryStore {
  records: Mutex<Vec<MetricRecord>>,
  writes: Mutex<Vec<MetricRecord>>,
  fail_reads: AtomicBool,
  panic_on_read: AtomicBool,
  fail_writes: AtomicBool,
}

impl MemoryStore {
  pub fn with_records(records: Vec<MetricRecord>) -> Self {
    Self {
      records: Mutex::new(records),
      ..Self::default()
    }
  }

  pub fn fail_reads(&self, fail: bool) {
    self.fail_reads.store(fail, Ordering::SeqCst);
  }

  pub fn panic_on_read(&self, panic: bool) {
    self.panic_on_read.store(panic, Ordering::SeqCst);
  }

  pub fn fail_writes(&self, fail: bool) {
    self.fail_writes.store(fail, Ordering::SeqCst);
  }

  /// Every record passed to a successful `write`.
  pub fn writes(&self) -> Vec<MetricRecord> {
    self.writes.lock().unwrap().clone()
  }
}

impl MetricsStore for MemoryStore {
  fn query(&self, filter: &RecordFilter) -> Result<Vec<MetricRecord>> {
    if self.panic_on_read.load(Ordering::SeqCst) {
      panic!("store crashed");
    }
    if self.fail_reads.load(Ordering::SeqCst) {
      return Err(eyre!("store unavailable"));
    }

    let mut records: Vec<MetricRecord> = self
      .records
      .lock()
      .unwrap()
      .iter()
      .filter(|record| record.organization == filter.organization)
      .filter(|record| filter.repository.is_none() || record.repository == filter.repository)
      .cloned()
      .collect();
    records.sort_by_key(|record| record.timestamp);
    Ok(records)
  }

  fn write(&self, records: &[MetricRecord]) -> Result<()> {
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(eyre!("disk full"));
    }

    self.records.lock().unwrap().extend_from_slice(records);
    self.writes.lock().unwrap().extend_from_slice(records);
    Ok(())
  }
}

/// Reporter remembering every error.
#[derive(Default)]
pub struct RecordingReporter {
  errors: Mutex<Vec<MetricsError>>,
}

impl RecordingReporter {
  pub fn errors(&self) -> Vec<MetricsError> {
    self.errors.lock().unwrap().clone()
  }
}

impl ErrorReporter for RecordingReporter {
  fn report(&self, error: &MetricsError) {
    self.errors.lock().unwrap().push(error.clone());
  }
}

/// Provider replaying a scripted sequence of responses.
///
/// Once the script runs out it answers with an empty last page, or, when
/// built with [`ScriptedProvider::endless`], with one sample and a next cursor
/// forever.
#[derive(Default)]
pub struct ScriptedProvider {
  script: Mutex<VecDeque<std::result::Result<Page, MetricsError>>>,
  cursors: Mutex<Vec<Option<u32>>>,
  calls: AtomicUsize,
  endless: bool,
  gate: Option<Notify>,
}

impl ScriptedProvider {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn endless() -> Self {
    Self {
      endless: true,
      ..Self::default()
    }
  }

  /// Append a response to the script.
  pub fn then(self, response: std::result::Result<Page, MetricsError>) -> Self {
    self.script.lock().unwrap().push_back(response);
    self
  }

  /// Hold the first fetch until [`ScriptedProvider::release`] is called.
  pub fn gated(mut self) -> Self {
    self.gate = Some(Notify::new());
    self
  }

  pub fn release(&self) {
    if let Some(gate) = &self.gate {
      gate.notify_one();
    }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn cursors(&self) -> Vec<Option<u32>> {
    self.cursors.lock().unwrap().clone()
  }
}

impl UpstreamProvider for ScriptedProvider {
  async fn fetch_page(
    &self,
    _key: &EntityKey,
    cursor: Option<u32>,
    _credential: Option<&str>,
  ) -> std::result::Result<Page, MetricsError> {
    let call = self.calls.fetch_add(1, Ordering::SeqCst);
    self.cursors.lock().unwrap().push(cursor);

    if call == 0 {
      if let Some(gate) = &self.gate {
        gate.notified().await;
      }
    }

    let scripted = self.script.lock().unwrap().pop_front();
    match scripted {
      Some(response) => response,
      None if self.endless => {
        let page = cursor.unwrap_or(1);
        Ok(Page {
          samples: vec![MetricSample::stars(i64::from(page) * 86_400, u64::from(page))],
          next_cursor: Some(page + 1),
        })
      }
      None => Ok(Page::default()),
    }
  }
}
