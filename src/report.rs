//! Sink for failures caught at the cache boundary.

use tracing::{error, warn};

use crate::error::MetricsError;

/// Receives every failure the cache layer swallows.
pub trait ErrorReporter: Send + Sync {
  fn report(&self, error: &MetricsError);
}

/// Reports errors through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
  fn report(&self, error: &MetricsError) {
    if error.is_recoverable() {
      warn!(%error, "metrics retrieval degraded");
    } else {
      error!(%error, transient = error.is_transient(), "metrics retrieval failed");
    }
  }
}
