//! Error kinds surfaced by metrics retrieval.

use chrono::{DateTime, Utc};

/// Failures the cache layer distinguishes between.
///
/// None of these reach subscribers; they are handed to an
/// [`ErrorReporter`](crate::report::ErrorReporter) instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetricsError {
  /// Network failure or unexpected upstream response
  #[error("transient failure fetching {key}: {message}")]
  TransientFetch { key: String, message: String },

  /// Upstream refused the request until `reset_at`
  #[error("rate limited while fetching {key}")]
  RateLimited {
    key: String,
    reset_at: Option<DateTime<Utc>>,
  },

  /// The entity does not exist upstream (ends pagination, not a failure)
  #[error("{key} was not found upstream")]
  NotFound { key: String },

  #[error("failed to read persisted metrics for {key}: {message}")]
  StoreRead { key: String, message: String },

  /// Best-effort write-back failed; the in-memory snapshot is still valid
  #[error("failed to persist metrics for {key}: {message}")]
  PersistenceWrite { key: String, message: String },

  /// The page ceiling was reached; fetched history may be incomplete
  #[error("stopped fetching {key} after {pages} pages, history may be incomplete")]
  ExhaustedPagination { key: String, pages: u32 },
}

impl MetricsError {
  /// Whether a later retry could succeed (network and rate-limit failures).
  pub fn is_transient(&self) -> bool {
    matches!(
      self,
      MetricsError::TransientFetch { .. } | MetricsError::RateLimited { .. }
    )
  }

  /// Whether the error still leaves a usable result behind.
  pub fn is_recoverable(&self) -> bool {
    matches!(
      self,
      MetricsError::NotFound { .. }
        | MetricsError::PersistenceWrite { .. }
        | MetricsError::ExhaustedPagination { .. }
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_error_kinds() {
    let transient = MetricsError::TransientFetch {
      key: "supabase/realtime".into(),
      message: "connection reset".into(),
    };
    assert!(transient.is_transient());
    assert!(!transient.is_recoverable());

    let limited = MetricsError::RateLimited {
      key: "supabase".into(),
      reset_at: None,
    };
    assert!(limited.is_transient());

    let exhausted = MetricsError::ExhaustedPagination {
      key: "supabase/supabase".into(),
      pages: 100,
    };
    assert!(!exhausted.is_transient());
    assert!(exhausted.is_recoverable());
    assert_eq!(
      exhausted.to_string(),
      "stopped fetching supabase/supabase after 100 pages, history may be incomplete"
    );
  }
}
