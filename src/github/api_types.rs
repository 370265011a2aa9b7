//! Serde-deserializable types matching GitHub REST API responses.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Stargazer entry, as returned with the `star+json` media type.
#[derive(Debug, Deserialize)]
pub struct ApiStargazer {
  pub starred_at: DateTime<Utc>,
}

/// Search endpoint response; only the total is needed.
#[derive(Debug, Deserialize)]
pub struct ApiSearchResponse {
  pub total_count: u64,
}

/// Error body returned with non-success statuses.
#[derive(Debug, Default, Deserialize)]
pub struct ApiErrorBody {
  #[serde(default)]
  pub message: String,
}
