//! Core metric types shared by the cache and aggregation layers.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

/// Length of one reporting period, in seconds.
pub const DAY_SECONDS: i64 = 86_400;

/// Truncate an epoch timestamp to the start of its UTC day.
pub fn truncate_to_day(timestamp: i64) -> i64 {
  timestamp.div_euclid(DAY_SECONDS) * DAY_SECONDS
}

/// Day timestamp for a point in time.
pub fn day_of(at: DateTime<Utc>) -> i64 {
  truncate_to_day(at.timestamp())
}

/// Measured value of a single sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricValue {
  /// Cumulative stargazer count of one repository
  Stars(u64),
  /// Issue counts, summed across repositories for organization series
  Issues { open: u64, closed: u64 },
}

impl MetricValue {
  /// Combine two values recorded at the same timestamp by different sources.
  ///
  /// Issue counts add up (per-repository counts rolled into a total), star
  /// counts are replaced by the later value.
  pub fn reduce(self, later: MetricValue) -> MetricValue {
    match (self, later) {
      (
        MetricValue::Issues { open, closed },
        MetricValue::Issues {
          open: later_open,
          closed: later_closed,
        },
      ) => MetricValue::Issues {
        open: open + later_open,
        closed: closed + later_closed,
      },
      (_, later) => later,
    }
  }
}

/// One timestamped measurement for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricSample {
  /// Epoch seconds, truncated to the reporting period
  pub timestamp: i64,
  pub value: MetricValue,
}

impl MetricSample {
  pub fn stars(timestamp: i64, count: u64) -> Self {
    Self {
      timestamp,
      value: MetricValue::Stars(count),
    }
  }

  pub fn issues(timestamp: i64, open: u64, closed: u64) -> Self {
    Self {
      timestamp,
      value: MetricValue::Issues { open, closed },
    }
  }
}

/// Identifies an organization (`repository == None`) or one of its repositories.
///
/// Names are trimmed and lowercased on construction so that keys for the same
/// logical entity always compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
  organization: String,
  repository: Option<String>,
}

impl EntityKey {
  pub fn new(organization: &str, repository: Option<&str>) -> Self {
    Self {
      organization: normalize_name(organization),
      repository: repository
        .map(normalize_name)
        .filter(|name| !name.is_empty()),
    }
  }

  pub fn organization_wide(organization: &str) -> Self {
    Self::new(organization, None)
  }

  #[allow(dead_code)]
  pub fn repository_in(organization: &str, repository: &str) -> Self {
    Self::new(organization, Some(repository))
  }

  pub fn organization(&self) -> &str {
    &self.organization
  }

  pub fn repository(&self) -> Option<&str> {
    self.repository.as_deref()
  }

  pub fn is_organization_wide(&self) -> bool {
    self.repository.is_none()
  }

  /// Store filter selecting every record relevant to this entity.
  pub fn filter(&self) -> RecordFilter {
    RecordFilter {
      organization: self.organization.clone(),
      repository: self.repository.clone(),
    }
  }
}

impl fmt::Display for EntityKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.repository {
      Some(repository) => write!(f, "{}/{}", self.organization, repository),
      None => f.write_str(&self.organization),
    }
  }
}

/// Error returned when parsing an `org` or `org/repo` string fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid entity '{0}', expected <organization> or <organization>/<repository>")]
pub struct ParseEntityKeyError(String);

impl FromStr for EntityKey {
  type Err = ParseEntityKeyError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut parts = s.trim().splitn(2, '/');
    let organization = parts.next().unwrap_or_default().trim();
    let repository = parts.next().map(str::trim);

    if organization.is_empty() || repository.is_some_and(|r| r.is_empty() || r.contains('/')) {
      return Err(ParseEntityKeyError(s.to_string()));
    }

    Ok(Self::new(organization, repository))
  }
}

fn normalize_name(name: &str) -> String {
  name.trim().to_lowercase()
}

/// Selects persisted records for an organization, optionally one repository.
///
/// With `repository == None` every record of the organization matches,
/// per-repository rows and organization-wide rows alike.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFilter {
  pub organization: String,
  pub repository: Option<String>,
}

impl RecordFilter {
  pub fn organization(organization: &str) -> Self {
    Self {
      organization: normalize_name(organization),
      repository: None,
    }
  }
}

/// A row of the persisted metrics store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricRecord {
  pub organization: String,
  /// `None` for organization-wide rows
  pub repository: Option<String>,
  /// Epoch seconds at which the row was recorded
  pub timestamp: i64,
  pub open_issues: Option<u64>,
  pub closed_issues: Option<u64>,
  pub star_count: Option<u64>,
}

impl MetricRecord {
  /// Record persisting `sample` for `key`.
  pub fn from_sample(key: &EntityKey, sample: &MetricSample) -> Self {
    let (open_issues, closed_issues, star_count) = match sample.value {
      MetricValue::Stars(count) => (None, None, Some(count)),
      MetricValue::Issues { open, closed } => (Some(open), Some(closed), None),
    };

    Self {
      organization: key.organization().to_string(),
      repository: key.repository().map(String::from),
      timestamp: sample.timestamp,
      open_issues,
      closed_issues,
      star_count,
    }
  }

  /// Star sample at day granularity, if this row carries a star count.
  pub fn star_sample(&self) -> Option<MetricSample> {
    self
      .star_count
      .map(|count| MetricSample::stars(truncate_to_day(self.timestamp), count))
  }

  /// Issue sample at day granularity, if this row carries issue counts.
  pub fn issue_sample(&self) -> Option<MetricSample> {
    self.open_issues.map(|open| {
      MetricSample::issues(
        truncate_to_day(self.timestamp),
        open,
        self.closed_issues.unwrap_or(0),
      )
    })
  }
}

/// A point on a rendered timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelinePoint {
  pub timestamp: i64,
  pub value: i64,
}
