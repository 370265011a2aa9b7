//! Grouping and delta helpers over timestamped records.

use indexmap::IndexMap;

use super::types::{truncate_to_day, MetricRecord, MetricSample, TimelinePoint, DAY_SECONDS};

/// Anything carrying an epoch timestamp.
pub trait Timestamped {
  fn timestamp(&self) -> i64;
}

impl Timestamped for MetricRecord {
  fn timestamp(&self) -> i64 {
    self.timestamp
  }
}

impl Timestamped for MetricSample {
  fn timestamp(&self) -> i64 {
    self.timestamp
  }
}

impl Timestamped for TimelinePoint {
  fn timestamp(&self) -> i64 {
    self.timestamp
  }
}

/// Numeric column of a persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordField {
  OpenIssues,
  ClosedIssues,
}

impl RecordField {
  /// Value of this field in `record`, zero when absent.
  pub fn value_of(self, record: &MetricRecord) -> i64 {
    let value = match self {
      RecordField::OpenIssues => record.open_issues,
      RecordField::ClosedIssues => record.closed_issues,
    };
    value.map_or(0, |v| i64::try_from(v).unwrap_or(i64::MAX))
  }
}

/// Group items by timestamp.
///
/// Groups appear in order of first occurrence and keep insertion order within
/// themselves; nothing is sorted or deduplicated.
pub fn group_by_timestamp<T: Timestamped>(
  items: impl IntoIterator<Item = T>,
) -> IndexMap<i64, Vec<T>> {
  let mut groups: IndexMap<i64, Vec<T>> = IndexMap::new();
  for item in items {
    groups.entry(item.timestamp()).or_default().push(item);
  }
  groups
}

/// Sum `field` across each group, ascending by timestamp.
pub fn sum_grouped_value(
  groups: &IndexMap<i64, Vec<MetricRecord>>,
  field: RecordField,
) -> Vec<TimelinePoint> {
  let mut points: Vec<TimelinePoint> = groups
    .iter()
    .map(|(timestamp, records)| TimelinePoint {
      timestamp: *timestamp,
      value: records.iter().map(|record| field.value_of(record)).sum(),
    })
    .collect();
  points.sort_by_key(|point| point.timestamp);
  points
}

/// Change of `series` between `target` and the latest point at least one day earlier.
///
/// `series` must be ascending. The value at `target` is the latest point at or
/// before it. Returns 0 when either point is missing from the series.
pub fn day_over_day_delta(series: &[TimelinePoint], target: i64) -> i64 {
  let Some(current) = latest_at_or_before(series, target) else {
    return 0;
  };

  match latest_at_or_before(series, target - DAY_SECONDS) {
    Some(previous) => current.value - previous.value,
    None => 0,
  }
}

fn latest_at_or_before(series: &[TimelinePoint], timestamp: i64) -> Option<&TimelinePoint> {
  let end = series.partition_point(|point| point.timestamp <= timestamp);
  end.checked_sub(1).map(|index| &series[index])
}

/// Truncate record timestamps to days, keeping only the latest record of each
/// repository per day.
///
/// Input is expected in ascending timestamp order; output keeps that order.
pub fn latest_per_repository_day(records: Vec<MetricRecord>) -> Vec<MetricRecord> {
  let mut latest: IndexMap<(i64, Option<String>), MetricRecord> = IndexMap::new();

  for record in records {
    let day = truncate_to_day(record.timestamp);
    let slot = (day, record.repository.clone());
    latest.insert(
      slot,
      MetricRecord {
        timestamp: day,
        ..record
      },
    );
  }

  latest.into_values().collect()
}
