//! Organization timelines computed straight from the persisted store.

use color_eyre::Result;
use std::sync::Arc;
use tracing::debug;

use crate::cache::MetricsStore;

use super::aggregate::{
  day_over_day_delta, group_by_timestamp, latest_per_repository_day, sum_grouped_value,
  RecordField,
};
use super::types::{EntityKey, MetricRecord, RecordFilter, TimelinePoint};

/// Latest issue counts of one repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IssueSummary {
  pub open: u64,
  pub closed: u64,
  /// Open issues now minus open issues a day before the latest record
  pub open_change: i64,
  /// Same comparison for closed issues
  pub closed_change: i64,
  /// Timestamp of the latest record, if any
  pub recorded_at: Option<i64>,
}

/// Builds merged timelines from persisted records only.
///
/// Nothing is cached and nothing is fetched upstream; every call re-reads the
/// store.
pub struct OrganizationAggregator<S: MetricsStore> {
  store: Arc<S>,
}

impl<S: MetricsStore> OrganizationAggregator<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self { store }
  }

  /// Daily open-issue totals across every repository of `organization`.
  pub fn build_organization_timeline(&self, organization: &str) -> Result<Vec<TimelinePoint>> {
    let records = self.store.query(&RecordFilter::organization(organization))?;

    let per_repository: Vec<MetricRecord> = records
      .into_iter()
      .filter(|record| record.repository.is_some() && record.open_issues.is_some())
      .collect();
    let groups = group_by_timestamp(latest_per_repository_day(per_repository));
    let timeline = sum_grouped_value(&groups, RecordField::OpenIssues);

    debug!(organization, days = timeline.len(), "built organization timeline");
    Ok(timeline)
  }

  /// Latest open/closed issue counts of one repository and the open-issue change
  /// over the preceding day.
  pub fn repository_issue_summary(&self, key: &EntityKey) -> Result<IssueSummary> {
    let records: Vec<MetricRecord> = self
      .store
      .query(&key.filter())?
      .into_iter()
      .filter(|record| record.open_issues.is_some())
      .collect();

    let Some(latest) = records.last() else {
      return Ok(IssueSummary::default());
    };

    let change = |field: RecordField| {
      let series: Vec<TimelinePoint> = records
        .iter()
        .map(|record| TimelinePoint {
          timestamp: record.timestamp,
          value: field.value_of(record),
        })
        .collect();
      day_over_day_delta(&series, latest.timestamp)
    };

    Ok(IssueSummary {
      open: latest.open_issues.unwrap_or(0),
      closed: latest.closed_issues.unwrap_or(0),
      open_change: change(RecordField::OpenIssues),
      closed_change: change(RecordField::ClosedIssues),
      recorded_at: Some(latest.timestamp),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::testing::MemoryStore;

  fn issues(repository: Option<&str>, timestamp: i64, open: u64, closed: u64) -> MetricRecord {
    MetricRecord {
      organization: "supabase".into(),
      repository: repository.map(String::from),
      timestamp,
      open_issues: Some(open),
      closed_issues: Some(closed),
      star_count: None,
    }
  }

  fn aggregator(records: Vec<MetricRecord>) -> OrganizationAggregator<MemoryStore> {
    OrganizationAggregator::new(Arc::new(MemoryStore::with_records(records)))
  }

  #[test]
  fn test_organization_timeline_sums_per_day() {
    let aggregator = aggregator(vec![
      issues(Some("supabase"), 1_000, 3, 0),
      issues(Some("realtime"), 1_010, 4, 0),
      issues(Some("supabase"), 87_000, 2, 0),
      issues(None, 87_000, 500, 0),
    ]);

    let timeline = aggregator.build_organization_timeline("Supabase").unwrap();
    assert_eq!(
      timeline,
      vec![
        TimelinePoint {
          timestamp: 0,
          value: 7
        },
        TimelinePoint {
          timestamp: 86_400,
          value: 2
        },
      ]
    );
  }

  #[test]
  fn test_organization_timeline_ignores_star_rows() {
    let mut stars = issues(Some("supabase"), 1_000, 0, 0);
    stars.open_issues = None;
    stars.star_count = Some(10);

    let aggregator = aggregator(vec![stars]);
    assert!(aggregator
      .build_organization_timeline("supabase")
      .unwrap()
      .is_empty());
  }

  #[test]
  fn test_repository_issue_summary() {
    let aggregator = aggregator(vec![
      issues(Some("realtime"), 0, 10, 1),
      issues(Some("realtime"), 86_400, 15, 2),
      issues(Some("other"), 86_400, 99, 9),
    ]);

    let summary = aggregator
      .repository_issue_summary(&EntityKey::repository_in("supabase", "realtime"))
      .unwrap();
    assert_eq!(
      summary,
      IssueSummary {
        open: 15,
        closed: 2,
        open_change: 5,
        closed_change: 1,
        recorded_at: Some(86_400),
      }
    );
  }

  #[test]
  fn test_repository_issue_summary_without_records() {
    let aggregator = aggregator(Vec::new());
    let summary = aggregator
      .repository_issue_summary(&EntityKey::repository_in("supabase", "realtime"))
      .unwrap();
    assert_eq!(summary, IssueSummary::default());
  }
}
