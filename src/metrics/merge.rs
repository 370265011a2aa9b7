//! Merging of sample series.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};

use super::aggregate::latest_per_repository_day;
use super::types::{EntityKey, MetricRecord, MetricSample, MetricValue};

/// Union two series by timestamp, with `fresh` overwriting `base` on collisions.
///
/// The result is ascending with unique timestamps whatever the input order.
pub fn merge_samples(base: &[MetricSample], fresh: &[MetricSample]) -> Vec<MetricSample> {
  let mut merged: BTreeMap<i64, MetricValue> = base
    .iter()
    .map(|sample| (sample.timestamp, sample.value))
    .collect();

  for sample in fresh {
    merged.insert(sample.timestamp, sample.value);
  }

  into_series(merged)
}

/// Collapse samples sharing a timestamp using [`MetricValue::reduce`], in input order.
pub fn reduce_samples(samples: impl IntoIterator<Item = MetricSample>) -> Vec<MetricSample> {
  let mut reduced: BTreeMap<i64, MetricValue> = BTreeMap::new();

  for sample in samples {
    match reduced.entry(sample.timestamp) {
      Entry::Vacant(slot) => {
        slot.insert(sample.value);
      }
      Entry::Occupied(mut slot) => {
        let combined = slot.get().reduce(sample.value);
        slot.insert(combined);
      }
    }
  }

  into_series(reduced)
}

/// Samples in `fresh` that are missing from, or differ in, `persisted`.
pub fn changed_samples(persisted: &[MetricSample], fresh: &[MetricSample]) -> Vec<MetricSample> {
  let known: HashMap<i64, MetricValue> = persisted
    .iter()
    .map(|sample| (sample.timestamp, sample.value))
    .collect();

  fresh
    .iter()
    .filter(|sample| known.get(&sample.timestamp) != Some(&sample.value))
    .copied()
    .collect()
}

/// Build the persisted series of `key` from store records.
///
/// A repository's series is its daily star history. An organization's series
/// is its daily issue counts: per-repository rows are summed per day (latest row
/// per repository and day), and organization-wide rows replace that sum on the
/// days they exist.
pub fn series_from_records(key: &EntityKey, records: &[MetricRecord]) -> Vec<MetricSample> {
  match key.repository() {
    Some(repository) => reduce_samples(
      records
        .iter()
        .filter(|record| record.repository.as_deref() == Some(repository))
        .filter_map(MetricRecord::star_sample),
    ),
    None => {
      let per_repository: Vec<MetricRecord> = records
        .iter()
        .filter(|record| record.repository.is_some())
        .cloned()
        .collect();
      let summed = reduce_samples(
        latest_per_repository_day(per_repository)
          .iter()
          .filter_map(MetricRecord::issue_sample),
      );

      // Whole-organization measurements of the same day are not additive.
      let direct: Vec<MetricSample> = records
        .iter()
        .filter(|record| record.repository.is_none())
        .filter_map(MetricRecord::issue_sample)
        .collect();

      merge_samples(&summed, &direct)
    }
  }
}

fn into_series(values: BTreeMap<i64, MetricValue>) -> Vec<MetricSample> {
  values
    .into_iter()
    .map(|(timestamp, value)| MetricSample { timestamp, value })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(repository: Option<&str>, timestamp: i64, open: u64, stars: Option<u64>) -> MetricRecord {
    MetricRecord {
      organization: "supabase".into(),
      repository: repository.map(String::from),
      timestamp,
      open_issues: Some(open),
      closed_issues: Some(0),
      star_count: stars,
    }
  }

  fn is_strictly_ascending(series: &[MetricSample]) -> bool {
    series.windows(2).all(|w| w[0].timestamp < w[1].timestamp)
  }

  #[test]
  fn test_fresh_values_win() {
    let persisted = vec![MetricSample::stars(0, 1), MetricSample::stars(86_400, 2)];
    let fresh = vec![MetricSample::stars(86_400, 5), MetricSample::stars(172_800, 6)];

    let merged = merge_samples(&persisted, &fresh);
    assert_eq!(
      merged,
      vec![
        MetricSample::stars(0, 1),
        MetricSample::stars(86_400, 5),
        MetricSample::stars(172_800, 6),
      ]
    );
  }

  #[test]
  fn test_merge_is_idempotent() {
    let persisted = vec![MetricSample::stars(0, 1), MetricSample::stars(86_400, 2)];
    let page = vec![MetricSample::stars(86_400, 3), MetricSample::stars(172_800, 4)];

    let once = merge_samples(&persisted, &page);
    let twice = merge_samples(&once, &page);
    assert_eq!(once, twice);
  }

  #[test]
  fn test_merge_sorts_unordered_input() {
    let persisted = vec![
      MetricSample::stars(172_800, 3),
      MetricSample::stars(0, 1),
      MetricSample::stars(0, 1),
    ];
    let fresh = vec![MetricSample::stars(86_400, 2), MetricSample::stars(0, 9)];

    for (base, top) in [(&persisted, &fresh), (&fresh, &persisted)] {
      let merged = merge_samples(base, top);
      assert!(is_strictly_ascending(&merged));
      assert_eq!(merged.len(), 3);
    }
  }

  #[test]
  fn test_changed_samples() {
    let persisted = vec![MetricSample::stars(0, 1), MetricSample::stars(86_400, 2)];
    let fresh = vec![
      MetricSample::stars(0, 1),
      MetricSample::stars(86_400, 3),
      MetricSample::stars(172_800, 4),
    ];

    assert_eq!(
      changed_samples(&persisted, &fresh),
      vec![MetricSample::stars(86_400, 3), MetricSample::stars(172_800, 4)]
    );
  }

  #[test]
  fn test_repository_series_uses_latest_star_count_per_day() {
    let key = EntityKey::repository_in("supabase", "realtime");
    let records = vec![
      record(Some("realtime"), 100, 0, Some(10)),
      record(Some("realtime"), 200, 0, Some(12)),
      record(Some("other"), 300, 0, Some(99)),
      record(Some("realtime"), 86_500, 0, None),
    ];

    assert_eq!(
      series_from_records(&key, &records),
      vec![MetricSample::stars(0, 12)]
    );
  }

  #[test]
  fn test_organization_series_sums_repositories() {
    let key = EntityKey::organization_wide("supabase");
    let records = vec![
      record(Some("a"), 100, 3, None),
      record(Some("b"), 200, 4, None),
      record(Some("a"), 86_500, 1, None),
      record(None, 172_900, 20, None),
      record(Some("a"), 172_800, 2, None),
    ];

    assert_eq!(
      series_from_records(&key, &records),
      vec![
        MetricSample::issues(0, 7, 0),
        MetricSample::issues(86_400, 1, 0),
        MetricSample::issues(172_800, 20, 0),
      ]
    );
  }
}
