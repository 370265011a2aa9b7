//! Metric samples, entity keys and the pure functions that combine them.

mod aggregate;
mod merge;
mod timeline;
mod types;

pub use aggregate::day_over_day_delta;
pub use merge::{changed_samples, merge_samples, reduce_samples, series_from_records};
pub use timeline::OrganizationAggregator;
pub use types::{
  day_of, EntityKey, MetricRecord, MetricSample, MetricValue, RecordFilter, TimelinePoint,
};
