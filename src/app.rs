use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::debug;

use crate::cache::{CacheRegistry, EntrySnapshot, SqliteStorage};
use crate::config::Config;
use crate::github::GithubClient;
use crate::metrics::{
  day_over_day_delta, EntityKey, MetricValue, OrganizationAggregator, TimelinePoint,
};
use crate::report::TracingReporter;

/// Main application state
pub struct App {
  /// Cache entries live as long as the app
  registry: CacheRegistry<SqliteStorage, GithubClient>,
  aggregator: OrganizationAggregator<SqliteStorage>,
  github: Arc<GithubClient>,
  credential: Option<String>,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let store = Arc::new(SqliteStorage::open(config.storage.path.as_deref())?);
    let github = Arc::new(GithubClient::new(&config.github)?);
    let credential = Config::get_github_token();
    if credential.is_none() {
      debug!("no GitHub token configured, requests are unauthenticated");
    }

    let registry = CacheRegistry::new(
      Arc::clone(&store),
      Arc::clone(&github),
      Arc::new(TracingReporter),
      config.metrics.retrieval_settings(credential.clone()),
    );

    Ok(Self {
      registry,
      aggregator: OrganizationAggregator::new(store),
      github,
      credential,
    })
  }

  /// Print the daily star history of a repository.
  pub async fn show_stars(&self, key: &EntityKey, refresh: bool) -> Result<()> {
    if key.is_organization_wide() {
      return Err(eyre!("Star history needs a repository, e.g. {}/<repository>", key));
    }

    let snapshot = self.load(key, refresh).await;

    println!("Star history of {}", key);
    print_updated(&snapshot);
    if snapshot.samples.is_empty() {
      println!("  No stars recorded yet.");
    }
    for sample in snapshot.samples.iter() {
      if let MetricValue::Stars(count) = sample.value {
        println!("  {}  {:>8}", format_day(sample.timestamp), count);
      }
    }
    Ok(())
  }

  /// Print the latest issue counts of a repository from persisted records.
  pub fn show_repository_issues(&self, key: &EntityKey) -> Result<()> {
    let summary = self.aggregator.repository_issue_summary(key)?;

    println!("Issues of {}", key);
    match summary.recorded_at {
      Some(at) => {
        println!("  Recorded   {}", format_day(at));
        println!("  Open       {:>8} ({:+} over the previous day)", summary.open, summary.open_change);
        println!("  Closed     {:>8} ({:+} over the previous day)", summary.closed, summary.closed_change);
      }
      None => println!("  Issues of {} are not being tracked at the moment.", key),
    }
    Ok(())
  }

  /// Print the open-issue timeline across an organization plus its live totals.
  pub async fn show_organization(&self, organization: &str, refresh: bool) -> Result<()> {
    let exists = self
      .github
      .organization_exists(organization, self.credential.as_deref())
      .await?;
    if !exists {
      return Err(eyre!("The organization {} cannot be found", organization));
    }

    let timeline = self.aggregator.build_organization_timeline(organization)?;
    println!("Open issues across {}", organization);
    print_timeline(&timeline);

    let key = EntityKey::organization_wide(organization);
    let snapshot = self.load(&key, refresh).await;
    if let Some(MetricValue::Issues { open, closed }) = snapshot.latest().map(|s| s.value) {
      println!();
      println!("Current totals: {} open, {} closed", open, closed);
      print_updated(&snapshot);
    }
    Ok(())
  }

  /// Bring the entry of `key` up to date and return its state.
  async fn load(&self, key: &EntityKey, refresh: bool) -> EntrySnapshot {
    let entry = self.registry.get_or_create(key);
    let _subscription = entry.subscribe(|snapshot| {
      debug!(
        samples = snapshot.samples.len(),
        loading = snapshot.is_loading,
        "entry updated"
      );
    });

    let cycle = if refresh {
      entry.refresh()
    } else {
      entry.ensure_loaded()
    };
    cycle.await;

    entry.current_snapshot()
  }
}

fn print_timeline(timeline: &[TimelinePoint]) {
  if timeline.is_empty() {
    println!("  No issues are being tracked at the moment.");
    return;
  }
  for point in timeline {
    let change = day_over_day_delta(timeline, point.timestamp);
    println!(
      "  {}  {:>8}  {:+}",
      format_day(point.timestamp),
      point.value,
      change
    );
  }
}

fn print_updated(snapshot: &EntrySnapshot) {
  match snapshot.last_updated {
    Some(at) => println!("  Last updated {}", at.format("%Y-%m-%d %H:%M UTC")),
    None => println!("  Not refreshed from GitHub; showing stored data"),
  }
  if snapshot.incomplete {
    println!("  History was cut short by the page limit and may be incomplete");
  }
}

fn format_day(timestamp: i64) -> String {
  DateTime::<Utc>::from_timestamp(timestamp, 0)
    .map(|at| at.format("%Y-%m-%d").to_string())
    .unwrap_or_else(|| timestamp.to_string())
}
