//! SQLite implementation of the persisted metrics store.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, Row};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use super::traits::MetricsStore;
use crate::metrics::{MetricRecord, RecordFilter};

/// SQLite-based metrics storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the store at `path`, or at the default location when `None`.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    match path {
      Some(path) => Self::open_at(path),
      None => Self::open_at(&Self::default_path()?),
    }
  }

  /// Open or create the store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create metrics directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open metrics database at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    debug!(path = %path.display(), "opened metrics store");
    Ok(storage)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("repo-surf").join("metrics.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(METRICS_SCHEMA)
      .map_err(|e| eyre!("Failed to run metrics migrations: {}", e))?;

    Ok(())
  }
}

/// Organization-wide rows use an empty repository name so the primary key
/// stays unique.
const METRICS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS metric_records (
    organization TEXT NOT NULL,
    repository TEXT NOT NULL DEFAULT '',
    timestamp INTEGER NOT NULL,
    open_issues INTEGER,
    closed_issues INTEGER,
    star_count INTEGER,
    PRIMARY KEY (organization, repository, timestamp)
);

CREATE INDEX IF NOT EXISTS idx_metric_records_time
    ON metric_records(organization, timestamp);
"#;

impl MetricsStore for SqliteStorage {
  fn query(&self, filter: &RecordFilter) -> Result<Vec<MetricRecord>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT organization, repository, timestamp, open_issues, closed_issues, star_count
         FROM metric_records
         WHERE organization = ?1 AND (?2 IS NULL OR repository = ?2)
         ORDER BY timestamp, repository",
      )
      .map_err(|e| eyre!("Failed to prepare metrics query: {}", e))?;

    let records = stmt
      .query_map(
        params![filter.organization, filter.repository],
        record_from_row,
      )
      .map_err(|e| eyre!("Failed to query metrics: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read metric record: {}", e))?;

    Ok(records)
  }

  fn write(&self, records: &[MetricRecord]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    {
      // Columns absent from a record keep their stored value.
      let mut stmt = tx
        .prepare(
          "INSERT INTO metric_records
             (organization, repository, timestamp, open_issues, closed_issues, star_count)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)
           ON CONFLICT (organization, repository, timestamp) DO UPDATE SET
             open_issues = COALESCE(excluded.open_issues, open_issues),
             closed_issues = COALESCE(excluded.closed_issues, closed_issues),
             star_count = COALESCE(excluded.star_count, star_count)",
        )
        .map_err(|e| eyre!("Failed to prepare metrics insert: {}", e))?;

      for record in records {
        stmt
          .execute(params![
            record.organization.to_lowercase(),
            record
              .repository
              .as_deref()
              .map(str::to_lowercase)
              .unwrap_or_default(),
            record.timestamp,
            to_column(record.open_issues),
            to_column(record.closed_issues),
            to_column(record.star_count),
          ])
          .map_err(|e| eyre!("Failed to store metric record: {}", e))?;
      }
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<MetricRecord> {
  let repository: String = row.get(1)?;
  Ok(MetricRecord {
    organization: row.get(0)?,
    repository: Some(repository).filter(|name| !name.is_empty()),
    timestamp: row.get(2)?,
    open_issues: from_column(row.get(3)?),
    closed_issues: from_column(row.get(4)?),
    star_count: from_column(row.get(5)?),
  })
}

fn to_column(value: Option<u64>) -> Option<i64> {
  value.map(|v| i64::try_from(v).unwrap_or(i64::MAX))
}

fn from_column(value: Option<i64>) -> Option<u64> {
  value.map(|v| u64::try_from(v).unwrap_or(0))
}
