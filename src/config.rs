use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::{RetrievalSettings, DEFAULT_MAX_PAGES, DEFAULT_STALE_HOURS};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub github: GithubConfig,
  #[serde(default)]
  pub metrics: MetricsConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubConfig {
  /// REST API root, override for GitHub Enterprise
  #[serde(default = "default_api_url")]
  pub api_url: String,
  /// Items per page for paginated endpoints (GitHub caps this at 100)
  #[serde(default = "default_per_page")]
  pub per_page: u32,
}

impl Default for GithubConfig {
  fn default() -> Self {
    Self {
      api_url: default_api_url(),
      per_page: default_per_page(),
    }
  }
}

fn default_api_url() -> String {
  "https://api.github.com".to_string()
}

fn default_per_page() -> u32 {
  100
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Persisted data younger than this is shown without asking GitHub
  #[serde(default = "default_stale_after_hours")]
  pub stale_after_hours: i64,
  /// Upper bound on pages fetched per refresh
  #[serde(default = "default_max_pages")]
  pub max_pages: u32,
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      stale_after_hours: default_stale_after_hours(),
      max_pages: default_max_pages(),
    }
  }
}

fn default_stale_after_hours() -> i64 {
  DEFAULT_STALE_HOURS
}

fn default_max_pages() -> u32 {
  DEFAULT_MAX_PAGES
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite database path (defaults to $XDG_DATA_HOME/repo-surf/metrics.db)
  pub path: Option<PathBuf>,
}

impl MetricsConfig {
  /// Retrieval settings carrying `credential` to the provider.
  pub fn retrieval_settings(&self, credential: Option<String>) -> RetrievalSettings {
    RetrievalSettings {
      stale_after: Duration::try_hours(self.stale_after_hours.max(0)).unwrap_or(Duration::MAX),
      max_pages: self.max_pages.max(1),
      credential,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./repo-surf.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/repo-surf/config.yaml
  ///
  /// Falls back to defaults when no file exists.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("repo-surf.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("repo-surf").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    // An empty document deserializes to unit, not an empty map.
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  /// Get the GitHub token from environment variables.
  ///
  /// Checks REPO_SURF_GITHUB_TOKEN first, then GITHUB_TOKEN as fallback.
  /// Requests are sent unauthenticated when neither is set.
  pub fn get_github_token() -> Option<String> {
    std::env::var("REPO_SURF_GITHUB_TOKEN")
      .or_else(|_| std::env::var("GITHUB_TOKEN"))
      .ok()
      .filter(|token| !token.trim().is_empty())
  }
}
