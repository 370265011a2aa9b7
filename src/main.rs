mod app;
mod cache;
mod config;
mod error;
mod github;
mod metrics;
mod report;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::metrics::EntityKey;

#[derive(Parser, Debug)]
#[command(name = "repo-surf")]
#[command(about = "Star history and issue tracking for GitHub organizations")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/repo-surf/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Daily star history of a repository
  Stars {
    /// Repository as <organization>/<repository>
    repository: EntityKey,
    /// Ask GitHub even if stored data is recent
    #[arg(long)]
    refresh: bool,
  },
  /// Latest issue counts of a repository
  Issues {
    /// Repository as <organization>/<repository>
    repository: EntityKey,
  },
  /// Open-issue timeline across an organization
  Org {
    organization: String,
    /// Ask GitHub even if stored data is recent
    #[arg(long)]
    refresh: bool,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_logging()?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let app = app::App::new(config)?;

  match args.command {
    Command::Stars {
      repository,
      refresh,
    } => app.show_stars(&repository, refresh).await?,
    Command::Issues { repository } => {
      if repository.is_organization_wide() {
        return Err(eyre!("Expected <organization>/<repository>, got {}", repository));
      }
      app.show_repository_issues(&repository)?
    }
    Command::Org {
      organization,
      refresh,
    } => app.show_organization(&organization, refresh).await?,
  }

  Ok(())
}

/// Log to a daily file under the data directory, filtered by REPO_SURF_LOG.
fn init_logging() -> Result<WorkerGuard> {
  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("repo-surf")
    .join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&log_dir, "repo-surf.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_env("REPO_SURF_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
