mod app;
mod cache;
mod commands;
mod config;
mod context;
mod db;
mod kv;
mod sync;
mod workout;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "fittracker")]
#[command(about = "Offline-first workout plan tracker")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/fittracker/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Start disconnected: changes are queued instead of mirrored
  #[arg(long, global = true)]
  offline: bool,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override connectivity if specified on command line
  let config = if args.offline {
    config::Config {
      start_offline: true,
      ..config
    }
  } else {
    config
  };

  let _guard = init_logging(&config)?;
  tracing::info!("Starting fittracker v{}", env!("CARGO_PKG_VERSION"));

  // Initialize and run the app
  let app = app::App::new(config).await?;
  app.run(args.command).await?;

  Ok(())
}

/// Log to a daily file under the data directory; stdout is reserved for output.
fn init_logging(config: &config::Config) -> Result<WorkerGuard> {
  let log_dir = config.data_dir()?.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&log_dir, "fittracker.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false),
    )
    .init();

  Ok(guard)
}
