//! Log setup. Output goes to a daily rolling file so it never mixes with
//! what the CLI prints.

use color_eyre::eyre::eyre;
use color_eyre::Result;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the log filter, e.g. `sitediary=debug`.
pub const LOG_ENV: &str = "SITEDIARY_LOG";

pub fn log_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_local_dir().ok_or_else(|| eyre!("Could not determine data directory"))?;
  Ok(data_dir.join("sitediary").join("logs"))
}

/// Install the global subscriber. Keep the guard alive until exit or
/// buffered lines are lost.
pub fn init() -> Result<WorkerGuard> {
  let dir = log_dir()?;
  std::fs::create_dir_all(&dir)?;

  let appender = tracing_appender::rolling::daily(&dir, "sitediary.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
