mod app;
mod cache;
mod commands;
mod config;
mod diary;
mod event;
mod graphql;
mod logging;
mod network;
mod query;
mod render;
#[cfg(test)]
mod testing;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sitediary")]
#[command(about = "Offline-aware site diary client")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./sitediary.yaml, then $XDG_CONFIG_HOME/sitediary/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Treat the network as unavailable and serve cached data only
  #[arg(long)]
  offline: bool,

  /// Do not read or write the on-disk cache
  #[arg(long)]
  no_cache: bool,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  let _log_guard = logging::init()?;

  let options = app::AppOptions {
    offline: args.offline,
    no_cache: args.no_cache,
  };

  let app = app::App::new(config, options).await?;
  app.run(args.command).await?;

  Ok(())
}
