use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{OperationKind, PolicyTable};
use crate::graphql::MAX_TIMEOUT;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub retry: RetryConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  /// Enables the weekly summary without reading the API key from the environment.
  #[serde(default)]
  pub summary_enabled: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// GraphQL endpoint, e.g. "http://localhost:8081/api/graphql"
  #[serde(default = "default_url")]
  pub url: String,
  /// Per-request timeout in milliseconds
  #[serde(default = "default_timeout_ms")]
  pub timeout_ms: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: default_url(),
      timeout_ms: default_timeout_ms(),
    }
  }
}

fn default_url() -> String {
  "http://localhost:8081/api/graphql".to_string()
}

fn default_timeout_ms() -> u64 {
  30_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Persist successful results to the on-disk cache
  #[serde(default = "default_true")]
  pub persist: bool,
  pub diaries_stale_secs: Option<u64>,
  pub summary_stale_secs: Option<u64>,
  /// Entries untouched for this long are dropped from memory
  #[serde(default = "default_gc_secs")]
  pub gc_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      persist: true,
      diaries_stale_secs: None,
      summary_stale_secs: None,
      gc_secs: default_gc_secs(),
    }
  }
}

fn default_true() -> bool {
  true
}

fn default_gc_secs() -> u64 {
  600
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetryConfig {
  pub base_delay_ms: Option<u64>,
  pub max_delay_ms: Option<u64>,
  pub reads: Option<u32>,
  pub summary: Option<u32>,
  pub create: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
  /// How often the reachability probe checks the endpoint
  #[serde(default = "default_probe_interval_ms")]
  pub probe_interval_ms: u64,
  #[serde(default = "default_probe_timeout_ms")]
  pub probe_timeout_ms: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      probe_interval_ms: default_probe_interval_ms(),
      probe_timeout_ms: default_probe_timeout_ms(),
    }
  }
}

fn default_probe_interval_ms() -> u64 {
  5_000
}

fn default_probe_timeout_ms() -> u64 {
  2_000
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./sitediary.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/sitediary/config.yaml
  ///
  /// Without any file the defaults are used.
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
    let local = PathBuf::from("sitediary.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("sitediary").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config = Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;
    config
      .validate()
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))?;
    Ok(config)
  }

  /// Reject durations the runtime cannot work with.
  fn validate(&self) -> Result<()> {
    let max_ms = MAX_TIMEOUT.as_millis() as u64;
    if self.api.timeout_ms == 0 || self.api.timeout_ms > max_ms {
      return Err(eyre!("api.timeout_ms must be between 1 and {}", max_ms));
    }
    if self.network.probe_interval_ms == 0 {
      return Err(eyre!("network.probe_interval_ms must be greater than 0"));
    }
    if self.network.probe_timeout_ms == 0 {
      return Err(eyre!("network.probe_timeout_ms must be greater than 0"));
    }
    Ok(())
  }

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    // An empty file deserializes to null, which means "all defaults".
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  /// Get the AI summary API key from environment variables.
  ///
  /// Checks SITEDIARY_OPENAI_API_KEY first, then OPENAI_API_KEY as fallback.
  pub fn get_summary_api_key() -> Option<String> {
    std::env::var("SITEDIARY_OPENAI_API_KEY")
      .or_else(|_| std::env::var("OPENAI_API_KEY"))
      .ok()
      .filter(|key| !key.trim().is_empty())
  }

  /// Whether the weekly summary capability is available.
  pub fn summary_capability(&self) -> bool {
    self
      .summary_enabled
      .unwrap_or_else(|| Self::get_summary_api_key().is_some())
  }

  /// Build the per-operation policy table, applying overrides from this config.
  pub fn policy_table(&self) -> PolicyTable {
    let mut table = PolicyTable::default();

    for kind in OperationKind::ALL {
      let policy = table.get_mut(kind);
      if let Some(ms) = self.retry.base_delay_ms {
        policy.retry.base_delay = Duration::from_millis(ms);
      }
      if let Some(ms) = self.retry.max_delay_ms {
        policy.retry.max_delay = Duration::from_millis(ms);
      }

      let (retries, stale_secs) = match kind {
        OperationKind::ReadList | OperationKind::ReadDetail => {
          (self.retry.reads, self.cache.diaries_stale_secs)
        }
        OperationKind::ReadSummary => (self.retry.summary, self.cache.summary_stale_secs),
        OperationKind::Create => (self.retry.create, None),
      };
      if let Some(retries) = retries {
        policy.retry.max_retries = retries;
      }
      if let Some(secs) = stale_secs {
        policy.stale_after = Duration::from_secs(secs);
      }
    }

    table
  }
}
