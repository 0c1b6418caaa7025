//! Cache storage trait and SQLite implementation.
//!
//! Storage is a write-behind snapshot of successful results so a fresh process
//! has something to show while offline. The in-memory [`QueryCache`](super::QueryCache)
//! stays the source of truth.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::key::QueryKey;

/// A persisted query result.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
  pub data: Value,
  /// When the result was fetched from the network
  pub cached_at: DateTime<Utc>,
  /// Marked stale by an invalidation since it was stored
  pub invalidated: bool,
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Get the persisted result for a key.
  fn load(&self, key: &QueryKey) -> Result<Option<StoredEntry>>;

  /// Persist a successful result, replacing any previous one.
  fn store(&self, key: &QueryKey, data: &Value, cached_at: DateTime<Utc>) -> Result<()>;

  /// Mark every persisted result under `prefix` as stale, keeping its data.
  /// Returns how many rows were marked.
  fn invalidate_prefix(&self, prefix: &QueryKey) -> Result<usize>;
}

/// Storage implementation that doesn't cache anything.
/// Used when persistence is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn load(&self, _key: &QueryKey) -> Result<Option<StoredEntry>> {
    Ok(None) // Always miss
  }

  fn store(&self, _key: &QueryKey, _data: &Value, _cached_at: DateTime<Utc>) -> Result<()> {
    Ok(()) // Discard
  }

  fn invalidate_prefix(&self, _prefix: &QueryKey) -> Result<usize> {
    Ok(0)
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Create a new SQLite storage at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Create a new SQLite storage at the given path.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Create a storage that lives only as long as the process.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("sitediary").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS query_cache (
    query_hash TEXT PRIMARY KEY,
    query_key TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    invalidated INTEGER NOT NULL DEFAULT 0
);
"#;

impl CacheStorage for SqliteStorage {
  fn load(&self, key: &QueryKey) -> Result<Option<StoredEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(Vec<u8>, String, bool)> = conn
      .query_row(
        "SELECT data, cached_at, invalidated FROM query_cache WHERE query_hash = ?",
        params![key.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cached query {}: {}", key, e))?;

    match row {
      Some((data, cached_at_str, invalidated)) => {
        let data: Value = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize cached query {}: {}", key, e))?;
        let cached_at = parse_datetime(&cached_at_str)?;
        Ok(Some(StoredEntry {
          data,
          cached_at,
          invalidated,
        }))
      }
      None => Ok(None),
    }
  }

  fn store(&self, key: &QueryKey, data: &Value, cached_at: DateTime<Utc>) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let bytes =
      serde_json::to_vec(data).map_err(|e| eyre!("Failed to serialize query {}: {}", key, e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO query_cache (query_hash, query_key, data, cached_at, invalidated)
         VALUES (?, ?, ?, ?, 0)",
        params![key.cache_hash(), key.to_string(), bytes, cached_at.to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to store query {}: {}", key, e))?;

    Ok(())
  }

  fn invalidate_prefix(&self, prefix: &QueryKey) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // `query_key` holds the rendered key, e.g. ["siteDiaries","list"]. A row
    // is in the family if it equals the prefix or continues it with a comma.
    let exact = prefix.to_string();
    let family = format!("{},", exact.trim_end_matches(']'));
    let marked = if prefix.segments().is_empty() {
      conn.execute("UPDATE query_cache SET invalidated = 1", [])
    } else {
      conn.execute(
        "UPDATE query_cache SET invalidated = 1
         WHERE query_key = ?1 OR substr(query_key, 1, length(?2)) = ?2",
        params![exact, family],
      )
    }
    .map_err(|e| eyre!("Failed to invalidate {}: {}", prefix, e))?;

    Ok(marked)
  }
}

/// Parse a stored RFC 3339 timestamp.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
