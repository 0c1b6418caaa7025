//! Per-key cache entry state.

use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

use crate::graphql::FetchError;

/// Where an entry is in its fetch lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
  /// Never fetched
  Idle,
  /// A fetch is in flight
  Fetching,
  /// Last fetch succeeded
  Success,
  /// Last fetch failed; `data` may still hold an older result
  Error,
}

/// Snapshot of one cached query.
///
/// `Success` implies `data` is present and `error` is absent. `Error` implies
/// `error` is present while `data` keeps the last good value, if any.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub data: Option<Value>,
  pub status: FetchStatus,
  pub error: Option<FetchError>,
  pub last_fetched_at: Option<Instant>,
  pub stale_after: Duration,
  /// Bumped by every invalidation
  pub(crate) epoch: u64,
  /// Epoch at which the current data was fetched
  pub(crate) fresh_epoch: Option<u64>,
}

impl CacheEntry {
  pub(crate) fn new(stale_after: Duration) -> Self {
    Self {
      data: None,
      status: FetchStatus::Idle,
      error: None,
      last_fetched_at: None,
      stale_after,
      epoch: 0,
      fresh_epoch: None,
    }
  }

  pub fn is_fetching(&self) -> bool {
    self.status == FetchStatus::Fetching
  }

  /// Whether an invalidation happened after the current data was fetched.
  pub fn is_invalidated(&self) -> bool {
    self.fresh_epoch != Some(self.epoch)
  }

  /// Whether the data is older than its freshness window (or was invalidated).
  pub fn is_stale_at(&self, now: Instant) -> bool {
    match self.last_fetched_at {
      None => true,
      Some(at) => self.is_invalidated() || now.saturating_duration_since(at) > self.stale_after,
    }
  }

  pub fn is_stale(&self) -> bool {
    self.is_stale_at(Instant::now())
  }

  pub(crate) fn record_success(&mut self, data: Value, fetched_epoch: u64) {
    self.data = Some(data);
    self.status = FetchStatus::Success;
    self.error = None;
    self.last_fetched_at = Some(Instant::now());
    self.fresh_epoch = Some(fetched_epoch);
  }

  pub(crate) fn record_failure(&mut self, error: FetchError) {
    self.status = FetchStatus::Error;
    self.error = Some(error);
  }
}
