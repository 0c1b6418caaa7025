//! Query cache: keyed entries, de-duplicated fetches, retry and invalidation.

use chrono::Utc;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::entry::{CacheEntry, FetchStatus};
use super::key::QueryKey;
use super::policy::{run_with_retry, FetchPolicy};
use super::storage::CacheStorage;
use crate::graphql::FetchError;
use crate::network::NetworkMonitor;

type SharedFetch = Shared<BoxFuture<'static, Result<Value, FetchError>>>;

struct InFlight {
  id: u64,
  result: SharedFetch,
  /// Newer data was written while this fetch ran; its result is not stored
  superseded: bool,
}

struct Slot {
  entry: CacheEntry,
  in_flight: Option<InFlight>,
  last_accessed: Instant,
  /// Live [`Observer`]s; an observed slot is never garbage collected
  observers: usize,
}

struct CacheInner {
  slots: Mutex<HashMap<QueryKey, Slot>>,
  storage: Arc<dyn CacheStorage>,
  network: NetworkMonitor,
  next_fetch_id: AtomicU64,
}

/// Process-wide query cache. Cheap to clone; clones share state.
///
/// The lock is never held across an await. Each fetch runs in its own task,
/// so a caller that goes away cannot leave an entry stuck in `Fetching`.
#[derive(Clone)]
pub struct QueryCache {
  inner: Arc<CacheInner>,
}

impl QueryCache {
  pub fn new(storage: Arc<dyn CacheStorage>, network: NetworkMonitor) -> Self {
    Self {
      inner: Arc::new(CacheInner {
        slots: Mutex::new(HashMap::new()),
        storage,
        network,
        next_fetch_id: AtomicU64::new(0),
      }),
    }
  }

  pub fn network(&self) -> &NetworkMonitor {
    &self.inner.network
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<QueryKey, Slot>> {
    self.inner.slots.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Look up an entry without fetching.
  pub fn read(&self, key: &QueryKey) -> Option<CacheEntry> {
    self.lock().get(key).map(|slot| slot.entry.clone())
  }

  /// Return the cached value for `key` if it is usable, otherwise fetch it.
  ///
  /// Concurrent calls for the same key share a single fetch. While offline,
  /// cached data is returned as-is regardless of age or `force`.
  pub async fn ensure_fresh<T, F, Fut>(
    &self,
    key: &QueryKey,
    fetcher: F,
    policy: FetchPolicy,
  ) -> Result<T, FetchError>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
  {
    let offline = self.inner.network.is_offline();

    let pending = {
      let mut slots = self.lock();
      let now = Instant::now();
      let slot = slots
        .entry(key.clone())
        .or_insert_with(|| self.hydrate(key, policy.stale_after));
      slot.last_accessed = now;
      slot.entry.stale_after = policy.stale_after;

      let running = slot
        .in_flight
        .as_ref()
        .map(|f| (f.superseded, f.result.clone()));

      if let Some((false, result)) = running {
        debug!("Joining in-flight fetch for {}", key);
        result
      } else {
        if let Some(data) = &slot.entry.data {
          let serve_cached = if offline {
            true
          } else if policy.force {
            false
          } else {
            policy.allow_stale || !slot.entry.is_stale_at(now)
          };
          if serve_cached {
            debug!("Serving {} from cache (offline={})", key, offline);
            return decode(data.clone());
          }
        }
        match running {
          // Data was set over a running fetch: join it rather than start a second
          Some((_, result)) => result,
          None => self.start_fetch(key, slot, fetcher, policy),
        }
      }
    };

    decode(pending.await?)
  }

  /// Spawn the fetch task for `slot` and register it as the in-flight fetch.
  fn start_fetch<T, F, Fut>(
    &self,
    key: &QueryKey,
    slot: &mut Slot,
    fetcher: F,
    policy: FetchPolicy,
  ) -> SharedFetch
  where
    T: Serialize + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
  {
    let id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
    let epoch = slot.entry.epoch;
    slot.entry.status = FetchStatus::Fetching;
    debug!("Fetching {} (fetch #{})", key, id);

    let cache = self.clone();
    let task_key = key.clone();
    let handle = tokio::spawn(async move {
      let network = cache.inner.network.clone();
      let label = format!("Fetch of {}", task_key);
      let attempt = run_with_retry(&policy.retry, &label, || network.is_offline(), || fetcher());

      let result = match AssertUnwindSafe(attempt).catch_unwind().await {
        Ok(Ok(data)) => serde_json::to_value(data)
          .map_err(|e| FetchError::Unexpected(format!("Failed to encode {}: {}", task_key, e))),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(FetchError::Unexpected(format!(
          "Fetcher for {} panicked",
          task_key
        ))),
      };

      cache.settle(&task_key, id, epoch, &result);
      result
    });

    let result = async move {
      handle
        .await
        .unwrap_or_else(|e| Err(FetchError::Unexpected(format!("Fetch task failed: {}", e))))
    }
    .boxed()
    .shared();

    slot.in_flight = Some(InFlight {
      id,
      result: result.clone(),
      superseded: false,
    });
    result
  }

  /// Apply a finished fetch to its entry in one step.
  fn settle(&self, key: &QueryKey, id: u64, epoch: u64, result: &Result<Value, FetchError>) {
    let persist = {
      let mut slots = self.lock();
      let Some(slot) = slots.get_mut(key) else {
        return;
      };
      if slot.in_flight.as_ref().map(|f| f.id) != Some(id) {
        debug!("Discarding superseded fetch #{} for {}", id, key);
        return;
      }
      if slot.in_flight.take().is_some_and(|f| f.superseded) {
        debug!("Fetch #{} for {} finished after newer data was set", id, key);
        if slot.entry.is_fetching() {
          slot.entry.status = FetchStatus::Success;
        }
        return;
      }

      match result {
        Ok(value) => {
          slot.entry.record_success(value.clone(), epoch);
          Some(value.clone())
        }
        Err(e) => {
          debug!("Fetch of {} failed: {}", key, e);
          slot.entry.record_failure(e.clone());
          None
        }
      }
    };

    if let Some(value) = persist {
      if let Err(e) = self.inner.storage.store(key, &value, Utc::now()) {
        warn!("Failed to persist {}: {}", key, e);
      }
    }
  }

  /// Build a slot for a key seen for the first time, from storage if possible.
  fn hydrate(&self, key: &QueryKey, stale_after: Duration) -> Slot {
    let mut entry = CacheEntry::new(stale_after);

    match self.inner.storage.load(key) {
      Ok(Some(stored)) => {
        let age = (Utc::now() - stored.cached_at)
          .to_std()
          .unwrap_or(Duration::ZERO);
        debug!("Hydrated {} from storage (age {:?})", key, age);
        entry.data = Some(stored.data);
        entry.status = FetchStatus::Success;
        entry.last_fetched_at = Instant::now().checked_sub(age);
        if !stored.invalidated {
          entry.fresh_epoch = Some(entry.epoch);
        }
      }
      Ok(None) => {}
      Err(e) => warn!("Failed to load {} from storage: {}", key, e),
    }

    Slot {
      entry,
      in_flight: None,
      last_accessed: Instant::now(),
      observers: 0,
    }
  }

  /// Mark every entry under `prefix` stale, keeping its data. Persisted
  /// results are marked too, so a later process refetches them. Returns how
  /// many in-memory entries were marked.
  pub fn invalidate(&self, prefix: &QueryKey) -> usize {
    let count = {
      let mut slots = self.lock();
      let mut count = 0;
      for (key, slot) in slots.iter_mut() {
        if key.starts_with(prefix) {
          slot.entry.epoch += 1;
          count += 1;
        }
      }
      count
    };

    match self.inner.storage.invalidate_prefix(prefix) {
      Ok(stored) => debug!("Invalidated {} entries ({} stored) under {}", count, stored, prefix),
      Err(e) => warn!("Failed to invalidate stored results under {}: {}", prefix, e),
    }
    count
  }

  /// Register interest in `key`, keeping its entry alive until the returned
  /// guard is dropped.
  pub fn observe(&self, key: &QueryKey, stale_after: Duration) -> Observer {
    let mut slots = self.lock();
    let slot = slots
      .entry(key.clone())
      .or_insert_with(|| self.hydrate(key, stale_after));
    slot.observers += 1;
    Observer {
      cache: self.clone(),
      key: key.clone(),
    }
  }

  /// Store `data` under `key` as a fresh successful result.
  pub fn set_data<T: Serialize>(&self, key: &QueryKey, data: &T, stale_after: Duration) -> Result<(), FetchError> {
    let value = serde_json::to_value(data)
      .map_err(|e| FetchError::Unexpected(format!("Failed to encode {}: {}", key, e)))?;

    {
      let mut slots = self.lock();
      let slot = slots
        .entry(key.clone())
        .or_insert_with(|| self.hydrate(key, stale_after));
      slot.entry.stale_after = stale_after;
      slot.last_accessed = Instant::now();
      let epoch = slot.entry.epoch;
      slot.entry.record_success(value.clone(), epoch);
      // A fetch still in flight stays joinable but must not overwrite this
      if let Some(in_flight) = &mut slot.in_flight {
        in_flight.superseded = true;
        slot.entry.status = FetchStatus::Fetching;
      }
    }

    if let Err(e) = self.inner.storage.store(key, &value, Utc::now()) {
      warn!("Failed to persist {}: {}", key, e);
    }
    Ok(())
  }

  /// Drop entries nobody observes that are idle and haven't been used for
  /// `idle_for`.
  pub fn collect_garbage(&self, idle_for: Duration) -> usize {
    let now = Instant::now();
    let mut slots = self.lock();
    let before = slots.len();
    slots.retain(|_, slot| {
      slot.observers > 0
        || slot.in_flight.is_some()
        || now.saturating_duration_since(slot.last_accessed) <= idle_for
    });
    let removed = before - slots.len();
    if removed > 0 {
      debug!("Garbage collected {} cache entries", removed);
    }
    removed
  }
}

/// Keeps an entry out of garbage collection while alive. The idle clock
/// starts when the last observer goes away.
pub struct Observer {
  cache: QueryCache,
  key: QueryKey,
}

impl Drop for Observer {
  fn drop(&mut self) {
    let mut slots = self.cache.lock();
    if let Some(slot) = slots.get_mut(&self.key) {
      slot.observers = slot.observers.saturating_sub(1);
      slot.last_accessed = Instant::now();
    }
  }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, FetchError> {
  serde_json::from_value(value).map_err(|e| FetchError::MalformedResponse(e.to_string()))
}
