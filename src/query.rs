//! Offline-aware query handle over the shared [`QueryCache`].
//!
//! A `Query<T>` owns no data itself: results live in the cache and the query
//! reads them back when rendering. It tracks its own pending fetch and the
//! connectivity it last saw, so it can refetch on reconnect.
//!
//! ```ignore
//! let mut query = api.site_diaries();
//! query.fetch();
//!
//! // In event loop tick
//! if query.poll() {
//!     render(&query.view());
//! }
//! ```

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::{FetchPolicy, FetchStatus, Observer, OperationPolicy, QueryCache, QueryKey};
use crate::graphql::FetchError;
use crate::network::{NetworkState, Subscription};

/// How a query is keyed and fetched
#[derive(Debug, Clone)]
pub struct QueryOptions {
  pub key: QueryKey,
  pub policy: OperationPolicy,
  /// A disabled query never fetches and never reports loading or errors
  pub enabled: bool,
  /// Also disabled while offline
  pub requires_network: bool,
}

impl QueryOptions {
  pub fn new(key: QueryKey, policy: OperationPolicy) -> Self {
    Self {
      key,
      policy,
      enabled: true,
      requires_network: false,
    }
  }

  pub fn enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  pub fn requires_network(mut self, requires: bool) -> Self {
    self.requires_network = requires;
    self
  }
}

/// What a caller renders from.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryView<T> {
  pub data: Option<T>,
  /// Fetching with nothing to show. Never true while offline.
  pub loading: bool,
  pub error: Option<FetchError>,
  /// Fetching in the background while showing older data
  pub is_refetching: bool,
  pub is_offline: bool,
  pub disabled: bool,
}

type FetcherFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, FetchError>> + Send + Sync>;

pub struct Query<T> {
  cache: QueryCache,
  options: QueryOptions,
  fetcher: FetcherFn<T>,
  receiver: Option<mpsc::UnboundedReceiver<Result<T, FetchError>>>,
  network_rx: mpsc::UnboundedReceiver<NetworkState>,
  _subscription: Subscription,
  _observer: Observer,
  was_offline: bool,
}

impl<T> Query<T>
where
  T: Serialize + DeserializeOwned + Send + 'static,
{
  /// Create a query. Nothing is fetched until [`fetch`](Self::fetch).
  ///
  /// Must be called from within a tokio runtime.
  pub fn new<F, Fut>(cache: QueryCache, options: QueryOptions, fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
  {
    let (tx, network_rx) = mpsc::unbounded_channel();
    let subscription = cache.network().subscribe(move |state| {
      let _ = tx.send(state);
    });
    let was_offline = cache.network().is_offline();
    let observer = cache.observe(&options.key, options.policy.stale_after);

    Self {
      cache,
      options,
      fetcher: Arc::new(move || -> BoxFuture<'static, Result<T, FetchError>> { Box::pin(fetcher()) }),
      receiver: None,
      network_rx,
      _subscription: subscription,
      _observer: observer,
      was_offline,
    }
  }

  pub fn is_offline(&self) -> bool {
    self.cache.network().is_offline()
  }

  pub fn is_enabled(&self) -> bool {
    self.options.enabled && !(self.options.requires_network && self.is_offline())
  }

  /// Whether a fetch started by this handle has not been collected yet.
  pub fn is_pending(&self) -> bool {
    self.receiver.is_some()
  }

  /// Load the query, serving the cache when it is fresh (or when offline).
  ///
  /// No-op when disabled or when a fetch is already pending.
  pub fn fetch(&mut self) {
    if !self.is_enabled() || self.receiver.is_some() {
      return;
    }
    self.start(false);
  }

  /// Fetch from the server even if cached data is fresh.
  ///
  /// Offline this does nothing; the cached data stays on display.
  pub fn refetch(&mut self) {
    if !self.is_enabled() {
      return;
    }
    if self.is_offline() {
      debug!("Skipping refetch of {} while offline", self.options.key);
      return;
    }
    self.start(true);
  }

  /// The user came back to the screen.
  pub fn on_focus(&mut self) {
    if !self.is_offline() {
      self.refetch();
    }
  }

  /// Collect connectivity changes and finished fetches.
  ///
  /// Returns `true` if anything a render depends on changed. Coming back
  /// online triggers a refetch. Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;

    let mut reconnected = false;
    while let Ok(state) = self.network_rx.try_recv() {
      let offline = state.is_offline();
      if offline != self.was_offline {
        changed = true;
        reconnected |= self.was_offline && !offline;
      }
      self.was_offline = offline;
    }
    if reconnected {
      info!("Back online, refetching {}", self.options.key);
      self.refetch();
    }

    if let Some(receiver) = &mut self.receiver {
      match receiver.try_recv() {
        Ok(_) | Err(mpsc::error::TryRecvError::Disconnected) => {
          self.receiver = None;
          changed = true;
        }
        Err(mpsc::error::TryRecvError::Empty) => {}
      }
    }

    changed
  }

  /// Wait for the pending fetch, if any, and return the resulting view.
  pub async fn settle(&mut self) -> QueryView<T> {
    if let Some(receiver) = &mut self.receiver {
      let _ = receiver.recv().await;
      self.receiver = None;
    }
    self.view()
  }

  /// Snapshot for rendering.
  pub fn view(&self) -> QueryView<T> {
    let is_offline = self.is_offline();
    let disabled = !self.is_enabled();
    let entry = self.cache.read(&self.options.key);

    let data = entry.as_ref().and_then(|e| e.data.clone()).and_then(|value| {
      serde_json::from_value(value)
        .map_err(|e| warn!("Cached data for {} no longer parses: {}", self.options.key, e))
        .ok()
    });
    let error = entry.as_ref().and_then(|e| e.error.clone());

    // A spawned fetch may not have reached the cache yet
    let in_progress = match &entry {
      Some(e) => e.is_fetching() || (self.receiver.is_some() && e.status == FetchStatus::Idle),
      None => self.receiver.is_some(),
    };
    let active = in_progress && !disabled && !is_offline;

    QueryView {
      loading: active && data.is_none(),
      is_refetching: active && data.is_some(),
      data,
      error,
      is_offline,
      disabled,
    }
  }

  fn start(&mut self, force: bool) {
    let (tx, rx) = mpsc::unbounded_channel();
    // Dropping an older receiver only stops us listening; the fetch itself
    // still settles into the cache.
    self.receiver = Some(rx);

    let cache = self.cache.clone();
    let key = self.options.key.clone();
    let fetcher = Arc::clone(&self.fetcher);
    let policy = FetchPolicy::from_operation(&self.options.policy)
      .allow_stale(self.is_offline())
      .force(force);

    tokio::spawn(async move {
      let result = cache.ensure_fresh(&key, move || fetcher(), policy).await;
      if let Err(e) = &result {
        debug!("Query {} failed: {}", key, e);
      }
      let _ = tx.send(result);
    });
  }
}

impl<T> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("key", &self.options.key)
      .field("pending", &self.receiver.is_some())
      .field("was_offline", &self.was_offline)
      .finish_non_exhaustive()
  }
}
