//! Network reachability monitor.
//!
//! A [`NetworkMonitor`] wraps one platform [`Connectivity`] source and fans its
//! updates out to any number of subscribers. The platform subscription is
//! started by the first subscriber and released when the last one leaves.

use color_eyre::{eyre::eyre, Result};
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

/// Connectivity as reported by the platform. `None` means "not known yet".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkState {
  pub is_connected: Option<bool>,
  pub is_internet_reachable: Option<bool>,
}

impl NetworkState {
  pub fn online() -> Self {
    Self {
      is_connected: Some(true),
      is_internet_reachable: Some(true),
    }
  }

  pub fn offline() -> Self {
    Self {
      is_connected: Some(false),
      is_internet_reachable: Some(false),
    }
  }

  /// Offline only when a signal is explicitly false; unknown counts as online.
  pub fn is_offline(&self) -> bool {
    self.is_connected == Some(false) || self.is_internet_reachable == Some(false)
  }
}

/// A platform connectivity signal.
pub trait Connectivity: Send + Sync + 'static {
  /// One-shot read of the current state.
  fn probe(&self) -> BoxFuture<'static, NetworkState>;

  /// Start a push subscription. Dropping the receiver ends it.
  fn listen(&self) -> mpsc::UnboundedReceiver<NetworkState>;
}

type Callback = Arc<dyn Fn(NetworkState) + Send + Sync>;

struct MonitorState {
  current: NetworkState,
  /// Whether `current` came from the active platform subscription
  probed: bool,
  next_id: u64,
  subscribers: Vec<(u64, Callback)>,
  pump: Option<JoinHandle<()>>,
}

struct Shared {
  source: Arc<dyn Connectivity>,
  state: Mutex<MonitorState>,
}

impl Shared {
  fn lock(&self) -> MutexGuard<'_, MonitorState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Process-wide network monitor. Cheap to clone.
#[derive(Clone)]
pub struct NetworkMonitor {
  shared: Arc<Shared>,
}

impl NetworkMonitor {
  pub fn new(source: impl Connectivity) -> Self {
    Self {
      shared: Arc::new(Shared {
        source: Arc::new(source),
        state: Mutex::new(MonitorState {
          current: NetworkState::default(),
          probed: false,
          next_id: 0,
          subscribers: Vec::new(),
          pump: None,
        }),
      }),
    }
  }

  /// Last known state.
  pub fn state(&self) -> NetworkState {
    self.shared.lock().current
  }

  pub fn is_offline(&self) -> bool {
    self.state().is_offline()
  }

  /// Register a callback for state updates.
  ///
  /// The callback receives the current state as soon as it is known (right
  /// away if the platform has already been probed) and then every update. Must
  /// be called from within a tokio runtime.
  pub fn subscribe<F>(&self, callback: F) -> Subscription
  where
    F: Fn(NetworkState) + Send + Sync + 'static,
  {
    let callback: Callback = Arc::new(callback);

    let (id, deliver_now) = {
      let mut state = self.shared.lock();
      let id = state.next_id;
      state.next_id += 1;
      state.subscribers.push((id, Arc::clone(&callback)));
      if state.pump.is_none() {
        state.pump = Some(self.start_pump());
      }
      (id, state.probed.then_some(state.current))
    };

    if let Some(current) = deliver_now {
      callback(current);
    }

    Subscription {
      shared: Arc::downgrade(&self.shared),
      id: Some(id),
    }
  }

  /// Wait until the monitor has a probed state. Subscribes internally for the
  /// duration of the call.
  pub async fn ready(&self) -> NetworkState {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = self.subscribe(move |state| {
      let _ = tx.send(state);
    });
    rx.recv().await.unwrap_or_else(|| self.state())
  }

  fn start_pump(&self) -> JoinHandle<()> {
    let weak = Arc::downgrade(&self.shared);
    let source = Arc::clone(&self.shared.source);
    // Listen before probing so no push between the two is lost.
    let mut events = source.listen();
    debug!("Starting platform connectivity subscription");

    tokio::spawn(async move {
      let initial = source.probe().await;
      if !publish(&weak, initial) {
        return;
      }
      while let Some(next) = events.recv().await {
        if !publish(&weak, next) {
          return;
        }
      }
    })
  }
}

/// Store `next` and notify subscribers. Returns false once the monitor is gone.
fn publish(weak: &Weak<Shared>, next: NetworkState) -> bool {
  let Some(shared) = weak.upgrade() else {
    return false;
  };

  let (was_offline, callbacks) = {
    let mut state = shared.lock();
    let was_offline = state.probed.then(|| state.current.is_offline());
    state.current = next;
    state.probed = true;
    let callbacks: Vec<Callback> = state
      .subscribers
      .iter()
      .map(|(_, cb)| Arc::clone(cb))
      .collect();
    (was_offline, callbacks)
  };

  match (was_offline, next.is_offline()) {
    (Some(false), true) => info!("Network lost, switching to offline mode"),
    (Some(true), false) => info!("Network restored"),
    (None, offline) => debug!("Initial network state: offline={}", offline),
    _ => {}
  }

  for callback in callbacks {
    callback(next);
  }
  true
}

/// Handle returned by [`NetworkMonitor::subscribe`]; dropping it unsubscribes.
pub struct Subscription {
  shared: Weak<Shared>,
  id: Option<u64>,
}

impl Subscription {
  pub fn unsubscribe(mut self) {
    self.release();
  }

  fn release(&mut self) {
    let (Some(id), Some(shared)) = (self.id.take(), self.shared.upgrade()) else {
      return;
    };
    let mut state = shared.lock();
    state.subscribers.retain(|(sid, _)| *sid != id);
    if state.subscribers.is_empty() {
      if let Some(pump) = state.pump.take() {
        debug!("Releasing platform connectivity subscription");
        pump.abort();
      }
      state.probed = false;
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.release();
  }
}

// ============================================================================
// Connectivity sources
// ============================================================================

/// Reachability of the API host, checked with a TCP connect.
///
/// Only reports `is_connected`; internet reachability stays unknown.
pub struct TcpProbe {
  target: String,
  interval: Duration,
  timeout: Duration,
}

impl TcpProbe {
  pub fn for_endpoint(endpoint: &str, interval: Duration, timeout: Duration) -> Result<Self> {
    if interval.is_zero() {
      return Err(eyre!("Connectivity check interval must be greater than zero"));
    }
    let url = Url::parse(endpoint).map_err(|e| eyre!("Invalid endpoint '{}': {}", endpoint, e))?;
    let host = url
      .host_str()
      .ok_or_else(|| eyre!("Endpoint '{}' has no host", endpoint))?;
    let port = url
      .port_or_known_default()
      .ok_or_else(|| eyre!("Endpoint '{}' has no port", endpoint))?;

    Ok(Self {
      target: format!("{}:{}", host, port),
      interval,
      timeout,
    })
  }

  async fn check(target: String, timeout: Duration) -> NetworkState {
    let connected = matches!(
      tokio::time::timeout(timeout, TcpStream::connect(&target)).await,
      Ok(Ok(_))
    );
    NetworkState {
      is_connected: Some(connected),
      is_internet_reachable: None,
    }
  }
}

impl Connectivity for TcpProbe {
  fn probe(&self) -> BoxFuture<'static, NetworkState> {
    Self::check(self.target.clone(), self.timeout).boxed()
  }

  fn listen(&self) -> mpsc::UnboundedReceiver<NetworkState> {
    let (tx, rx) = mpsc::unbounded_channel();
    let target = self.target.clone();
    let timeout = self.timeout;
    let mut ticker = tokio::time::interval(self.interval);

    tokio::spawn(async move {
      let mut last = None;
      loop {
        ticker.tick().await;
        if tx.is_closed() {
          break;
        }
        let state = Self::check(target.clone(), timeout).await;
        // Only changes are pushed
        if last != Some(state) {
          if tx.send(state).is_err() {
            break;
          }
          last = Some(state);
        }
      }
    });

    rx
  }
}

struct ManualState {
  current: NetworkState,
  listeners: Vec<mpsc::UnboundedSender<NetworkState>>,
  listen_calls: usize,
}

/// A connectivity source driven by explicit [`push`](Self::push) calls.
#[derive(Clone)]
pub struct ManualConnectivity {
  inner: Arc<Mutex<ManualState>>,
}

impl ManualConnectivity {
  pub fn new(initial: NetworkState) -> Self {
    Self {
      inner: Arc::new(Mutex::new(ManualState {
        current: initial,
        listeners: Vec::new(),
        listen_calls: 0,
      })),
    }
  }

  fn lock(&self) -> MutexGuard<'_, ManualState> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Change the state and notify active listeners.
  pub fn push(&self, state: NetworkState) {
    let mut inner = self.lock();
    inner.current = state;
    inner.listeners.retain(|tx| tx.send(state).is_ok());
  }

  /// Number of platform subscriptions opened so far.
  pub fn listen_count(&self) -> usize {
    self.lock().listen_calls
  }
}

impl Connectivity for ManualConnectivity {
  fn probe(&self) -> BoxFuture<'static, NetworkState> {
    future::ready(self.lock().current).boxed()
  }

  fn listen(&self) -> mpsc::UnboundedReceiver<NetworkState> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut inner = self.lock();
    inner.listen_calls += 1;
    inner.listeners.push(tx);
    rx
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn recorder() -> (
    impl Fn(NetworkState) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<NetworkState>,
  ) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
      move |state| {
        let _ = tx.send(state);
      },
      rx,
    )
  }

  async fn next(rx: &mut mpsc::UnboundedReceiver<NetworkState>) -> NetworkState {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
      .await
      .expect("no network update delivered")
      .expect("channel closed")
  }

  #[test]
  fn test_offline_derivation() {
    let unknown = NetworkState::default();
    assert!(!unknown.is_offline());

    let connected_unknown_reach = NetworkState {
      is_connected: Some(true),
      is_internet_reachable: None,
    };
    assert!(!connected_unknown_reach.is_offline());

    let unreachable = NetworkState {
      is_connected: Some(true),
      is_internet_reachable: Some(false),
    };
    assert!(unreachable.is_offline());

    let disconnected = NetworkState {
      is_connected: Some(false),
      is_internet_reachable: None,
    };
    assert!(disconnected.is_offline());
  }

  #[tokio::test]
  async fn test_subscribe_delivers_probe_then_updates() {
    let source = ManualConnectivity::new(NetworkState::online());
    let monitor = NetworkMonitor::new(source.clone());
    let (callback, mut rx) = recorder();

    let _sub = monitor.subscribe(callback);
    assert_eq!(next(&mut rx).await, NetworkState::online());

    source.push(NetworkState::offline());
    assert_eq!(next(&mut rx).await, NetworkState::offline());
    assert!(monitor.is_offline());
  }

  #[tokio::test]
  async fn test_one_platform_subscription_fans_out() {
    let source = ManualConnectivity::new(NetworkState::online());
    let monitor = NetworkMonitor::new(source.clone());
    let (first_cb, mut first) = recorder();
    let (second_cb, mut second) = recorder();

    let _a = monitor.subscribe(first_cb);
    next(&mut first).await;

    // Already probed: the second subscriber gets the state synchronously
    let _b = monitor.subscribe(second_cb);
    assert_eq!(second.try_recv().unwrap(), NetworkState::online());

    source.push(NetworkState::offline());
    assert_eq!(next(&mut first).await, NetworkState::offline());
    assert_eq!(next(&mut second).await, NetworkState::offline());

    assert_eq!(source.listen_count(), 1);
  }

  #[tokio::test]
  async fn test_unsubscribe_stops_delivery_and_releases_platform() {
    let source = ManualConnectivity::new(NetworkState::online());
    let monitor = NetworkMonitor::new(source.clone());
    let (first_cb, mut first) = recorder();
    let (second_cb, mut second) = recorder();

    let a = monitor.subscribe(first_cb);
    let b = monitor.subscribe(second_cb);
    next(&mut first).await;
    next(&mut second).await;

    a.unsubscribe();
    source.push(NetworkState::offline());
    assert_eq!(next(&mut second).await, NetworkState::offline());
    assert!(first.try_recv().is_err());

    drop(b);
    // A fresh subscriber opens a new platform subscription and re-probes
    let (third_cb, mut third) = recorder();
    let _c = monitor.subscribe(third_cb);
    assert_eq!(next(&mut third).await, NetworkState::offline());
    assert_eq!(source.listen_count(), 2);
  }

  #[tokio::test]
  async fn test_ready_waits_for_probe() {
    let source = ManualConnectivity::new(NetworkState::offline());
    let monitor = NetworkMonitor::new(source);
    assert!(!monitor.is_offline());
    assert_eq!(monitor.ready().await, NetworkState::offline());
    assert!(monitor.is_offline());
  }

  #[test]
  fn test_tcp_probe_target_from_endpoint() {
    let probe = TcpProbe::for_endpoint(
      "https://diary.example.com/api/graphql",
      Duration::from_secs(5),
      Duration::from_secs(1),
    )
    .unwrap();
    assert_eq!(probe.target, "diary.example.com:443");
    assert!(TcpProbe::for_endpoint("not a url", Duration::ZERO, Duration::ZERO).is_err());
  }

  #[test]
  fn test_tcp_check_rejects_zero_interval() {
    let result = TcpProbe::for_endpoint("http://localhost:8081/api/graphql", Duration::ZERO, Duration::from_secs(1));
    assert!(result.is_err());
  }
}
