//! Creating site diaries.
//!
//! Writes are never queued: while offline `create` fails fast without touching
//! the transport. A successful create invalidates the whole `["siteDiaries"]`
//! family and seeds the detail entry for the new record.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use super::client::SiteDiaryClient;
use super::keys;
use super::types::{CreateSiteDiaryInput, SiteDiary};
use crate::cache::{run_with_retry, QueryCache, RetryPolicy};
use crate::graphql::FetchError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MutationError {
  #[error("Cannot create site diary while offline")]
  Offline,
  #[error(transparent)]
  Fetch(#[from] FetchError),
}

#[derive(Debug, Default)]
struct MutationState {
  in_flight: usize,
  error: Option<MutationError>,
  data: Option<SiteDiary>,
}

/// Handle for the create mutation. Clones share state.
#[derive(Clone)]
pub struct CreateSiteDiary {
  client: SiteDiaryClient,
  cache: QueryCache,
  retry: RetryPolicy,
  detail_stale_after: Duration,
  state: Arc<Mutex<MutationState>>,
}

impl CreateSiteDiary {
  pub fn new(client: SiteDiaryClient, cache: QueryCache, retry: RetryPolicy, detail_stale_after: Duration) -> Self {
    Self {
      client,
      cache,
      retry,
      detail_stale_after,
      state: Arc::new(Mutex::new(MutationState::default())),
    }
  }

  fn lock(&self) -> MutexGuard<'_, MutationState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub async fn create(&self, input: CreateSiteDiaryInput) -> Result<SiteDiary, MutationError> {
    let network = self.cache.network().clone();
    if network.is_offline() {
      warn!("Refusing to create site diary '{}' while offline", input.title);
      self.lock().error = Some(MutationError::Offline);
      return Err(MutationError::Offline);
    }

    {
      let mut state = self.lock();
      state.in_flight += 1;
      state.error = None;
    }

    let client = self.client.clone();
    let result = run_with_retry(&self.retry, "createSiteDiary", || network.is_offline(), || {
      let client = client.clone();
      let input = input.clone();
      async move { client.create_site_diary(&input).await }
    })
    .await;

    let result = match result {
      Ok(created) => {
        self.on_created(&created);
        Ok(created)
      }
      Err(e) => Err(MutationError::from(e)),
    };

    let mut state = self.lock();
    state.in_flight -= 1;
    match &result {
      Ok(created) => state.data = Some(created.clone()),
      Err(e) => state.error = Some(e.clone()),
    }
    result
  }

  fn on_created(&self, created: &SiteDiary) {
    let invalidated = self.cache.invalidate(&keys::all());
    info!("Created site diary {}, invalidated {} cached queries", created.id, invalidated);

    let detail = Some(created.clone());
    if let Err(e) = self.cache.set_data(&keys::detail(&created.id), &detail, self.detail_stale_after) {
      warn!("Failed to seed cache for {}: {}", created.id, e);
    }
  }

  pub fn is_creating(&self) -> bool {
    self.lock().in_flight > 0
  }

  /// Error of the last attempt, if it failed
  pub fn error(&self) -> Option<MutationError> {
    self.lock().error.clone()
  }

  /// Record returned by the last successful create
  pub fn data(&self) -> Option<SiteDiary> {
    self.lock().data.clone()
  }

  /// Clear the error and last result.
  pub fn reset(&self) {
    let mut state = self.lock();
    state.error = None;
    state.data = None;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::NoopStorage;
  use crate::network::{ManualConnectivity, NetworkMonitor, NetworkState};
  use crate::testing::ScriptedTransport;
  use serde_json::{json, Value};

  fn input(id: &str) -> CreateSiteDiaryInput {
    CreateSiteDiaryInput {
      id: id.to_string(),
      date: "2024-12-14".to_string(),
      title: "Slab pour level 2".to_string(),
      created_by: "Mary Johnson".to_string(),
      content: Some("Poured and finished".to_string()),
      weather: None,
      attendees: Some(vec!["John Doe".to_string()]),
      attachments: None,
    }
  }

  fn echo() -> ScriptedTransport {
    ScriptedTransport::new(|_, variables| Ok(json!({ "createSiteDiary": variables["input"].clone() })))
  }

  async fn setup(state: NetworkState, transport: ScriptedTransport) -> (CreateSiteDiary, QueryCache) {
    let monitor = NetworkMonitor::new(ManualConnectivity::new(state));
    monitor.ready().await;
    let cache = QueryCache::new(Arc::new(NoopStorage), monitor);
    let client = SiteDiaryClient::new(Arc::new(transport));
    let mutation = CreateSiteDiary::new(client, cache.clone(), RetryPolicy::new(2), Duration::from_secs(300));
    (mutation, cache)
  }

  #[tokio::test]
  async fn test_offline_create_rejected_without_request() {
    let transport = echo();
    let (mutation, _cache) = setup(NetworkState::offline(), transport.clone()).await;

    let result = mutation.create(input("a")).await;
    assert_eq!(result, Err(MutationError::Offline));
    assert_eq!(transport.calls(), 0);
    assert_eq!(mutation.error(), Some(MutationError::Offline));
    assert!(!mutation.is_creating());
  }

  #[tokio::test]
  async fn test_create_invalidates_family_and_seeds_detail() {
    let transport = echo();
    let (mutation, cache) = setup(NetworkState::online(), transport.clone()).await;
    cache
      .set_data(&keys::list(), &Vec::<SiteDiary>::new(), Duration::from_secs(300))
      .unwrap();
    cache
      .set_data(&keys::weekly_summary(), &"quiet week", Duration::from_secs(600))
      .unwrap();

    let created = mutation.create(input("new-id")).await.unwrap();
    assert_eq!(created.id, "new-id");
    assert_eq!(transport.calls(), 1);

    let list = cache.read(&keys::list()).unwrap();
    assert!(list.is_invalidated());
    assert_eq!(list.data, Some(json!([])));
    assert!(cache.read(&keys::weekly_summary()).unwrap().is_invalidated());

    let detail = cache.read(&keys::detail("new-id")).unwrap();
    assert!(!detail.is_stale());
    assert_eq!(detail.data.unwrap()["title"], "Slab pour level 2");
    assert_eq!(mutation.data(), Some(created));
  }

  #[tokio::test(start_paused = true)]
  async fn test_server_failure_is_retried_then_reported() {
    let transport = ScriptedTransport::sequence(vec![Err(FetchError::ServerError(503))]);
    let (mutation, cache) = setup(NetworkState::online(), transport.clone()).await;
    cache.set_data(&keys::list(), &Value::Array(vec![]), Duration::from_secs(300)).unwrap();

    let result = mutation.create(input("x")).await;
    assert_eq!(result, Err(MutationError::Fetch(FetchError::ServerError(503))));
    assert_eq!(transport.calls(), 3);
    assert!(!mutation.is_creating());
    assert!(!cache.read(&keys::list()).unwrap().is_invalidated());

    mutation.reset();
    assert_eq!(mutation.error(), None);
  }

  #[tokio::test]
  async fn test_graphql_error_surfaces_message() {
    let transport = ScriptedTransport::new(|_, _| {
      Err(FetchError::GraphQL {
        message: "Title is required".to_string(),
        errors: vec![],
      })
    });
    let (mutation, _cache) = setup(NetworkState::online(), transport).await;
    let mutation = CreateSiteDiary {
      retry: RetryPolicy::never(),
      ..mutation
    };

    let err = mutation.create(input("x")).await.unwrap_err();
    assert_eq!(err.to_string(), "Title is required");
  }
}
