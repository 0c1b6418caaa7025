//! Site diary queries bound to the shared cache.

use std::sync::Arc;

use super::client::SiteDiaryClient;
use super::keys;
use super::mutation::CreateSiteDiary;
use super::types::SiteDiary;
use crate::cache::{OperationKind, PolicyTable, QueryCache, QueryKey};
use crate::query::{Query, QueryOptions};

/// Entry point for screens: hands out queries and the create mutation.
///
/// Queries created here share one [`QueryCache`], so two screens asking for
/// the list see the same data and at most one request is in flight.
#[derive(Clone)]
pub struct SiteDiaryApi {
  client: SiteDiaryClient,
  cache: QueryCache,
  policies: Arc<PolicyTable>,
  summary_enabled: bool,
}

impl SiteDiaryApi {
  pub fn new(client: SiteDiaryClient, cache: QueryCache, policies: PolicyTable, summary_enabled: bool) -> Self {
    Self {
      client,
      cache,
      policies: Arc::new(policies),
      summary_enabled,
    }
  }

  pub fn cache(&self) -> &QueryCache {
    &self.cache
  }

  fn options(&self, key: QueryKey, kind: OperationKind) -> QueryOptions {
    QueryOptions::new(key, self.policies.get(kind).clone())
  }

  /// All site diaries.
  pub fn site_diaries(&self) -> Query<Vec<SiteDiary>> {
    let client = self.client.clone();
    Query::new(
      self.cache.clone(),
      self.options(keys::list(), OperationKind::ReadList),
      move || {
        let client = client.clone();
        async move { client.get_site_diaries().await }
      },
    )
  }

  /// One diary. Disabled until an id is known.
  pub fn site_diary(&self, id: Option<&str>) -> Query<Option<SiteDiary>> {
    let client = self.client.clone();
    let id = id.filter(|id| !id.is_empty()).map(str::to_string);
    let options = self
      .options(keys::detail(id.as_deref().unwrap_or_default()), OperationKind::ReadDetail)
      .enabled(id.is_some());
    let id = id.unwrap_or_default();

    Query::new(self.cache.clone(), options, move || {
      let client = client.clone();
      let id = id.clone();
      async move { client.get_site_diary(&id).await }
    })
  }

  /// AI summary of the week. Disabled without the summary capability or
  /// while offline.
  pub fn weekly_summary(&self) -> Query<String> {
    let client = self.client.clone();
    let options = self
      .options(keys::weekly_summary(), OperationKind::ReadSummary)
      .enabled(self.summary_enabled)
      .requires_network(true);

    Query::new(self.cache.clone(), options, move || {
      let client = client.clone();
      async move { client.get_weekly_summary().await }
    })
  }

  pub fn create_site_diary(&self) -> CreateSiteDiary {
    let policy = self.policies.get(OperationKind::Create);
    CreateSiteDiary::new(
      self.client.clone(),
      self.cache.clone(),
      policy.retry.clone(),
      self.policies.get(OperationKind::ReadDetail).stale_after,
    )
  }
}
