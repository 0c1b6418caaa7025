use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;

use super::documents::{CREATE_SITE_DIARY, GET_SITE_DIARIES, GET_SITE_DIARY, GET_WEEKLY_SUMMARY};
use super::types::{CreateSiteDiaryInput, SiteDiary};
use crate::graphql::{FetchError, Transport};

/// Typed site diary operations over a GraphQL transport. No caching.
#[derive(Clone)]
pub struct SiteDiaryClient {
  transport: Arc<dyn Transport>,
}

impl SiteDiaryClient {
  pub fn new(transport: Arc<dyn Transport>) -> Self {
    Self { transport }
  }

  async fn request<T: DeserializeOwned>(
    &self,
    document: &str,
    variables: Value,
    field: &str,
  ) -> Result<T, FetchError> {
    let timeout = self.transport.default_timeout();
    let mut data = self.transport.send(document, variables, timeout).await?;
    let value = data
      .get_mut(field)
      .map(Value::take)
      .ok_or_else(|| FetchError::MalformedResponse(format!("Missing field '{}'", field)))?;
    serde_json::from_value(value)
      .map_err(|e| FetchError::MalformedResponse(format!("Failed to parse '{}': {}", field, e)))
  }

  /// Get all site diaries
  pub async fn get_site_diaries(&self) -> Result<Vec<SiteDiary>, FetchError> {
    self.request(GET_SITE_DIARIES, json!({}), "siteDiaries").await
  }

  /// Get a single diary by id, `None` if it does not exist
  pub async fn get_site_diary(&self, id: &str) -> Result<Option<SiteDiary>, FetchError> {
    self
      .request(GET_SITE_DIARY, json!({ "id": id }), "siteDiary")
      .await
  }

  pub async fn create_site_diary(&self, input: &CreateSiteDiaryInput) -> Result<SiteDiary, FetchError> {
    self
      .request(CREATE_SITE_DIARY, json!({ "input": input }), "createSiteDiary")
      .await
  }

  /// Get the AI-generated summary of the past week
  pub async fn get_weekly_summary(&self) -> Result<String, FetchError> {
    self.request(GET_WEEKLY_SUMMARY, json!({}), "weeklySummary").await
  }
}
