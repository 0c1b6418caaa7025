use serde::{Deserialize, Serialize};

/// Weather recorded for a diary day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weather {
  pub temperature: i32,
  pub description: String,
}

/// A site diary entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteDiary {
  pub id: String,
  pub date: String, // YYYY-MM-DD
  pub title: String,
  pub created_by: String,
  #[serde(default)]
  pub content: Option<String>,
  #[serde(default)]
  pub weather: Option<Weather>,
  #[serde(default, deserialize_with = "null_as_empty")]
  pub attendees: Vec<String>,
  #[serde(default, deserialize_with = "null_as_empty")]
  pub attachments: Vec<String>,
}

/// Input of the create mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSiteDiaryInput {
  pub id: String,
  pub date: String,
  pub title: String,
  pub created_by: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub content: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub weather: Option<Weather>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub attendees: Option<Vec<String>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub attachments: Option<Vec<String>>,
}

/// The API returns `null` for empty lists on some records.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Option<Vec<String>> = Option::deserialize(deserializer)?;
  Ok(v.unwrap_or_default())
}
