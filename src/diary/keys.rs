//! Query keys for site diary data.
//!
//! Every key lives under `["siteDiaries"]` so a single prefix invalidation
//! reaches lists, details and the weekly summary.

use crate::cache::QueryKey;

const ROOT: &str = "siteDiaries";

/// `["siteDiaries"]`
pub fn all() -> QueryKey {
  QueryKey::new([ROOT])
}

/// `["siteDiaries", "list"]`
pub fn list() -> QueryKey {
  all().with("list")
}

/// `["siteDiaries", "detail", id]`
pub fn detail(id: &str) -> QueryKey {
  all().with("detail").with(id)
}

/// `["siteDiaries", "weeklySummary"]`
pub fn weekly_summary() -> QueryKey {
  all().with("weeklySummary")
}
