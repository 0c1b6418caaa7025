//! Offline-aware query cache.
//!
//! This module provides the cache the query hooks bind to:
//! - One entry per structural [`QueryKey`], holding data, status and error
//! - De-duplication of concurrent fetches for the same key
//! - Retry with exponential backoff, driven by a per-operation [`PolicyTable`]
//! - Prefix invalidation that keeps the last known data on screen
//! - Optional persistence so cached data outlives the process

mod entry;
mod key;
mod layer;
mod policy;
mod storage;

pub use entry::{CacheEntry, FetchStatus};
pub use key::{QueryKey, Segment};
pub use layer::{Observer, QueryCache};
pub use policy::{
  run_with_retry, FetchPolicy, OperationKind, OperationPolicy, PolicyTable, RetryPolicy,
};
pub use storage::{CacheStorage, NoopStorage, SqliteStorage, StoredEntry};
