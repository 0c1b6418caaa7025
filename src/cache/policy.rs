//! Retry and freshness policies, keyed by operation kind.
//!
//! The table is plain data so each rule can be inspected and tested on its own.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::graphql::{ErrorClass, FetchError};

/// Error kinds that are worth retrying when the device is online.
///
/// `NetworkUnreachable` and `EndpointNotFound` are deliberately absent.
pub const DEFAULT_RETRYABLE: &[ErrorClass] = &[
  ErrorClass::Timeout,
  ErrorClass::ServerError,
  ErrorClass::HttpError,
  ErrorClass::MalformedResponse,
  ErrorClass::GraphQL,
  ErrorClass::Unexpected,
];

/// Exponential backoff retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
  /// Retries after the first attempt; total attempts is `max_retries + 1`.
  pub max_retries: u32,
  pub retryable: &'static [ErrorClass],
  pub base_delay: Duration,
  pub max_delay: Duration,
}

impl RetryPolicy {
  pub fn new(max_retries: u32) -> Self {
    Self {
      max_retries,
      retryable: DEFAULT_RETRYABLE,
      base_delay: Duration::from_millis(1_000),
      max_delay: Duration::from_millis(30_000),
    }
  }

  pub fn never() -> Self {
    Self::new(0)
  }

  /// Delay before retry number `attempt` (0-based): `min(base * 2^attempt, max)`.
  pub fn delay(&self, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    self
      .base_delay
      .checked_mul(factor)
      .map_or(self.max_delay, |d| d.min(self.max_delay))
  }

  /// Decide whether to retry after `failures` consecutive failures.
  pub fn should_retry(&self, failures: u32, error: &FetchError, offline: bool) -> bool {
    if offline || error.is_likely_offline() {
      return false;
    }
    if error.class() == ErrorClass::EndpointNotFound {
      return false;
    }
    failures <= self.max_retries && self.retryable.contains(&error.class())
  }
}

/// The operations the client performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
  ReadList,
  ReadDetail,
  ReadSummary,
  Create,
}

impl OperationKind {
  pub const ALL: [OperationKind; 4] = [
    OperationKind::ReadList,
    OperationKind::ReadDetail,
    OperationKind::ReadSummary,
    OperationKind::Create,
  ];
}

/// Retry plus freshness for one operation kind.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationPolicy {
  pub retry: RetryPolicy,
  /// How long a successful result counts as fresh while online.
  pub stale_after: Duration,
}

/// Policy per operation kind.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyTable {
  read_list: OperationPolicy,
  read_detail: OperationPolicy,
  read_summary: OperationPolicy,
  create: OperationPolicy,
}

impl Default for PolicyTable {
  fn default() -> Self {
    let five_minutes = Duration::from_secs(5 * 60);
    Self {
      read_list: OperationPolicy {
        retry: RetryPolicy::new(2),
        stale_after: five_minutes,
      },
      read_detail: OperationPolicy {
        retry: RetryPolicy::new(2),
        stale_after: five_minutes,
      },
      read_summary: OperationPolicy {
        retry: RetryPolicy::new(1),
        stale_after: Duration::from_secs(10 * 60),
      },
      create: OperationPolicy {
        retry: RetryPolicy::new(2),
        stale_after: Duration::ZERO,
      },
    }
  }
}

impl PolicyTable {
  pub fn get(&self, kind: OperationKind) -> &OperationPolicy {
    match kind {
      OperationKind::ReadList => &self.read_list,
      OperationKind::ReadDetail => &self.read_detail,
      OperationKind::ReadSummary => &self.read_summary,
      OperationKind::Create => &self.create,
    }
  }

  pub fn get_mut(&mut self, kind: OperationKind) -> &mut OperationPolicy {
    match kind {
      OperationKind::ReadList => &mut self.read_list,
      OperationKind::ReadDetail => &mut self.read_detail,
      OperationKind::ReadSummary => &mut self.read_summary,
      OperationKind::Create => &mut self.create,
    }
  }
}

/// Per-call knobs for [`QueryCache::ensure_fresh`](super::QueryCache::ensure_fresh).
#[derive(Debug, Clone)]
pub struct FetchPolicy {
  pub retry: RetryPolicy,
  pub stale_after: Duration,
  /// Serve cached data regardless of age (offline mode).
  pub allow_stale: bool,
  /// Fetch even if cached data is fresh.
  pub force: bool,
}

impl FetchPolicy {
  pub fn from_operation(policy: &OperationPolicy) -> Self {
    Self {
      retry: policy.retry.clone(),
      stale_after: policy.stale_after,
      allow_stale: false,
      force: false,
    }
  }

  pub fn allow_stale(mut self, allow: bool) -> Self {
    self.allow_stale = allow;
    self
  }

  pub fn force(mut self, force: bool) -> Self {
    self.force = force;
    self
  }
}

/// Run `operation`, retrying failures as `retry` allows.
///
/// `is_offline` is consulted after every failure so a connectivity loss in the
/// middle of a backoff stops further attempts.
pub async fn run_with_retry<T, F, Fut>(
  retry: &RetryPolicy,
  label: &str,
  is_offline: impl Fn() -> bool,
  mut operation: F,
) -> Result<T, FetchError>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, FetchError>>,
{
  let mut failures = 0u32;
  loop {
    match operation().await {
      Ok(data) => return Ok(data),
      Err(error) => {
        failures += 1;
        if !retry.should_retry(failures, &error, is_offline()) {
          if failures > 1 {
            warn!("{} failed after {} attempts: {}", label, failures, error);
          }
          return Err(error);
        }
        let delay = retry.delay(failures - 1);
        warn!(
          "{} failed ({}), retry {}/{} in {:?}",
          label, error, failures, retry.max_retries, delay
        );
        tokio::time::sleep(delay).await;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use tokio::time::Instant;

  fn server_error() -> FetchError {
    FetchError::ServerError(500)
  }

  #[test]
  fn test_backoff_doubles_and_caps() {
    let policy = RetryPolicy::new(10);
    let delays: Vec<u64> = (0..7).map(|a| policy.delay(a).as_millis() as u64).collect();
    assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000]);
    assert_eq!(policy.delay(40), Duration::from_millis(30_000));
  }

  #[test]
  fn test_retries_until_budget_exhausted() {
    let policy = RetryPolicy::new(2);
    assert!(policy.should_retry(1, &server_error(), false));
    assert!(policy.should_retry(2, &server_error(), false));
    assert!(!policy.should_retry(3, &server_error(), false));
  }

  #[test]
  fn test_never_retries_offline() {
    let policy = RetryPolicy::new(2);
    assert!(!policy.should_retry(1, &server_error(), true));
    let graphql = FetchError::from_graphql_errors(vec![]);
    assert!(!policy.should_retry(1, &graphql, true));
  }

  #[test]
  fn test_never_retries_unreachable_or_not_found() {
    let policy = RetryPolicy::new(5);
    let unreachable = FetchError::NetworkUnreachable {
      message: "refused".to_string(),
      likely_offline: true,
    };
    assert!(!policy.should_retry(1, &unreachable, false));
    assert!(!policy.should_retry(1, &FetchError::EndpointNotFound, false));
  }

  #[test]
  fn test_retries_application_and_generic_errors() {
    let policy = RetryPolicy::new(2);
    let graphql = FetchError::from_graphql_errors(vec![]);
    assert!(policy.should_retry(1, &graphql, false));
    assert!(policy.should_retry(1, &FetchError::Unexpected("boom".into()), false));
    assert!(policy.should_retry(1, &FetchError::Timeout(30_000), false));
  }

  #[test]
  fn test_default_table() {
    let table = PolicyTable::default();
    assert_eq!(table.get(OperationKind::ReadList).retry.max_retries, 2);
    assert_eq!(table.get(OperationKind::ReadDetail).retry.max_retries, 2);
    assert_eq!(table.get(OperationKind::ReadSummary).retry.max_retries, 1);
    assert_eq!(table.get(OperationKind::Create).retry.max_retries, 2);
    assert_eq!(
      table.get(OperationKind::ReadList).stale_after,
      Duration::from_secs(300)
    );
    assert_eq!(
      table.get(OperationKind::ReadSummary).stale_after,
      Duration::from_secs(600)
    );
  }

  #[tokio::test(start_paused = true)]
  async fn test_run_with_retry_backs_off_then_surfaces_error() {
    let calls = AtomicU32::new(0);
    let started = Instant::now();
    let mut call_times = Vec::new();

    let result: Result<(), FetchError> =
      run_with_retry(&RetryPolicy::new(3), "test", || false, || {
        calls.fetch_add(1, Ordering::SeqCst);
        call_times.push(started.elapsed().as_millis() as u64);
        async { Err(FetchError::ServerError(500)) }
      })
      .await;

    assert_eq!(result, Err(FetchError::ServerError(500)));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(call_times, vec![0, 1_000, 3_000, 7_000]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_run_with_retry_stops_when_offline() {
    let calls = AtomicU32::new(0);
    let result: Result<(), FetchError> =
      run_with_retry(&RetryPolicy::new(3), "test", || true, || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err(FetchError::ServerError(500)) }
      })
      .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
