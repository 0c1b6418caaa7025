//! In-process fakes shared by unit tests.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::graphql::{FetchError, Transport};

type Handler = dyn Fn(&str, &Value) -> Result<Value, FetchError> + Send + Sync;

/// Transport answering from a closure, counting calls.
#[derive(Clone)]
pub struct ScriptedTransport {
  handler: Arc<Handler>,
  calls: Arc<AtomicUsize>,
  latency: Duration,
}

impl ScriptedTransport {
  pub fn new<F>(handler: F) -> Self
  where
    F: Fn(&str, &Value) -> Result<Value, FetchError> + Send + Sync + 'static,
  {
    Self {
      handler: Arc::new(handler),
      calls: Arc::new(AtomicUsize::new(0)),
      latency: Duration::from_millis(5),
    }
  }

  /// Answer with each result in turn, then keep repeating the last one.
  pub fn sequence(results: Vec<Result<Value, FetchError>>) -> Self {
    let results = Arc::new(std::sync::Mutex::new(results));
    Self::new(move |_, _| {
      let mut results = results.lock().unwrap();
      if results.len() > 1 {
        results.remove(0)
      } else {
        results
          .first()
          .cloned()
          .unwrap_or_else(|| Err(FetchError::Unexpected("no scripted response".into())))
      }
    })
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Transport for ScriptedTransport {
  fn send<'a>(
    &'a self,
    query: &'a str,
    variables: Value,
    _timeout: Duration,
  ) -> BoxFuture<'a, Result<Value, FetchError>> {
    async move {
      self.calls.fetch_add(1, Ordering::SeqCst);
      tokio::time::sleep(self.latency).await;
      (self.handler)(query, &variables)
    }
    .boxed()
  }
}
