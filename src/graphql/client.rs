//! GraphQL-over-HTTP transport.
//!
//! This is the only module that talks to the wire. It is stateless per call:
//! no caching and no retries happen here, it only enforces the timeout and
//! classifies failures into [`FetchError`].

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use super::error::{FetchError, GraphQLErrorDetail};
use crate::config::ApiConfig;

/// Upper bound on any single request, whatever the caller asks for.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Something that can execute a GraphQL document and return its `data`.
pub trait Transport: Send + Sync {
  fn send<'a>(
    &'a self,
    query: &'a str,
    variables: Value,
    timeout: Duration,
  ) -> BoxFuture<'a, Result<Value, FetchError>>;

  /// Timeout used when the caller has no specific deadline.
  fn default_timeout(&self) -> Duration {
    Duration::from_millis(30_000)
  }
}

/// Response envelope of a GraphQL endpoint.
#[derive(Debug, Deserialize)]
struct GraphQLResponse {
  #[serde(default)]
  data: Option<Value>,
  #[serde(default)]
  errors: Option<Vec<GraphQLErrorDetail>>,
}

/// reqwest-backed transport posting to a single endpoint.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  endpoint: Url,
  timeout: Duration,
}

impl HttpTransport {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let endpoint = Url::parse(&config.url)
      .map_err(|e| eyre!("Invalid GraphQL endpoint '{}': {}", config.url, e))?;

    let client = reqwest::Client::builder()
      .gzip(true)
      .deflate(true)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self::with_client(
      client,
      endpoint,
      Duration::from_millis(config.timeout_ms),
    ))
  }

  pub fn with_client(client: reqwest::Client, endpoint: Url, timeout: Duration) -> Self {
    Self {
      client,
      endpoint,
      timeout,
    }
  }

  pub fn endpoint(&self) -> &Url {
    &self.endpoint
  }

  async fn execute(&self, query: &str, variables: Value, timeout: Duration) -> Result<Value, FetchError> {
    let timeout = timeout.min(MAX_TIMEOUT);
    let timeout_ms = timeout.as_millis() as u64;
    let deadline = Instant::now() + timeout;
    let body = json!({
      "query": query,
      "variables": variables,
    });

    debug!("POST {}", self.endpoint);

    // Dropping the future on expiry cancels the underlying request.
    let response = match tokio::time::timeout_at(
      deadline,
      self
        .client
        .post(self.endpoint.clone())
        .header(CONTENT_TYPE, "application/json")
        .body(body.to_string())
        .send(),
    )
    .await
    {
      Err(_) => return Err(FetchError::Timeout(timeout_ms)),
      Ok(Err(e)) => return Err(classify_request_error(&e, timeout_ms)),
      Ok(Ok(response)) => response,
    };

    let status = response.status().as_u16();
    let bytes = match tokio::time::timeout_at(deadline, response.bytes()).await {
      Err(_) => return Err(FetchError::Timeout(timeout_ms)),
      Ok(Err(e)) if e.is_timeout() => return Err(FetchError::Timeout(timeout_ms)),
      Ok(Err(e)) => return Err(FetchError::MalformedResponse(e.to_string())),
      Ok(Ok(bytes)) => bytes,
    };

    decode_response(status, &bytes)
  }
}

impl Transport for HttpTransport {
  fn send<'a>(
    &'a self,
    query: &'a str,
    variables: Value,
    timeout: Duration,
  ) -> BoxFuture<'a, Result<Value, FetchError>> {
    self.execute(query, variables, timeout).boxed()
  }

  fn default_timeout(&self) -> Duration {
    self.timeout
  }
}

/// Classify a failure that happened before a response arrived.
fn classify_request_error(e: &reqwest::Error, timeout_ms: u64) -> FetchError {
  if e.is_timeout() {
    return FetchError::Timeout(timeout_ms);
  }
  if e.is_builder() {
    return FetchError::Unexpected(e.to_string());
  }
  // Only a failure to connect says anything about the device being offline;
  // a connection dropped mid-request does not.
  FetchError::NetworkUnreachable {
    message: e.to_string(),
    likely_offline: e.is_connect(),
  }
}

/// Turn an HTTP status and body into the `data` field or a classified error.
pub fn decode_response(status: u16, body: &[u8]) -> Result<Value, FetchError> {
  if !(200..300).contains(&status) {
    return Err(match status {
      0 | 500.. => FetchError::ServerError(status),
      404 => FetchError::EndpointNotFound,
      _ => FetchError::HttpError(status),
    });
  }

  let envelope: GraphQLResponse =
    serde_json::from_slice(body).map_err(|e| FetchError::MalformedResponse(e.to_string()))?;

  if let Some(errors) = envelope.errors.filter(|errors| !errors.is_empty()) {
    return Err(FetchError::from_graphql_errors(errors));
  }

  Ok(envelope.data.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::net::SocketAddr;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::{TcpListener, TcpStream};

  #[test]
  fn test_decode_returns_data_field() {
    let body = br#"{"data":{"siteDiaries":[{"id":"1"}]}}"#;
    let data = decode_response(200, body).unwrap();
    assert_eq!(data["siteDiaries"][0]["id"], "1");
  }

  #[test]
  fn test_decode_missing_data_is_null() {
    assert_eq!(decode_response(200, b"{}").unwrap(), Value::Null);
  }

  #[test]
  fn test_decode_classifies_status_codes() {
    assert_eq!(decode_response(500, b""), Err(FetchError::ServerError(500)));
    assert_eq!(decode_response(503, b""), Err(FetchError::ServerError(503)));
    assert_eq!(decode_response(0, b""), Err(FetchError::ServerError(0)));
    assert_eq!(decode_response(404, b""), Err(FetchError::EndpointNotFound));
    assert_eq!(decode_response(401, b""), Err(FetchError::HttpError(401)));
    assert_eq!(decode_response(302, b""), Err(FetchError::HttpError(302)));
  }

  #[test]
  fn test_decode_unparseable_body_is_malformed() {
    assert!(matches!(
      decode_response(200, b"<html>oops</html>"),
      Err(FetchError::MalformedResponse(_))
    ));
    assert!(matches!(
      decode_response(200, b"[1, 2]"),
      Err(FetchError::MalformedResponse(_))
    ));
  }

  #[test]
  fn test_decode_graphql_errors() {
    let body = br#"{"data":null,"errors":[{"message":"Cannot query field \"nope\""}]}"#;
    match decode_response(200, body) {
      Err(FetchError::GraphQL { message, errors }) => {
        assert_eq!(message, "Cannot query field \"nope\"");
        assert_eq!(errors.len(), 1);
      }
      other => panic!("expected GraphQL error, got {:?}", other),
    }
  }

  #[test]
  fn test_decode_empty_errors_array_is_success() {
    let body = br#"{"data":{"weeklySummary":"ok"},"errors":[]}"#;
    assert_eq!(decode_response(200, body).unwrap()["weeklySummary"], "ok");
  }

  fn transport_for(addr: SocketAddr, timeout: Duration) -> HttpTransport {
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let url = Url::parse(&format!("http://{}/api/graphql", addr)).unwrap();
    HttpTransport::with_client(client, url, timeout)
  }

  /// Read one HTTP request (headers plus Content-Length body) off the socket.
  async fn read_request(socket: &mut TcpStream) -> String {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
      let n = socket.read(&mut buf).await.unwrap();
      if n == 0 {
        break;
      }
      raw.extend_from_slice(&buf[..n]);
      let text = String::from_utf8_lossy(&raw).to_string();
      if let Some(header_end) = text.find("\r\n\r\n") {
        let content_length = text[..header_end]
          .lines()
          .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name
              .eq_ignore_ascii_case("content-length")
              .then(|| value.trim().parse::<usize>().ok())
              .flatten()
          })
          .unwrap_or(0);
        if raw.len() >= header_end + 4 + content_length {
          return text;
        }
      }
    }
    String::from_utf8_lossy(&raw).to_string()
  }

  async fn serve_once(status_line: &'static str, body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      let (mut socket, _) = listener.accept().await.unwrap();
      let request = read_request(&mut socket).await;
      assert!(request.starts_with("POST /api/graphql"));
      let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status_line,
        body.len(),
        body
      );
      socket.write_all(response.as_bytes()).await.unwrap();
      let _ = socket.shutdown().await;
    });
    addr
  }

  #[tokio::test]
  async fn test_send_returns_data() {
    let addr = serve_once("200 OK", r#"{"data":{"weeklySummary":"A quiet week"}}"#).await;
    let transport = transport_for(addr, Duration::from_secs(5));

    let data = transport
      .send("query { weeklySummary }", json!({}), Duration::from_secs(5))
      .await
      .unwrap();
    assert_eq!(data["weeklySummary"], "A quiet week");
  }

  #[tokio::test]
  async fn test_send_classifies_server_error() {
    let addr = serve_once("500 Internal Server Error", "").await;
    let transport = transport_for(addr, Duration::from_secs(5));

    let err = transport
      .send("query { siteDiaries { id } }", json!({}), Duration::from_secs(5))
      .await
      .unwrap_err();
    assert_eq!(err, FetchError::ServerError(500));
  }

  #[tokio::test]
  async fn test_send_classifies_not_found() {
    let addr = serve_once("404 Not Found", "").await;
    let transport = transport_for(addr, Duration::from_secs(5));

    let err = transport
      .send("query { siteDiaries { id } }", json!({}), Duration::from_secs(5))
      .await
      .unwrap_err();
    assert_eq!(err, FetchError::EndpointNotFound);
  }

  #[tokio::test]
  async fn test_send_refused_connection_is_likely_offline() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = transport_for(addr, Duration::from_secs(5));
    let err = transport
      .send("query { siteDiaries { id } }", json!({}), Duration::from_secs(5))
      .await
      .unwrap_err();
    assert!(err.is_likely_offline(), "got {:?}", err);
  }

  #[tokio::test]
  async fn test_send_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      let (socket, _) = listener.accept().await.unwrap();
      // Hold the connection open without answering.
      tokio::time::sleep(Duration::from_secs(5)).await;
      drop(socket);
    });

    let transport = transport_for(addr, Duration::from_secs(5));
    let err = transport
      .send("query { siteDiaries { id } }", json!({}), Duration::from_millis(100))
      .await
      .unwrap_err();
    assert_eq!(err, FetchError::Timeout(100));
  }

  #[tokio::test]
  async fn test_connection_dropped_mid_request_is_not_offline() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      let (mut socket, _) = listener.accept().await.unwrap();
      read_request(&mut socket).await;
      // Close without writing a response
      drop(socket);
    });

    let transport = transport_for(addr, Duration::from_secs(5));
    let err = transport
      .send("query { siteDiaries { id } }", json!({}), Duration::from_secs(5))
      .await
      .unwrap_err();
    assert!(
      matches!(err, FetchError::NetworkUnreachable { likely_offline: false, .. }),
      "got {:?}",
      err
    );
  }

  #[tokio::test]
  async fn test_oversized_timeout_is_capped() {
    let addr = serve_once("200 OK", r#"{"data":{"weeklySummary":"ok"}}"#).await;
    let transport = transport_for(addr, Duration::MAX);

    let data = transport
      .send("query { weeklySummary }", json!({}), Duration::MAX)
      .await
      .unwrap();
    assert_eq!(data["weeklySummary"], "ok");
  }
}
