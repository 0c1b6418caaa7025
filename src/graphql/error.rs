//! Failure taxonomy shared by the transport, the query cache and the hooks.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A single entry of a GraphQL response's `errors` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLErrorDetail {
  #[serde(default)]
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub path: Option<Vec<Value>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub extensions: Option<Value>,
}

/// Classified failure of a GraphQL request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
  /// The connection could not be established (DNS, refused, no route).
  #[error("Unable to connect to the server: {message}")]
  NetworkUnreachable { message: String, likely_offline: bool },

  #[error("Request timed out after {0}ms")]
  Timeout(u64),

  /// HTTP 5xx (or status 0).
  #[error("Server error (HTTP {0}), please try again later")]
  ServerError(u16),

  /// HTTP 404. The endpoint is misconfigured; retrying cannot help.
  #[error("GraphQL endpoint not found, please check your configuration")]
  EndpointNotFound,

  #[error("Request failed with status {0}")]
  HttpError(u16),

  #[error("Invalid response from server: {0}")]
  MalformedResponse(String),

  /// The HTTP round trip succeeded but the server reported application errors.
  #[error("{message}")]
  GraphQL {
    message: String,
    errors: Vec<GraphQLErrorDetail>,
  },

  #[error("Unexpected error: {0}")]
  Unexpected(String),
}

/// Coarse error kind, used as the vocabulary of retry policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
  NetworkUnreachable,
  Timeout,
  ServerError,
  EndpointNotFound,
  HttpError,
  MalformedResponse,
  GraphQL,
  Unexpected,
}

impl FetchError {
  pub fn class(&self) -> ErrorClass {
    match self {
      Self::NetworkUnreachable { .. } => ErrorClass::NetworkUnreachable,
      Self::Timeout(_) => ErrorClass::Timeout,
      Self::ServerError(_) => ErrorClass::ServerError,
      Self::EndpointNotFound => ErrorClass::EndpointNotFound,
      Self::HttpError(_) => ErrorClass::HttpError,
      Self::MalformedResponse(_) => ErrorClass::MalformedResponse,
      Self::GraphQL { .. } => ErrorClass::GraphQL,
      Self::Unexpected(_) => ErrorClass::Unexpected,
    }
  }

  /// True when the failure most likely means the device has no connectivity.
  ///
  /// Such failures are resolved by the offline -> online transition, never by
  /// retrying.
  pub fn is_likely_offline(&self) -> bool {
    matches!(
      self,
      Self::NetworkUnreachable {
        likely_offline: true,
        ..
      }
    )
  }

  /// Build a `GraphQL` error from a non-empty `errors` array.
  pub fn from_graphql_errors(errors: Vec<GraphQLErrorDetail>) -> Self {
    let message = errors
      .first()
      .map(|e| e.message.clone())
      .filter(|m| !m.is_empty())
      .unwrap_or_else(|| "GraphQL request failed".to_string());
    Self::GraphQL { message, errors }
  }
}
