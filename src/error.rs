//! Error types for the request pipeline.
//!
//! Every failure a request can run into ends up as one of these values and is
//! handed to the request's listener exactly once.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using the SDK error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error payload returned by the API for non-2xx responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
  #[serde(default)]
  pub id: Option<String>,
  #[serde(default)]
  pub code: i64,
  #[serde(default)]
  pub message: String,
  #[serde(default)]
  pub details: Option<String>,
  #[serde(default)]
  pub failed_on_field: Option<String>,
}

/// Errors delivered through request listeners.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
  /// Connection, DNS or I/O failure below HTTP
  #[error("Transport error: {0}")]
  Transport(String),

  /// The request did not complete within its timeout
  #[error("Request timed out after {0:?}")]
  Timeout(Duration),

  /// The API answered with a status outside the accepted range
  #[error("API error (HTTP {status}): {}", api_message(.body))]
  Api {
    status: u16,
    body: Option<ApiErrorBody>,
  },

  /// The response body could not be turned into the expected type
  #[error("Failed to parse response: {0}")]
  Parse(String),

  /// Cache-only request with nothing fresh in the cache
  #[error("No cached data available for {key}")]
  CacheMiss { key: String },

  /// The request URL could not be resolved
  #[error("Invalid URL '{url}': {reason}")]
  InvalidUrl { url: String, reason: String },

  /// Auto-fill was asked to hydrate data that does not exist
  #[error("Unable to auto-fill: the data provided is absent")]
  DataAbsent,

  /// The request was canceled before delivery
  #[error("Request was canceled")]
  Canceled,

  /// One or more sub-requests of a composite operation failed
  #[error("{} sub-request(s) failed", .0.len())]
  Aggregate(Vec<Error>),
}

fn api_message(body: &Option<ApiErrorBody>) -> &str {
  body
    .as_ref()
    .map(|b| b.message.as_str())
    .unwrap_or("no error body")
}

impl Error {
  /// Collapse a list of sub-request errors into a single optional error.
  pub fn aggregate(errors: Vec<Error>) -> Option<Error> {
    if errors.is_empty() {
      None
    } else {
      Some(Error::Aggregate(errors))
    }
  }

  /// True for failures below the HTTP layer (including timeouts).
  pub fn is_transport(&self) -> bool {
    matches!(self, Error::Transport(_) | Error::Timeout(_))
  }
}

impl From<serde_json::Error> for Error {
  fn from(e: serde_json::Error) -> Self {
    Error::Parse(e.to_string())
  }
}
