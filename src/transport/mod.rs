//! HTTP transport seam.
//!
//! The queue only ever talks to a [`Transport`]; production code uses
//! [`ReqwestTransport`], tests substitute a scripted mock.

mod http;
#[cfg(test)]
pub(crate) mod mock;

pub use http::ReqwestTransport;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::request::Method;

/// A fully resolved HTTP call: absolute URL including the query string,
/// headers and an optional body.
#[derive(Debug, Clone)]
pub struct HttpRequest {
  pub method: Method,
  pub url: String,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
  pub timeout: Option<Duration>,
}

impl HttpRequest {
  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }

  /// Path component of the URL, e.g. `/v2/offers`.
  pub fn path(&self) -> String {
    url::Url::parse(&self.url)
      .map(|u| u.path().to_string())
      .unwrap_or_else(|_| self.url.clone())
  }

  /// Decoded query parameter.
  pub fn query_param(&self, name: &str) -> Option<String> {
    let url = url::Url::parse(&self.url).ok()?;
    url
      .query_pairs()
      .find(|(k, _)| k == name)
      .map(|(_, v)| v.into_owned())
  }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl HttpResponse {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  /// Response with a serialized JSON body.
  pub fn json(status: u16, value: &Value) -> Self {
    Self::new(status, value.to_string()).with_header("Content-Type", "application/json")
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.push((name.to_string(), value.into()));
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
  headers
    .iter()
    .find(|(k, _)| k.eq_ignore_ascii_case(name))
    .map(|(_, v)| v.as_str())
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
  #[error("connection failed: {0}")]
  Connect(String),

  #[error("request timed out")]
  Timeout,

  #[error("{0}")]
  Other(String),
}

/// Executes HTTP calls for the dispatch workers.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_header_lookup_ignores_case() {
    let response = HttpResponse::new(200, "").with_header("X-Token", "abc");
    assert_eq!(response.header("x-token"), Some("abc"));
    assert_eq!(response.header("X-Signature"), None);
  }

  #[test]
  fn test_request_path_and_query() {
    let request = HttpRequest {
      method: Method::Get,
      url: "https://api.etilbudsavis.dk/v2/dealers?dealer_ids=d1%2Cd2&limit=2".to_string(),
      headers: Vec::new(),
      body: None,
      timeout: None,
    };
    assert_eq!(request.path(), "/v2/dealers");
    assert_eq!(request.query_param("dealer_ids").as_deref(), Some("d1,d2"));
    assert_eq!(request.query_param("offset"), None);
  }
}
