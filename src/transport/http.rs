use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{HttpRequest, HttpResponse, Transport, TransportError};
use crate::request::Method;

/// Default connect timeout for the underlying client.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// [`Transport`] backed by a pooled `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
  client: reqwest::Client,
}

impl ReqwestTransport {
  pub fn new() -> Result<Self, TransportError> {
    let client = reqwest::Client::builder()
      .connect_timeout(CONNECT_TIMEOUT)
      .user_agent(concat!("sgn/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| TransportError::Other(format!("Failed to create HTTP client: {}", e)))?;
    Ok(Self { client })
  }

  pub fn with_client(client: reqwest::Client) -> Self {
    Self { client }
  }

  fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Delete => reqwest::Method::DELETE,
    }
  }
}

impl std::fmt::Debug for ReqwestTransport {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ReqwestTransport").finish_non_exhaustive()
  }
}

#[async_trait]
impl Transport for ReqwestTransport {
  async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
    debug!(method = %request.method, url = %request.url, "executing request");

    let mut builder = self
      .client
      .request(Self::to_reqwest_method(request.method), &request.url);
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(timeout) = request.timeout {
      builder = builder.timeout(timeout);
    }
    if let Some(body) = request.body {
      builder = builder.body(body);
    }

    let response = builder.send().await.map_err(map_error)?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
      .collect();
    let body = response.bytes().await.map_err(map_error)?.to_vec();

    debug!(status, bytes = body.len(), "response received");
    Ok(HttpResponse {
      status,
      headers,
      body,
    })
  }
}

fn map_error(e: reqwest::Error) -> TransportError {
  if e.is_timeout() {
    TransportError::Timeout
  } else if e.is_connect() {
    TransportError::Connect(e.to_string())
  } else {
    TransportError::Other(e.to_string())
  }
}
