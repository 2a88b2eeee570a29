//! Scripted transport for tests.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Semaphore;

use super::{HttpRequest, HttpResponse, Transport, TransportError};

type Handler = Arc<dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync>;

/// Answers every call through a handler closure and records the calls.
///
/// With a gate, each call waits for a permit before answering, which lets a
/// test hold a request in flight.
#[derive(Clone)]
pub(crate) struct MockTransport {
  handler: Handler,
  calls: Arc<Mutex<Vec<HttpRequest>>>,
  gate: Option<Arc<Semaphore>>,
}

impl MockTransport {
  pub(crate) fn new<F>(handler: F) -> Self
  where
    F: Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
  {
    Self {
      handler: Arc::new(handler),
      calls: Arc::new(Mutex::new(Vec::new())),
      gate: None,
    }
  }

  /// Reply `200` with a JSON body chosen by the request.
  pub(crate) fn json<F>(respond: F) -> Self
  where
    F: Fn(&HttpRequest) -> Value + Send + Sync + 'static,
  {
    Self::new(move |request| Ok(HttpResponse::json(200, &respond(request))))
  }

  /// Hold every call until [`release`](Self::release) hands out a permit.
  pub(crate) fn gated(mut self) -> Self {
    self.gate = Some(Arc::new(Semaphore::new(0)));
    self
  }

  pub(crate) fn release(&self, calls: usize) {
    if let Some(gate) = &self.gate {
      gate.add_permits(calls);
    }
  }

  pub(crate) fn calls(&self) -> Vec<HttpRequest> {
    self.calls.lock().clone()
  }

  pub(crate) fn paths(&self) -> Vec<String> {
    self.calls.lock().iter().map(HttpRequest::path).collect()
  }

  pub(crate) fn call_count(&self) -> usize {
    self.calls.lock().len()
  }
}

#[async_trait]
impl Transport for MockTransport {
  async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
    self.calls.lock().push(request.clone());
    if let Some(gate) = &self.gate {
      if let Ok(permit) = gate.acquire().await {
        permit.forget();
      }
    }
    (self.handler)(&request)
  }
}
