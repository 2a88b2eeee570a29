//! Request queue and dispatch workers.
//!
//! [`RequestQueue::add`] answers fresh cache hits right away and pushes
//! everything else onto a priority heap drained by a fixed pool of tokio
//! worker tasks. Workers pick the smallest [`Schedule`](crate::request::Schedule)
//! (HIGH before LOW, then FIFO), call the [`Transport`], parse, store cache
//! entries and hand the result to a [`Delivery`].

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::api::{header, param};
use crate::cache::Cache;
use crate::context::Context;
use crate::delivery::{Delivery, ExecutorDelivery, InlineDelivery};
use crate::error::{Error, Result};
use crate::pending::PendingResponse;
use crate::request::{Method, Request, RequestHandle, RequestMeta, RequestState, Schedule, Tag};
use crate::transport::{HttpRequest, HttpResponse, Transport, TransportError};

/// Callback receiving a request's outcome. Called at most once.
pub type Listener<T> = Box<dyn FnOnce(Result<T>) + Send + 'static>;

/// A submitted request with its type erased, as the workers see it.
pub(crate) trait Job: Send {
  fn meta(&self) -> &RequestMeta;

  fn meta_mut(&mut self) -> &mut RequestMeta;

  /// Parse `outcome`, store cache entries when `cache` is given, and hand the
  /// result to the request's delivery (or `fallback`).
  fn complete(
    self: Box<Self>,
    outcome: Result<Value>,
    cache: Option<&dyn Cache>,
    now: DateTime<Utc>,
    fallback: &Arc<dyn Delivery>,
  );
}

struct TypedJob<T> {
  request: Request<T>,
  listener: Listener<T>,
}

impl<T: Send + 'static> Job for TypedJob<T> {
  fn meta(&self) -> &RequestMeta {
    self.request.meta()
  }

  fn meta_mut(&mut self) -> &mut RequestMeta {
    self.request.meta_mut()
  }

  fn complete(
    self: Box<Self>,
    outcome: Result<Value>,
    cache: Option<&dyn Cache>,
    now: DateTime<Utc>,
    fallback: &Arc<dyn Delivery>,
  ) {
    let TypedJob { request, listener } = *self;
    let result = outcome.and_then(|value| request.parse(value, cache, now));
    let delivery = request
      .delivery()
      .cloned()
      .unwrap_or_else(|| Arc::clone(fallback));
    deliver(request.meta(), result, listener, delivery.as_ref());
  }
}

/// Post `result` to `delivery`. The cancellation flag is checked again on the
/// delivery side; a canceled request drops its listener uncalled.
fn deliver<T: Send + 'static>(
  meta: &RequestMeta,
  result: Result<T>,
  listener: Listener<T>,
  delivery: &dyn Delivery,
) {
  let state = Arc::clone(meta.state());
  let key = meta.cache_key();
  let debugger = meta.debugger().cloned();
  state.log().add("post-response");

  delivery.deliver(Box::new(move || {
    if state.is_canceled() {
      state.log().add("canceled-at-delivery");
      state.finish();
      if let Some(debugger) = debugger {
        debugger.on_finish(&key, state.log(), Some(&Error::Canceled));
      }
      return;
    }
    state.log().add("delivered");
    state.finish();
    if let Some(debugger) = debugger {
      debugger.on_finish(&key, state.log(), result.as_ref().err());
    }
    listener(result);
  }));
}

/// Heap entry; `BinaryHeap` is a max-heap so the order is reversed.
struct Pending {
  schedule: Schedule,
  job: Box<dyn Job>,
}

impl PartialEq for Pending {
  fn eq(&self, other: &Self) -> bool {
    self.schedule == other.schedule
  }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
  fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
    Some(self.cmp(other))
  }
}

impl Ord for Pending {
  fn cmp(&self, other: &Self) -> CmpOrdering {
    other.schedule.cmp(&self.schedule)
  }
}

struct QueueInner {
  ctx: Context,
  cache: Arc<dyn Cache>,
  transport: Arc<dyn Transport>,
  delivery: Arc<dyn Delivery>,
  sequence: AtomicU64,
  pending: Mutex<BinaryHeap<Pending>>,
  notify: Notify,
  registry: Mutex<Vec<(Tag, Weak<RequestState>)>>,
  workers: Mutex<Vec<JoinHandle<()>>>,
  /// Shutdown flag of the current worker generation.
  shutdown: Mutex<Option<watch::Sender<bool>>>,
  running: AtomicUsize,
}

/// Accepts requests, answers from the cache when it can and runs the rest on
/// a bounded worker pool.
///
/// Cloning is cheap; clones share the same queue.
#[derive(Clone)]
pub struct RequestQueue {
  inner: Arc<QueueInner>,
}

/// Non-owning reference to a queue, held by cancel hooks.
#[derive(Clone)]
pub(crate) struct WeakQueue(Weak<QueueInner>);

impl WeakQueue {
  pub(crate) fn upgrade(&self) -> Option<RequestQueue> {
    self.0.upgrade().map(|inner| RequestQueue { inner })
  }
}

impl RequestQueue {
  /// Queue delivering on the current tokio runtime, or inline on the worker
  /// when created outside one.
  pub fn new(ctx: Context, cache: Arc<dyn Cache>, transport: Arc<dyn Transport>) -> Self {
    let delivery: Arc<dyn Delivery> = match tokio::runtime::Handle::try_current() {
      Ok(handle) => Arc::new(ExecutorDelivery::new(handle)),
      Err(_) => Arc::new(InlineDelivery),
    };
    Self::with_delivery(ctx, cache, transport, delivery)
  }

  pub fn with_delivery(
    ctx: Context,
    cache: Arc<dyn Cache>,
    transport: Arc<dyn Transport>,
    delivery: Arc<dyn Delivery>,
  ) -> Self {
    Self {
      inner: Arc::new(QueueInner {
        ctx,
        cache,
        transport,
        delivery,
        sequence: AtomicU64::new(0),
        pending: Mutex::new(BinaryHeap::new()),
        notify: Notify::new(),
        registry: Mutex::new(Vec::new()),
        workers: Mutex::new(Vec::new()),
        shutdown: Mutex::new(None),
        running: AtomicUsize::new(0),
      }),
    }
  }

  pub fn context(&self) -> &Context {
    &self.inner.ctx
  }

  pub fn cache(&self) -> &Arc<dyn Cache> {
    &self.inner.cache
  }

  pub(crate) fn downgrade(&self) -> WeakQueue {
    WeakQueue(Arc::downgrade(&self.inner))
  }

  /// Spawn the dispatch workers. Must run inside a tokio runtime; calling it
  /// on a running queue does nothing.
  pub fn start(&self) {
    let mut workers = self.inner.workers.lock();
    if !workers.is_empty() {
      return;
    }
    let (shutdown, _) = watch::channel(false);
    for id in 0..self.inner.ctx.workers {
      let inner = Arc::clone(&self.inner);
      workers.push(tokio::spawn(run_worker(inner, id, shutdown.subscribe())));
    }
    *self.inner.shutdown.lock() = Some(shutdown);
    info!(workers = workers.len(), "request queue started");
  }

  /// Stop the workers and cancel everything still waiting in the queue.
  /// Requests already on the wire finish and are delivered.
  pub fn stop(&self) {
    let mut workers_guard = self.inner.workers.lock();
    if let Some(shutdown) = self.inner.shutdown.lock().take() {
      shutdown.send_replace(true);
    }
    let workers = std::mem::take(&mut *workers_guard);
    drop(workers_guard);
    let drained: Vec<Pending> = self.inner.pending.lock().drain().collect();
    for pending in &drained {
      let state = pending.job.meta().state();
      state.cancel();
      state.finish();
    }
    info!(
      workers = workers.len(),
      dropped = drained.len(),
      "request queue stopped"
    );
  }

  /// Number of dispatch workers still running, including ones from a stopped
  /// generation that are finishing an in-flight request.
  pub fn running_workers(&self) -> usize {
    self.inner.running.load(Ordering::SeqCst)
  }

  /// Number of requests waiting for a worker.
  pub fn pending_len(&self) -> usize {
    self.inner.pending.lock().len()
  }

  /// Submit `request`; `listener` receives the outcome unless the request is
  /// canceled first.
  pub fn add<T, F>(&self, mut request: Request<T>, listener: F) -> RequestHandle
  where
    T: Send + 'static,
    F: FnOnce(Result<T>) + Send + 'static,
  {
    let handle = request.handle();
    let meta = request.meta_mut();
    meta.set_sequence(self.inner.sequence.fetch_add(1, Ordering::SeqCst));
    meta.default_encoding(self.inner.ctx.encoding);
    meta.log().add("added-to-queue");
    if let Some(tag) = meta.tag() {
      self.register(tag, meta.state());
    }

    self.inner.dispatch(Box::new(TypedJob {
      request,
      listener: Box::new(listener),
    }));
    handle
  }

  /// Submit `request` and await its outcome. Resolves to
  /// [`Error::Canceled`] if the request is canceled.
  pub fn send<T: Send + 'static>(&self, request: Request<T>) -> PendingResponse<T> {
    let (tx, rx) = oneshot::channel();
    let handle = self.add(request, move |result| {
      let _ = tx.send(result);
    });
    PendingResponse::new(rx, handle)
  }

  /// Cancel every outstanding request carrying `tag`: queued, in flight or
  /// awaiting delivery. Returns how many were canceled.
  pub fn cancel_all(&self, tag: Tag) -> usize {
    let targets: Vec<Arc<RequestState>> = {
      let mut registry = self.inner.registry.lock();
      prune(&mut registry);
      registry
        .iter()
        .filter(|(t, _)| *t == tag)
        .filter_map(|(_, state)| state.upgrade())
        .filter(|state| !state.is_canceled())
        .collect()
    };
    // Cancel hooks may re-enter the queue, so the registry lock is released
    for state in &targets {
      state.cancel();
    }
    debug!(?tag, canceled = targets.len(), "canceled requests by tag");
    targets.len()
  }

  pub(crate) fn register(&self, tag: Tag, state: &Arc<RequestState>) {
    let mut registry = self.inner.registry.lock();
    prune(&mut registry);
    registry.push((tag, Arc::downgrade(state)));
  }
}

fn prune(registry: &mut Vec<(Tag, Weak<RequestState>)>) {
  registry.retain(|(_, state)| state.upgrade().is_some_and(|s| !s.is_finished()));
}

impl fmt::Debug for RequestQueue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RequestQueue")
      .field("ctx", &self.inner.ctx)
      .field("pending", &self.pending_len())
      .field("workers", &self.inner.workers.lock().len())
      .finish_non_exhaustive()
  }
}

impl QueueInner {
  fn dispatch(&self, mut job: Box<dyn Job>) {
    if let Some(error) = job.meta_mut().take_url_error() {
      job.meta().log().add_with_detail("invalid-url", error.to_string());
      job.complete(Err(error), None, self.ctx.clock.now(), &self.delivery);
      return;
    }

    if job.meta().use_location() {
      if let Some(location) = self.ctx.location.location() {
        for (name, value) in location.to_params() {
          job.meta_mut().merge_param(name, value);
        }
      }
    }
    if let Some(api_key) = &self.ctx.api_key {
      job.meta_mut().merge_param(param::API_KEY, api_key.clone());
    }

    let meta = job.meta();
    if meta.is_canceled() {
      meta.log().add("canceled-before-dispatch");
      meta.state().finish();
      return;
    }

    let key = meta.cache_key();
    let cached = if meta.method() == Method::Get && !meta.skip_cache() {
      self.cache.get(&key)
    } else {
      None
    };

    match cached {
      Some(item) => {
        meta.log().add("cache-hit");
        let payload = item.payload().clone();
        meta.state().mark_cache_hit(item);
        debug!(key = %key, "serving request from cache");
        job.complete(Ok(payload), None, self.ctx.clock.now(), &self.delivery);
      }
      None if meta.cache_only() => {
        meta.log().add("cache-miss");
        job.complete(
          Err(Error::CacheMiss { key }),
          None,
          self.ctx.clock.now(),
          &self.delivery,
        );
      }
      None => {
        meta.log().add("cache-miss");
        self.enqueue(job);
      }
    }
  }

  fn enqueue(&self, job: Box<dyn Job>) {
    let schedule = job.meta().schedule();
    self.pending.lock().push(Pending { schedule, job });
    self.notify.notify_one();
  }

  async fn execute(&self, job: Box<dyn Job>) {
    let state = Arc::clone(job.meta().state());
    if state.is_canceled() {
      state.log().add("network-discard-canceled");
      state.finish();
      return;
    }
    state.log().add("network-queue-take");

    let key = job.meta().cache_key();
    let timeout = job.meta().timeout().unwrap_or(self.ctx.default_timeout);
    let outcome = match self.http_request(job.meta(), timeout) {
      Ok(http) => self.perform(http, &key, &state, timeout).await,
      Err(e) => Err(e),
    };

    if let Err(e) = &outcome {
      debug!(key = %key, error = %e, "request failed");
    }
    job.complete(
      outcome,
      Some(self.cache.as_ref()),
      self.ctx.clock.now(),
      &self.delivery,
    );
  }

  fn http_request(&self, meta: &RequestMeta, timeout: Duration) -> Result<HttpRequest> {
    let raw = self.ctx.environment.apply(meta.url());
    let mut url = Url::parse(&raw).map_err(|e| Error::InvalidUrl {
      url: raw.clone(),
      reason: e.to_string(),
    })?;
    if !meta.method().has_body() && !meta.params().is_empty() {
      url.query_pairs_mut().extend_pairs(meta.params().iter());
    }

    let mut headers: Vec<(String, String)> = meta
      .headers()
      .iter()
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect();
    headers.extend(self.ctx.session.headers());

    let body = meta.body();
    if body.is_some() {
      headers.push((header::CONTENT_TYPE.to_string(), meta.body_content_type()));
    }

    Ok(HttpRequest {
      method: meta.method(),
      url: url.into(),
      headers,
      body,
      timeout: Some(timeout),
    })
  }

  async fn perform(
    &self,
    http: HttpRequest,
    key: &str,
    state: &RequestState,
    timeout: Duration,
  ) -> Result<Value> {
    let response = match tokio::time::timeout(timeout, self.transport.execute(http)).await {
      Err(_) | Ok(Err(TransportError::Timeout)) => return Err(Error::Timeout(timeout)),
      Ok(Err(e)) => return Err(Error::Transport(e.to_string())),
      Ok(Ok(response)) => response,
    };
    state
      .log()
      .add_with_detail("network-http-complete", response.status.to_string());
    self.ctx.session.on_response(&response.headers);

    match response.status {
      304 => match self.cache.get(key) {
        Some(item) => Ok(item.payload().clone()),
        None => {
          warn!(key, "not modified, but nothing cached");
          Err(Error::Api {
            status: 304,
            body: None,
          })
        }
      },
      _ if response.is_success() => parse_body(&response, state),
      status => Err(Error::Api {
        status,
        body: serde_json::from_slice(&response.body).ok(),
      }),
    }
  }
}

fn parse_body(response: &HttpResponse, state: &RequestState) -> Result<Value> {
  if response.body.is_empty() {
    return Ok(Value::Null);
  }
  serde_json::from_slice(&response.body).map_err(|e| {
    let raw = String::from_utf8_lossy(&response.body).into_owned();
    state
      .log()
      .add_with_detail("parse-error", format!("{}: {}", e, raw));
    Error::Parse(e.to_string())
  })
}

async fn run_worker(inner: Arc<QueueInner>, id: usize, mut shutdown: watch::Receiver<bool>) {
  inner.running.fetch_add(1, Ordering::SeqCst);
  debug!(worker = id, "dispatch worker started");
  loop {
    if *shutdown.borrow() {
      break;
    }
    let next = inner.pending.lock().pop();
    match next {
      Some(pending) => inner.execute(pending.job).await,
      None => {
        tokio::select! {
          _ = inner.notify.notified() => {}
          changed = shutdown.changed() => {
            if changed.is_err() {
              break;
            }
          }
        }
      }
    }
  }
  inner.running.fetch_sub(1, Ordering::SeqCst);
  debug!(worker = id, "dispatch worker stopped");
}
