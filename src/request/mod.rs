//! Request descriptors.
//!
//! A [`Request`] is data, not a class per endpoint: method, URL, parameters,
//! cache policy, a parser turning the JSON body into `T`, and a function
//! describing which cache entries a response produces. The
//! [`RequestQueue`](crate::queue::RequestQueue) takes ownership of it on
//! submission; the caller keeps a [`RequestHandle`] for cancellation and
//! diagnostics.

mod debugger;
mod key;
mod list;
mod log;

pub use debugger::{RequestDebugger, TracingDebugger};
pub use key::{cache_key, encode_params, split_url, ParamsEncoding};
pub use list::{Filter, ListRequest, Order, Parameter, DEFAULT_LIMIT};
pub use log::{Event, EventLog};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::cache::{Cache, Item};
use crate::delivery::Delivery;
use crate::error::{Error, Result};

/// Default time a cached response stays fresh.
pub const DEFAULT_TTL_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
    }
  }

  /// POST and PUT send their parameters as a urlencoded body.
  pub fn has_body(&self) -> bool {
    matches!(self, Method::Post | Method::Put)
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
  Low,
  #[default]
  Medium,
  High,
}

/// Position of a request in the dispatch order.
///
/// Orders HIGH before LOW and, within a priority band, lower sequence numbers
/// first. The smaller `Schedule` is selected for execution first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
  pub priority: Priority,
  pub sequence: u64,
}

impl Ord for Schedule {
  fn cmp(&self, other: &Self) -> std::cmp::Ordering {
    other
      .priority
      .cmp(&self.priority)
      .then_with(|| self.sequence.cmp(&other.sequence))
  }
}

impl PartialOrd for Schedule {
  fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
    Some(self.cmp(other))
  }
}

/// Correlation token grouping requests for bulk cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(u64);

impl Tag {
  pub fn new() -> Self {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    Tag(NEXT.fetch_add(1, Ordering::Relaxed))
  }
}

impl Default for Tag {
  fn default() -> Self {
    Self::new()
  }
}

type CancelHook = Box<dyn FnOnce() + Send>;

/// State shared between a request, its handle and the queue.
#[derive(Default)]
pub(crate) struct RequestState {
  canceled: AtomicBool,
  finished: AtomicBool,
  cache_hit: AtomicBool,
  cache_item: Mutex<Option<Item>>,
  on_cancel: Mutex<Vec<CancelHook>>,
  log: EventLog,
}

impl RequestState {
  pub(crate) fn is_canceled(&self) -> bool {
    self.canceled.load(Ordering::SeqCst)
  }

  pub(crate) fn is_finished(&self) -> bool {
    self.finished.load(Ordering::SeqCst)
  }

  pub(crate) fn finish(&self) {
    self.finished.store(true, Ordering::SeqCst);
  }

  pub(crate) fn log(&self) -> &EventLog {
    &self.log
  }

  pub(crate) fn mark_cache_hit(&self, item: Item) {
    self.cache_hit.store(true, Ordering::SeqCst);
    *self.cache_item.lock() = Some(item);
  }

  /// Flag the request as canceled and run cancel hooks. Idempotent.
  pub(crate) fn cancel(&self) {
    let hooks = {
      let mut hooks = self.on_cancel.lock();
      if self.canceled.swap(true, Ordering::SeqCst) {
        return;
      }
      std::mem::take(&mut *hooks)
    };
    self.log.add("canceled");
    for hook in hooks {
      hook();
    }
  }

  /// Run `hook` when the request is canceled, or right away if it already is.
  pub(crate) fn on_cancel(&self, hook: impl FnOnce() + Send + 'static) {
    {
      let mut hooks = self.on_cancel.lock();
      if !self.is_canceled() {
        hooks.push(Box::new(hook));
        return;
      }
    }
    hook();
  }
}

/// Caller-side view of a submitted request.
#[derive(Clone)]
pub struct RequestHandle {
  state: Arc<RequestState>,
}

impl RequestHandle {
  pub(crate) fn new(state: Arc<RequestState>) -> Self {
    Self { state }
  }

  /// A handle for work that finished without ever being queued.
  pub(crate) fn finished() -> Self {
    let state = RequestState::default();
    state.finish();
    Self::new(Arc::new(state))
  }

  pub(crate) fn state(&self) -> &Arc<RequestState> {
    &self.state
  }

  /// Cancel the request. No listener fires afterwards. Idempotent.
  pub fn cancel(&self) {
    self.state.cancel();
  }

  pub fn is_canceled(&self) -> bool {
    self.state.is_canceled()
  }

  pub fn is_finished(&self) -> bool {
    self.state.is_finished()
  }

  /// True when the result was served from the cache.
  pub fn is_cache_hit(&self) -> bool {
    self.state.cache_hit.load(Ordering::SeqCst)
  }

  /// The cache item the request was served from, if any.
  pub fn cache_item(&self) -> Option<Item> {
    self.state.cache_item.lock().clone()
  }

  pub fn log(&self) -> &EventLog {
    &self.state.log
  }
}

impl fmt::Debug for RequestHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RequestHandle")
      .field("canceled", &self.is_canceled())
      .field("finished", &self.is_finished())
      .field("cache_hit", &self.is_cache_hit())
      .finish()
  }
}

/// The untyped part of a request: everything the queue and cache look at.
pub struct RequestMeta {
  method: Method,
  url: String,
  params: BTreeMap<String, String>,
  injected: BTreeMap<String, String>,
  headers: BTreeMap<String, String>,
  priority: Priority,
  sequence: u64,
  skip_cache: bool,
  cache_response: bool,
  cache_only: bool,
  use_location: bool,
  timeout: Option<Duration>,
  ttl: chrono::Duration,
  tag: Option<Tag>,
  encoding: Option<ParamsEncoding>,
  debugger: Option<Arc<dyn RequestDebugger>>,
  url_error: Option<Error>,
  state: Arc<RequestState>,
}

impl RequestMeta {
  fn new(method: Method, url: &str) -> Self {
    let (url, params, url_error) = match split_url(url) {
      Ok((base, pairs)) => (base, pairs.into_iter().collect(), None),
      Err(e) => (url.to_string(), BTreeMap::new(), Some(e)),
    };

    Self {
      method,
      url,
      params,
      injected: BTreeMap::new(),
      headers: BTreeMap::new(),
      priority: Priority::default(),
      sequence: 0,
      skip_cache: false,
      cache_response: true,
      cache_only: false,
      use_location: true,
      timeout: None,
      ttl: chrono::Duration::seconds(DEFAULT_TTL_SECS),
      tag: None,
      encoding: None,
      debugger: None,
      url_error,
      state: Arc::new(RequestState::default()),
    }
  }

  pub fn method(&self) -> Method {
    self.method
  }

  /// Request URL without its query string.
  pub fn url(&self) -> &str {
    &self.url
  }

  pub fn params(&self) -> &BTreeMap<String, String> {
    &self.params
  }

  /// Parameters the queue added from its context (api key, location). They
  /// are also part of [`params`](Self::params).
  pub fn injected_params(&self) -> &BTreeMap<String, String> {
    &self.injected
  }

  pub fn headers(&self) -> &BTreeMap<String, String> {
    &self.headers
  }

  pub fn priority(&self) -> Priority {
    self.priority
  }

  pub fn sequence(&self) -> u64 {
    self.sequence
  }

  pub fn schedule(&self) -> Schedule {
    Schedule {
      priority: self.priority,
      sequence: self.sequence,
    }
  }

  pub fn skip_cache(&self) -> bool {
    self.skip_cache
  }

  pub fn cache_response(&self) -> bool {
    self.cache_response
  }

  pub fn cache_only(&self) -> bool {
    self.cache_only
  }

  pub fn use_location(&self) -> bool {
    self.use_location
  }

  pub fn timeout(&self) -> Option<Duration> {
    self.timeout
  }

  pub fn ttl(&self) -> chrono::Duration {
    self.ttl
  }

  pub fn tag(&self) -> Option<Tag> {
    self.tag
  }

  pub fn encoding(&self) -> ParamsEncoding {
    self.encoding.unwrap_or_default()
  }

  pub fn debugger(&self) -> Option<&Arc<dyn RequestDebugger>> {
    self.debugger.as_ref()
  }

  pub fn cache_key(&self) -> String {
    cache_key(self.method, &self.url, &self.params)
  }

  pub fn is_cache_hit(&self) -> bool {
    self.state.cache_hit.load(Ordering::SeqCst)
  }

  pub fn is_canceled(&self) -> bool {
    self.state.is_canceled()
  }

  pub fn log(&self) -> &EventLog {
    &self.state.log
  }

  /// Urlencoded body for POST/PUT, `None` for other methods or no parameters.
  pub fn body(&self) -> Option<Vec<u8>> {
    if !self.method.has_body() || self.params.is_empty() {
      return None;
    }
    Some(encode_params(&self.params, self.encoding()).into_bytes())
  }

  pub fn body_content_type(&self) -> String {
    self.encoding().content_type()
  }

  pub(crate) fn state(&self) -> &Arc<RequestState> {
    &self.state
  }

  pub(crate) fn set_sequence(&mut self, sequence: u64) {
    self.sequence = sequence;
  }

  pub(crate) fn take_url_error(&mut self) -> Option<Error> {
    self.url_error.take()
  }

  /// Add a context parameter unless the caller already set it.
  pub(crate) fn merge_param(&mut self, name: &str, value: String) {
    if self.params.contains_key(name) {
      return;
    }
    self.params.insert(name.to_string(), value.clone());
    self.injected.insert(name.to_string(), value);
  }

  /// Use `encoding` unless the request chose one itself.
  pub(crate) fn default_encoding(&mut self, encoding: ParamsEncoding) {
    self.encoding.get_or_insert(encoding);
  }

  pub(crate) fn set_tag(&mut self, tag: Tag) {
    self.tag = Some(tag);
  }
}

impl fmt::Debug for RequestMeta {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RequestMeta")
      .field("method", &self.method)
      .field("url", &self.url)
      .field("params", &self.params)
      .field("priority", &self.priority)
      .field("sequence", &self.sequence)
      .field("skip_cache", &self.skip_cache)
      .field("cache_response", &self.cache_response)
      .field("cache_only", &self.cache_only)
      .field("tag", &self.tag)
      .finish_non_exhaustive()
  }
}

/// A parsed network response plus the cache entries it produces.
#[derive(Debug, Clone)]
pub struct Response {
  pub data: Value,
  pub cache: Option<Vec<(String, Item)>>,
}

pub type Parser<T> = Arc<dyn Fn(&Value) -> Result<T> + Send + Sync>;

/// Maps a response body to the cache entries it should populate.
pub type CacheEntries = Arc<dyn Fn(&RequestMeta, &Value) -> Vec<(String, Value)> + Send + Sync>;

/// Cache the body under the request's own key.
pub fn cache_whole() -> CacheEntries {
  Arc::new(|meta: &RequestMeta, value: &Value| vec![(meta.cache_key(), value.clone())])
}

/// Cache a list body under the request's key and every element that carries
/// an `id` under its single-object key (`GET:/v2/<resource>/<id>`).
///
/// Element keys carry the same context parameters as the list request, so a
/// later object request through the same queue lands on them.
pub fn cache_whole_and_elements() -> CacheEntries {
  Arc::new(|meta: &RequestMeta, value: &Value| {
    let mut entries = vec![(meta.cache_key(), value.clone())];
    if let Some(elements) = value.as_array() {
      for element in elements {
        if let Some(id) = element.get("id").and_then(Value::as_str) {
          let path = format!("{}/{}", meta.url(), id);
          entries.push((
            cache_key(Method::Get, &path, meta.injected_params()),
            element.clone(),
          ));
        }
      }
    }
    entries
  })
}

/// Deserialize the body straight into `T`.
pub fn json_parser<T: DeserializeOwned + 'static>() -> Parser<T> {
  Arc::new(|value: &Value| serde_json::from_value(value.clone()).map_err(Error::from))
}

/// A request for one endpoint, carrying its own parser.
pub struct Request<T> {
  meta: RequestMeta,
  parser: Parser<T>,
  cache_entries: CacheEntries,
  delivery: Option<Arc<dyn Delivery>>,
}

impl<T> Request<T> {
  pub fn new<F>(method: Method, url: &str, parser: F) -> Self
  where
    F: Fn(&Value) -> Result<T> + Send + Sync + 'static,
  {
    Self {
      meta: RequestMeta::new(method, url),
      parser: Arc::new(parser),
      cache_entries: cache_whole(),
      delivery: None,
    }
  }

  pub fn meta(&self) -> &RequestMeta {
    &self.meta
  }

  pub(crate) fn meta_mut(&mut self) -> &mut RequestMeta {
    &mut self.meta
  }

  /// Handle sharing this request's cancellation flag and event log.
  pub fn handle(&self) -> RequestHandle {
    RequestHandle::new(Arc::clone(&self.meta.state))
  }

  pub fn with_param(mut self, name: &str, value: impl ToString) -> Self {
    self.meta.params.insert(name.to_string(), value.to_string());
    self
  }

  pub fn with_params<I, K, V>(mut self, params: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
  {
    self
      .meta
      .params
      .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
    self
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.meta.headers.insert(name.to_string(), value.into());
    self
  }

  pub fn with_priority(mut self, priority: Priority) -> Self {
    self.meta.priority = priority;
    self
  }

  /// Never serve this request from the cache.
  pub fn skip_cache(mut self, skip: bool) -> Self {
    self.meta.skip_cache = skip;
    self
  }

  /// Whether the response may be stored in the cache.
  pub fn cache_response(mut self, cache: bool) -> Self {
    self.meta.cache_response = cache;
    self
  }

  /// Only answer from the cache; a miss is delivered as [`Error::CacheMiss`].
  pub fn cache_only(mut self, only: bool) -> Self {
    self.meta.cache_only = only;
    self
  }

  pub fn use_location(mut self, use_location: bool) -> Self {
    self.meta.use_location = use_location;
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.meta.timeout = Some(timeout);
    self
  }

  pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
    self.meta.ttl = ttl;
    self
  }

  pub fn with_tag(mut self, tag: Tag) -> Self {
    self.meta.tag = Some(tag);
    self
  }

  pub fn with_encoding(mut self, encoding: ParamsEncoding) -> Self {
    self.meta.encoding = Some(encoding);
    self
  }

  pub fn with_debugger(mut self, debugger: Arc<dyn RequestDebugger>) -> Self {
    self.meta.debugger = Some(debugger);
    self
  }

  /// Deliver this request's result through `delivery` instead of the
  /// queue's default.
  pub fn with_delivery(mut self, delivery: Arc<dyn Delivery>) -> Self {
    self.delivery = Some(delivery);
    self
  }

  pub fn with_cache_entries(mut self, entries: CacheEntries) -> Self {
    self.cache_entries = entries;
    self
  }

  pub(crate) fn delivery(&self) -> Option<&Arc<dyn Delivery>> {
    self.delivery.as_ref()
  }

  /// Run the parser, storing cache entries when parsing succeeds and a cache
  /// is given.
  pub(crate) fn parse(&self, value: Value, cache: Option<&dyn Cache>, now: DateTime<Utc>) -> Result<T> {
    let parsed = (self.parser)(&value);
    match &parsed {
      Ok(_) => {
        if let Some(cache) = cache {
          let entries = (self.cache_entries)(&self.meta, &value)
            .into_iter()
            .map(|(key, payload)| (key, Item::new(payload, now, self.meta.ttl)))
            .collect();
          let response = Response {
            data: value,
            cache: Some(entries),
          };
          cache.put(&self.meta, &response);
        }
      }
      Err(e) => {
        self
          .meta
          .log()
          .add_with_detail("parse-error", format!("{}: {}", e, value));
      }
    }
    parsed
  }
}

impl<T: DeserializeOwned + 'static> Request<T> {
  /// A request whose JSON body deserializes into `T`.
  pub fn json(method: Method, url: &str) -> Self {
    let parser = json_parser::<T>();
    Self::new(method, url, move |value| parser(value))
  }

  /// GET a single object.
  pub fn object(url: &str) -> Self {
    Self::json(Method::Get, url)
  }
}

impl<T: DeserializeOwned + 'static> Request<Vec<T>> {
  /// GET a list; each element with an `id` is also cached on its own.
  pub fn list(url: &str) -> Self {
    Self::json(Method::Get, url).with_cache_entries(cache_whole_and_elements())
  }
}

impl<T> fmt::Debug for Request<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Request")
      .field("meta", &self.meta)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_schedule_orders_priority_then_sequence() {
    let a = Schedule {
      priority: Priority::High,
      sequence: 1,
    };
    let b = Schedule {
      priority: Priority::High,
      sequence: 2,
    };
    let c = Schedule {
      priority: Priority::Low,
      sequence: 0,
    };

    assert!(a < b);
    assert!(b < c);
    assert!(a < c);

    let mut all = vec![c, b, a];
    all.sort();
    assert_eq!(all, vec![a, b, c]);
  }

  #[test]
  fn test_url_query_becomes_params() {
    let request: Request<Value> = Request::object("/v2/offers?offer_ids=A,B");
    assert_eq!(request.meta().url(), "/v2/offers");
    assert_eq!(request.meta().cache_key(), "GET:/v2/offers?offer_ids=A,B");
  }

  #[test]
  fn test_builder_params_share_cache_slot() {
    let a: Request<Value> = Request::object("/v2/stores")
      .with_param("store_ids", "s1")
      .with_param("limit", 1);
    let b: Request<Value> = Request::object("/v2/stores?limit=1").with_param("store_ids", "s1");
    assert_eq!(a.meta().cache_key(), b.meta().cache_key());
  }

  #[test]
  fn test_body_only_for_post_and_put() {
    let get: Request<Value> = Request::json(Method::Get, "/v2/sessions").with_param("token_ttl", 60);
    assert_eq!(get.meta().body(), None);

    let post: Request<Value> =
      Request::json(Method::Post, "/v2/sessions").with_param("email", "a@b.dk");
    assert_eq!(post.meta().body(), Some(b"email=a%40b.dk".to_vec()));
    assert_eq!(
      post.meta().body_content_type(),
      "application/x-www-form-urlencoded; charset=utf-8"
    );
  }

  #[test]
  fn test_cancel_is_idempotent_and_runs_hooks_once() {
    let request: Request<Value> = Request::object("/v2/offers");
    let handle = request.handle();
    let count = Arc::new(AtomicU64::new(0));

    let c = count.clone();
    handle.state().on_cancel(move || {
      c.fetch_add(1, Ordering::SeqCst);
    });

    handle.cancel();
    handle.cancel();
    assert!(handle.is_canceled());
    assert_eq!(count.load(Ordering::SeqCst), 1);

    // Hooks registered after cancellation run immediately
    let c = count.clone();
    handle.state().on_cancel(move || {
      c.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(count.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn test_list_cache_entries_include_elements() {
    let request: Request<Vec<Value>> = Request::list("/v2/dealers").with_param("dealer_ids", "d1,d2");
    let body = json!([{"id": "d1"}, {"id": "d2"}, {"name": "no id"}]);
    let entries = (request.cache_entries)(request.meta(), &body);
    let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(
      keys,
      vec![
        "GET:/v2/dealers?dealer_ids=d1,d2",
        "GET:/v2/dealers/d1",
        "GET:/v2/dealers/d2"
      ]
    );
  }

  #[test]
  fn test_element_keys_carry_context_params() {
    let mut request: Request<Vec<Value>> = Request::list("/v2/offers?offer_ids=A&r_radius=100");
    request.meta_mut().merge_param("api_key", "key".to_string());
    request.meta_mut().merge_param("r_radius", "700".to_string());
    assert_eq!(request.meta().params()["r_radius"], "100");
    assert_eq!(request.meta().injected_params().len(), 1);

    let entries = (request.cache_entries)(request.meta(), &json!([{"id": "A"}]));
    assert_eq!(entries[0].0, "GET:/v2/offers?api_key=key&offer_ids=A&r_radius=100");
    assert_eq!(entries[1].0, "GET:/v2/offers/A?api_key=key");
  }

  #[test]
  fn test_parse_error_is_logged_with_body() {
    let request: Request<Vec<String>> = Request::list("/v2/offers");
    let result = request.parse(json!({"unexpected": true}), None, Utc::now());
    assert!(matches!(result, Err(Error::Parse(_))));
    let events = request.meta().log().events();
    let event = events.iter().find(|e| e.name == "parse-error").unwrap();
    assert!(event.detail.as_deref().unwrap().contains("unexpected"));
  }

  #[test]
  fn test_malformed_url_is_deferred() {
    let mut request: Request<Value> = Request::object("https://bad host/v2");
    assert!(matches!(
      request.meta_mut().take_url_error(),
      Some(Error::InvalidUrl { .. })
    ));
  }
}
