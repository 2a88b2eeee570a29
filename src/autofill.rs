//! Hydration of related entities.
//!
//! Offers and catalogs reference stores, dealers and catalogs by id. Given a
//! list of records, auto-fill collects the referenced ids per relation and
//! issues one batched list request per relation (plus one pages/hotspots
//! request per catalog). The fetched entities land in a [`Relations`] side
//! table keyed by id; the records themselves are never mutated.
//!
//! Auto-fill runs as a [`LoaderRequest`], so it shares the loader's tag based
//! cancellation and error collection.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::api::{endpoint, param, DELIMITER};
use crate::error::{Error, Result};
use crate::loader::{LoaderPart, LoaderRequest};
use crate::model::{Catalog, Dealer, Hotspot, Images, Offer, Store};
use crate::pending::PendingResponse;
use crate::queue::RequestQueue;
use crate::request::{ListRequest, Method, Request, RequestDebugger, RequestHandle, RequestMeta, Tag};

/// Which relations to hydrate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutoFill {
  pub store: bool,
  pub dealer: bool,
  pub catalog: bool,
  pub pages: bool,
  pub hotspots: bool,
}

impl AutoFill {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn all() -> Self {
    Self {
      store: true,
      dealer: true,
      catalog: true,
      pages: true,
      hotspots: true,
    }
  }

  pub fn store(mut self, enabled: bool) -> Self {
    self.store = enabled;
    self
  }

  pub fn dealer(mut self, enabled: bool) -> Self {
    self.dealer = enabled;
    self
  }

  pub fn catalog(mut self, enabled: bool) -> Self {
    self.catalog = enabled;
    self
  }

  pub fn pages(mut self, enabled: bool) -> Self {
    self.pages = enabled;
    self
  }

  pub fn hotspots(mut self, enabled: bool) -> Self {
    self.hotspots = enabled;
    self
  }

  pub fn is_empty(&self) -> bool {
    !(self.store || self.dealer || self.catalog || self.pages || self.hotspots)
  }

  fn includes(&self, relation: Relation) -> bool {
    match relation {
      Relation::Store => self.store,
      Relation::Dealer => self.dealer,
      Relation::Catalog => self.catalog,
    }
  }
}

/// An id-referenced relation, fetched in one batched list request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
  Store,
  Dealer,
  Catalog,
}

impl Relation {
  pub fn endpoint(&self) -> &'static str {
    match self {
      Relation::Store => endpoint::STORE_LIST,
      Relation::Dealer => endpoint::DEALER_LIST,
      Relation::Catalog => endpoint::CATALOG_LIST,
    }
  }

  pub fn param(&self) -> &'static str {
    match self {
      Relation::Store => param::STORE_IDS,
      Relation::Dealer => param::DEALER_IDS,
      Relation::Catalog => param::CATALOG_IDS,
    }
  }
}

/// Records that reference other entities by id.
pub trait Fillable {
  fn relation_ids(&self, relation: Relation) -> Vec<String>;

  /// Catalogs whose pages and hotspots belong to this record.
  fn page_catalog_ids(&self) -> Vec<String> {
    Vec::new()
  }
}

impl Fillable for Offer {
  fn relation_ids(&self, relation: Relation) -> Vec<String> {
    let id = match relation {
      Relation::Store => &self.store_id,
      Relation::Dealer => &self.dealer_id,
      Relation::Catalog => &self.catalog_id,
    };
    id.iter().cloned().collect()
  }
}

impl Fillable for Catalog {
  fn relation_ids(&self, relation: Relation) -> Vec<String> {
    let id = match relation {
      Relation::Store => &self.store_id,
      Relation::Dealer => &self.dealer_id,
      Relation::Catalog => return Vec::new(),
    };
    id.iter().cloned().collect()
  }

  fn page_catalog_ids(&self) -> Vec<String> {
    vec![self.id.clone()]
  }
}

impl Fillable for Store {
  fn relation_ids(&self, relation: Relation) -> Vec<String> {
    match relation {
      Relation::Dealer => self.dealer_id.iter().cloned().collect(),
      _ => Vec::new(),
    }
  }
}

impl Fillable for Dealer {
  fn relation_ids(&self, _relation: Relation) -> Vec<String> {
    Vec::new()
  }
}

impl<T: Fillable> Fillable for Vec<T> {
  fn relation_ids(&self, relation: Relation) -> Vec<String> {
    self.iter().flat_map(|item| item.relation_ids(relation)).collect()
  }

  fn page_catalog_ids(&self) -> Vec<String> {
    self.iter().flat_map(Fillable::page_catalog_ids).collect()
  }
}

/// Entities with an id, as returned by the relation list endpoints.
trait Keyed {
  fn key(&self) -> &str;
}

impl Keyed for Store {
  fn key(&self) -> &str {
    &self.id
  }
}

impl Keyed for Dealer {
  fn key(&self) -> &str {
    &self.id
  }
}

impl Keyed for Catalog {
  fn key(&self) -> &str {
    &self.id
  }
}

/// Hydrated entities, keyed by id. Pages and hotspots are keyed by catalog id.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Relations {
  stores: HashMap<String, Store>,
  dealers: HashMap<String, Dealer>,
  catalogs: HashMap<String, Catalog>,
  pages: HashMap<String, Vec<Images>>,
  hotspots: HashMap<String, Vec<Hotspot>>,
}

impl Relations {
  pub fn store(&self, id: &str) -> Option<&Store> {
    self.stores.get(id)
  }

  pub fn dealer(&self, id: &str) -> Option<&Dealer> {
    self.dealers.get(id)
  }

  pub fn catalog(&self, id: &str) -> Option<&Catalog> {
    self.catalogs.get(id)
  }

  pub fn pages(&self, catalog_id: &str) -> Option<&[Images]> {
    self.pages.get(catalog_id).map(Vec::as_slice)
  }

  pub fn hotspots(&self, catalog_id: &str) -> Option<&[Hotspot]> {
    self.hotspots.get(catalog_id).map(Vec::as_slice)
  }

  fn stores_mut(&mut self) -> &mut HashMap<String, Store> {
    &mut self.stores
  }

  fn dealers_mut(&mut self) -> &mut HashMap<String, Dealer> {
    &mut self.dealers
  }

  fn catalogs_mut(&mut self) -> &mut HashMap<String, Catalog> {
    &mut self.catalogs
  }

  pub fn is_empty(&self) -> bool {
    self.stores.is_empty()
      && self.dealers.is_empty()
      && self.catalogs.is_empty()
      && self.pages.is_empty()
      && self.hotspots.is_empty()
  }
}

/// Data together with its hydrated relations and the failures of any
/// relation that could not be fetched.
#[derive(Debug, Clone)]
pub struct Filled<T> {
  pub data: T,
  pub relations: Relations,
  pub errors: Vec<Error>,
}

impl<T> Filled<T> {
  fn new(data: T) -> Self {
    Self {
      data,
      relations: Relations::default(),
      errors: Vec::new(),
    }
  }

  /// All relation failures as one error.
  pub fn error(&self) -> Option<Error> {
    Error::aggregate(self.errors.clone())
  }
}

/// Settings auto-fill sub-requests inherit from the request they complete.
#[derive(Clone)]
pub struct AutoFillParams {
  pub tag: Option<Tag>,
  pub debugger: Option<Arc<dyn RequestDebugger>>,
  pub use_location: bool,
  pub skip_cache: bool,
}

impl Default for AutoFillParams {
  fn default() -> Self {
    Self {
      tag: None,
      debugger: None,
      use_location: true,
      skip_cache: false,
    }
  }
}

impl AutoFillParams {
  pub fn from_meta(meta: &RequestMeta) -> Self {
    Self {
      tag: meta.tag(),
      debugger: meta.debugger().cloned(),
      use_location: meta.use_location(),
      skip_cache: meta.skip_cache(),
    }
  }

  fn apply<T: Send + 'static>(self, mut loader: LoaderRequest<T>) -> LoaderRequest<T> {
    if let Some(tag) = self.tag {
      loader = loader.with_tag(tag);
    }
    if let Some(debugger) = self.debugger {
      loader = loader.with_debugger(debugger);
    }
    loader
      .use_location(self.use_location)
      .skip_cache(self.skip_cache)
  }
}

impl std::fmt::Debug for AutoFillParams {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("AutoFillParams")
      .field("tag", &self.tag)
      .field("use_location", &self.use_location)
      .field("skip_cache", &self.skip_cache)
      .finish_non_exhaustive()
  }
}

/// Runs auto-fill for a value that has already been fetched.
#[derive(Debug, Clone)]
pub struct RequestAutoFill {
  auto_fill: AutoFill,
  params: AutoFillParams,
}

impl RequestAutoFill {
  pub fn new(auto_fill: AutoFill, params: AutoFillParams) -> Self {
    Self { auto_fill, params }
  }

  /// Hydrate `data`. Without data the listener receives `error` (or
  /// [`Error::DataAbsent`]) right away and nothing is requested. With data, a
  /// parent `error` is kept in [`Filled::errors`].
  pub fn execute<T, F>(
    self,
    queue: &RequestQueue,
    data: Option<T>,
    error: Option<Error>,
    listener: F,
  ) -> RequestHandle
  where
    T: Fillable + Send + 'static,
    F: FnOnce(Result<Filled<T>>) + Send + 'static,
  {
    let Some(data) = data else {
      listener(Err(error.unwrap_or(Error::DataAbsent)));
      return RequestHandle::finished();
    };

    let auto_fill = self.auto_fill;
    let mut loader = LoaderRequest::new(Filled::new(data), move |filled: &Filled<T>| {
      plan(&filled.data, auto_fill)
    });
    if let Some(error) = error {
      loader = loader.with_error(error);
    }
    let loader = self.params.apply(loader);

    let handle = queue.add_loader(loader, move |mut filled: Filled<T>, errors: Vec<Error>| {
      filled.errors = errors;
      listener(Ok(filled));
    });
    handle.request_handle().clone()
  }
}

/// Build the sub-requests hydrating `data`.
fn plan<T, D>(data: &D, auto_fill: AutoFill) -> Vec<LoaderPart<Filled<T>>>
where
  T: Send + 'static,
  D: Fillable,
{
  let mut parts = Vec::new();

  if auto_fill.includes(Relation::Store) {
    if let Some(part) = relation_part(data, Relation::Store, Relations::stores_mut) {
      parts.push(part);
    }
  }
  if auto_fill.includes(Relation::Dealer) {
    if let Some(part) = relation_part(data, Relation::Dealer, Relations::dealers_mut) {
      parts.push(part);
    }
  }
  if auto_fill.includes(Relation::Catalog) {
    if let Some(part) = relation_part(data, Relation::Catalog, Relations::catalogs_mut) {
      parts.push(part);
    }
  }

  if auto_fill.pages || auto_fill.hotspots {
    let catalogs: BTreeSet<String> = data.page_catalog_ids().into_iter().collect();
    for id in catalogs {
      if auto_fill.pages {
        let request = Request::<Vec<Images>>::json(Method::Get, &endpoint::catalog_pages(&id));
        let catalog = id.clone();
        parts.push(LoaderPart::new(request, move |filled: &mut Filled<T>, pages| {
          filled.relations.pages.insert(catalog, pages);
        }));
      }
      if auto_fill.hotspots {
        let request = Request::<Vec<Hotspot>>::json(Method::Get, &endpoint::catalog_hotspots(&id));
        let catalog = id.clone();
        parts.push(LoaderPart::new(request, move |filled: &mut Filled<T>, hotspots| {
          filled.relations.hotspots.insert(catalog, hotspots);
        }));
      }
    }
  }

  debug!(parts = parts.len(), "planned auto-fill");
  parts
}

/// One batched list request for every id `data` references through
/// `relation`, or `None` when there are no such ids.
fn relation_part<T, D, E>(
  data: &D,
  relation: Relation,
  slot: fn(&mut Relations) -> &mut HashMap<String, E>,
) -> Option<LoaderPart<Filled<T>>>
where
  T: Send + 'static,
  D: Fillable,
  E: Keyed + DeserializeOwned + Send + 'static,
{
  let ids: BTreeSet<String> = data.relation_ids(relation).into_iter().collect();
  if ids.is_empty() {
    return None;
  }

  let joined = ids.iter().map(String::as_str).collect::<Vec<_>>().join(DELIMITER);
  let request = Request::<Vec<E>>::list(relation.endpoint())
    .with_param(relation.param(), joined)
    .with_param(param::LIMIT, ids.len())
    .with_param(param::OFFSET, 0);

  Some(LoaderPart::new(request, move |filled: &mut Filled<T>, entities: Vec<E>| {
    let table = slot(&mut filled.relations);
    for entity in entities {
      if ids.contains(entity.key()) {
        table.insert(entity.key().to_string(), entity);
      } else {
        warn!(?relation, id = entity.key(), "ignoring unrequested entity");
      }
    }
  }))
}

impl RequestQueue {
  /// Submit `request` and hydrate its result before calling `listener`.
  ///
  /// The request and every auto-fill sub-request share one tag; canceling
  /// the returned handle cancels all of them.
  pub fn add_filled<T, F>(&self, request: Request<T>, auto_fill: AutoFill, listener: F) -> RequestHandle
  where
    T: Fillable + Send + 'static,
    F: FnOnce(Result<Filled<T>>) + Send + 'static,
  {
    let tag = request.meta().tag().unwrap_or_default();
    let request = request.with_tag(tag);
    let params = AutoFillParams::from_meta(request.meta());
    let parent = request.handle();

    let weak = self.downgrade();
    parent.state().on_cancel(move || {
      if let Some(queue) = weak.upgrade() {
        queue.cancel_all(tag);
      }
    });

    let weak = self.downgrade();
    let canceled = parent.clone();
    self.add(request, move |result| {
      let Some(queue) = weak.upgrade() else {
        return;
      };
      let (data, error) = match result {
        Ok(data) => (Some(data), None),
        Err(e) => (None, Some(e)),
      };
      let fill = RequestAutoFill::new(auto_fill, params).execute(&queue, data, error, listener);
      if canceled.is_canceled() {
        fill.cancel();
      }
    })
  }
}

impl<T> ListRequest<T>
where
  T: DeserializeOwned + Send + 'static,
  Vec<T>: Fillable,
{
  /// Submit the list request and hydrate the relations selected by its
  /// [`AutoFill`].
  pub fn send(&self, queue: &RequestQueue) -> PendingResponse<Filled<Vec<T>>> {
    let (tx, rx) = oneshot::channel();
    let handle = queue.add_filled(self.build(), *self.get_auto_fill(), move |result| {
      let _ = tx.send(result);
    });
    PendingResponse::new(rx, handle)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryCache, NoopCache};
  use crate::queue::tests::{started, test_context, wait_for_calls};
  use crate::request::{EventLog, Filter};
  use crate::transport::mock::MockTransport;
  use crate::transport::{HttpRequest, HttpResponse, TransportError};
  use serde_json::{json, Value};
  use std::time::Duration;

  fn offer(id: &str, dealer: &str, store: Option<&str>) -> Offer {
    serde_json::from_value(json!({
      "id": id,
      "heading": id,
      "dealer_id": dealer,
      "store_id": store,
    }))
    .unwrap()
  }

  fn entities(request: &HttpRequest, param: &str) -> Value {
    let ids = request.query_param(param).unwrap_or_default();
    Value::Array(
      ids
        .split(',')
        .filter(|id| !id.is_empty())
        .map(|id| json!({"id": id, "name": format!("name {}", id)}))
        .collect(),
    )
  }

  fn relations_api() -> MockTransport {
    MockTransport::json(|request| match request.path().as_str() {
      "/v2/dealers" => entities(request, "dealer_ids"),
      "/v2/stores" => entities(request, "store_ids"),
      "/v2/catalogs" => entities(request, "catalog_ids"),
      path if path.ends_with("/pages") => json!([{"thumb": "t1"}, {"thumb": "t2"}]),
      path if path.ends_with("/hotspots") => {
        json!([{"type": "offer", "offer": {"id": "o1"}, "locations": {"1": [[0.1, 0.2]]}}])
      }
      _ => json!([]),
    })
  }

  async fn fill<T: Fillable + Send + 'static>(
    queue: &RequestQueue,
    auto_fill: AutoFill,
    params: AutoFillParams,
    data: Option<T>,
    error: Option<Error>,
  ) -> Result<Filled<T>> {
    let (tx, rx) = oneshot::channel();
    RequestAutoFill::new(auto_fill, params).execute(queue, data, error, move |result| {
      let _ = tx.send(result);
    });
    rx.await.unwrap()
  }

  #[tokio::test]
  async fn test_batches_ids_into_one_request_per_relation() {
    let transport = relations_api();
    let queue = started(test_context(), Arc::new(NoopCache), &transport);
    let offers = vec![
      offer("o1", "d1", Some("s1")),
      offer("o2", "d2", None),
      offer("o3", "d1", Some("s1")),
    ];

    let filled = fill(
      &queue,
      AutoFill::new().dealer(true).store(true),
      AutoFillParams::default(),
      Some(offers),
      None,
    )
    .await
    .unwrap();

    let dealer_calls: Vec<HttpRequest> = transport
      .calls()
      .into_iter()
      .filter(|c| c.path() == "/v2/dealers")
      .collect();
    assert_eq!(dealer_calls.len(), 1);
    assert_eq!(dealer_calls[0].query_param("dealer_ids").as_deref(), Some("d1,d2"));
    assert_eq!(dealer_calls[0].query_param("limit").as_deref(), Some("2"));
    assert_eq!(transport.call_count(), 2);

    assert!(filled.errors.is_empty());
    assert_eq!(filled.relations.dealer("d1").unwrap().name, "name d1");
    assert!(filled.relations.dealer("d2").is_some());
    assert!(filled.relations.store("s1").is_some());
    assert_eq!(filled.data.len(), 3);
  }

  #[tokio::test]
  async fn test_failed_relation_does_not_block_siblings() {
    let transport = MockTransport::new(|request| match request.path().as_str() {
      "/v2/dealers" => Err(TransportError::Connect("connection reset".into())),
      _ => Ok(HttpResponse::json(200, &entities(request, "store_ids"))),
    });
    let queue = started(test_context(), Arc::new(NoopCache), &transport);

    let filled = fill(
      &queue,
      AutoFill::new().dealer(true).store(true),
      AutoFillParams::default(),
      Some(vec![offer("o1", "d1", Some("s1"))]),
      None,
    )
    .await
    .unwrap();

    assert_eq!(filled.errors.len(), 1);
    assert!(filled.errors[0].is_transport());
    assert!(filled.relations.store("s1").is_some());
    assert!(filled.relations.dealer("d1").is_none());
    assert!(matches!(filled.error(), Some(Error::Aggregate(_))));
  }

  #[tokio::test]
  async fn test_absent_data_fails_without_requests() {
    let transport = relations_api();
    let queue = started(test_context(), Arc::new(NoopCache), &transport);

    let result = fill::<Vec<Offer>>(&queue, AutoFill::all(), AutoFillParams::default(), None, None).await;
    assert!(matches!(result, Err(Error::DataAbsent)));

    let inherited = Error::Api {
      status: 404,
      body: None,
    };
    let result = fill::<Vec<Offer>>(
      &queue,
      AutoFill::all(),
      AutoFillParams::default(),
      None,
      Some(inherited.clone()),
    )
    .await;
    assert_eq!(result.unwrap_err(), inherited);
    assert_eq!(transport.call_count(), 0);
  }

  #[tokio::test]
  async fn test_parent_error_is_kept_with_data() {
    let transport = relations_api();
    let queue = started(test_context(), Arc::new(NoopCache), &transport);

    let filled = fill(
      &queue,
      AutoFill::new().dealer(true),
      AutoFillParams::default(),
      Some(vec![offer("o1", "d1", None)]),
      Some(Error::Timeout(Duration::from_secs(1))),
    )
    .await
    .unwrap();
    assert_eq!(filled.errors, vec![Error::Timeout(Duration::from_secs(1))]);
    assert!(filled.relations.dealer("d1").is_some());
  }

  #[tokio::test]
  async fn test_nothing_to_fill_completes_immediately() {
    let transport = relations_api();
    let queue = started(test_context(), Arc::new(NoopCache), &transport);

    let filled = fill(
      &queue,
      AutoFill::new(),
      AutoFillParams::default(),
      Some(vec![offer("o1", "d1", None)]),
      None,
    )
    .await
    .unwrap();
    assert!(filled.relations.is_empty());

    // Requested relations with no ids referenced
    let filled = fill(
      &queue,
      AutoFill::new().store(true).catalog(true),
      AutoFillParams::default(),
      Some(vec![offer("o1", "d1", None)]),
      None,
    )
    .await
    .unwrap();
    assert!(filled.relations.is_empty());
    assert_eq!(transport.call_count(), 0);
  }

  #[tokio::test]
  async fn test_pages_and_hotspots_per_catalog() {
    let transport = relations_api();
    let queue = started(test_context(), Arc::new(NoopCache), &transport);
    let catalogs: Vec<Catalog> = serde_json::from_value(json!([
      {"id": "c1", "dealer_id": "d1"},
      {"id": "c2", "dealer_id": "d1"}
    ]))
    .unwrap();

    let filled = fill(
      &queue,
      AutoFill::new().dealer(true).pages(true).hotspots(true),
      AutoFillParams::default(),
      Some(catalogs),
      None,
    )
    .await
    .unwrap();

    assert_eq!(transport.call_count(), 5);
    assert_eq!(filled.relations.pages("c1").unwrap().len(), 2);
    assert_eq!(filled.relations.pages("c2").unwrap()[1].thumb.as_deref(), Some("t2"));
    assert_eq!(filled.relations.hotspots("c2").unwrap()[0].pages(), vec![1]);
    assert!(filled.relations.dealer("d1").is_some());
  }

  #[tokio::test]
  async fn test_entities_not_requested_are_ignored() {
    let transport = MockTransport::json(|_| json!([{"id": "d1"}, {"id": "stranger"}]));
    let queue = started(test_context(), Arc::new(NoopCache), &transport);

    let filled = fill(
      &queue,
      AutoFill::new().dealer(true),
      AutoFillParams::default(),
      Some(vec![offer("o1", "d1", None)]),
      None,
    )
    .await
    .unwrap();
    assert!(filled.relations.dealer("d1").is_some());
    assert!(filled.relations.dealer("stranger").is_none());
  }

  #[derive(Default)]
  struct Capture(parking_lot::Mutex<Vec<String>>);

  impl RequestDebugger for Capture {
    fn on_finish(&self, key: &str, _log: &EventLog, _error: Option<&Error>) {
      self.0.lock().push(key.to_string());
    }
  }

  #[tokio::test]
  async fn test_sub_requests_inherit_params() {
    let transport = relations_api();
    let cache = Arc::new(MemoryCache::new());
    let queue = started(test_context(), cache.clone(), &transport);
    let debugger = Arc::new(Capture::default());

    // A cached dealer list that must be bypassed
    let offers = vec![offer("o1", "d1", None)];
    fill(&queue, AutoFill::new().dealer(true), AutoFillParams::default(), Some(offers.clone()), None)
      .await
      .unwrap();
    assert_eq!(transport.call_count(), 1);

    let params = AutoFillParams {
      tag: Some(Tag::new()),
      debugger: Some(debugger.clone()),
      use_location: false,
      skip_cache: true,
    };
    fill(&queue, AutoFill::new().dealer(true), params, Some(offers), None)
      .await
      .unwrap();

    assert_eq!(transport.call_count(), 2);
    assert_eq!(
      debugger.0.lock().clone(),
      vec!["GET:/v2/dealers?dealer_ids=d1&limit=1&offset=0".to_string()]
    );
  }

  #[tokio::test]
  async fn test_list_request_send_fills_relations() {
    let transport = MockTransport::json(|request| match request.path().as_str() {
      "/v2/offers" => json!([
        {"id": "o1", "heading": "Milk", "dealer_id": "d1"},
        {"id": "o2", "heading": "Bread", "dealer_id": "d2"}
      ]),
      _ => entities(request, "dealer_ids"),
    });
    let queue = started(test_context(), Arc::new(NoopCache), &transport);

    let filled = ListRequest::<Offer>::new(endpoint::OFFER_LIST)
      .filter(Filter::new().offers(["o1", "o2"]))
      .auto_fill(AutoFill::new().dealer(true))
      .send(&queue)
      .await
      .unwrap();

    assert_eq!(filled.data.len(), 2);
    assert_eq!(filled.relations.dealer("d2").unwrap().name, "name d2");
    assert_eq!(transport.paths(), vec!["/v2/offers", "/v2/dealers"]);
  }

  #[tokio::test]
  async fn test_failed_parent_reaches_listener() {
    let transport = MockTransport::new(|_| Ok(HttpResponse::new(503, "")));
    let queue = started(test_context(), Arc::new(NoopCache), &transport);

    let result = ListRequest::<Offer>::new(endpoint::OFFER_LIST)
      .auto_fill(AutoFill::all())
      .send(&queue)
      .await;
    assert!(matches!(result, Err(Error::Api { status: 503, .. })));
    assert_eq!(transport.call_count(), 1);
  }

  #[tokio::test]
  async fn test_cancel_reaches_auto_fill_requests() {
    let transport = MockTransport::json(|request| match request.path().as_str() {
      "/v2/offers" => json!([{"id": "o1", "dealer_id": "d1"}]),
      _ => entities(request, "dealer_ids"),
    })
    .gated();
    let queue = started(test_context(), Arc::new(NoopCache), &transport);

    let pending = ListRequest::<Offer>::new(endpoint::OFFER_LIST)
      .auto_fill(AutoFill::new().dealer(true))
      .send(&queue);
    transport.release(1);
    wait_for_calls(&transport, 2).await;

    pending.cancel();
    transport.release(1);
    assert_eq!(pending.await.unwrap_err(), Error::Canceled);
    assert_eq!(transport.paths(), vec!["/v2/offers", "/v2/dealers"]);
  }
}
