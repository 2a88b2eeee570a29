//! High level client wiring a [`RequestQueue`] from a [`Config`].

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tracing::info;

use crate::api::endpoint;
use crate::autofill::{AutoFill, Fillable, Filled};
use crate::cache::{Cache, MemoryCache, NoopCache};
use crate::config::Config;
use crate::context::Context;
use crate::error;
use crate::location::StaticLocation;
use crate::model::{Catalog, Dealer, Offer, Store};
use crate::pending::PendingResponse;
use crate::queue::RequestQueue;
use crate::request::{ListRequest, Request};
use crate::session::Session;
use crate::transport::{ReqwestTransport, Transport};

/// ShopGun API client with an in-memory response cache.
///
/// Every call goes through the shared queue, so repeated lookups inside the
/// cache TTL are served locally and related entities are fetched in batches.
#[derive(Clone)]
pub struct ShopGunClient {
  queue: RequestQueue,
  ttl: chrono::Duration,
}

impl ShopGunClient {
  /// Create a client and start its workers. Must run inside a tokio runtime.
  pub fn new(config: &Config) -> Result<Self> {
    let transport = ReqwestTransport::new().map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
    Ok(Self::with_transport(config, Arc::new(transport)))
  }

  pub fn with_transport(config: &Config, transport: Arc<dyn Transport>) -> Self {
    let mut session = Session::new(Config::get_api_secret());
    if let Some(token) = Config::get_token() {
      session = session.with_token(token);
    }

    let mut ctx = Context::new(config.environment())
      .with_session(Arc::new(session))
      .with_timeout(config.timeout())
      .with_workers(config.queue.workers)
      .with_encoding(config.queue.encoding);
    if let Some(api_key) = &config.api.api_key {
      ctx = ctx.with_api_key(api_key.clone());
    }
    if let Some(location) = &config.location {
      ctx = ctx.with_location(Arc::new(StaticLocation::new(location.clone())));
    }

    let cache: Arc<dyn Cache> = if config.cache.enabled {
      Arc::new(
        MemoryCache::new()
          .with_max_items(config.cache.max_items)
          .with_max_bytes(config.cache.max_bytes)
          .with_clean_limit(config.cache.percent_to_clean),
      )
    } else {
      Arc::new(NoopCache)
    };

    let queue = RequestQueue::new(ctx, cache, transport);
    queue.start();
    info!(environment = ?config.environment(), "client ready");

    Self {
      queue,
      ttl: chrono::Duration::seconds(config.cache.ttl_secs),
    }
  }

  pub fn queue(&self) -> &RequestQueue {
    &self.queue
  }

  /// Fetch a list endpoint and hydrate the relations its auto-fill selects.
  pub fn list<T>(&self, list: &ListRequest<T>) -> PendingResponse<Filled<Vec<T>>>
  where
    T: DeserializeOwned + Send + 'static,
    Vec<T>: Fillable,
  {
    self.fill(list.build(), *list.get_auto_fill())
  }

  pub async fn list_offers(&self, list: &ListRequest<Offer>) -> error::Result<Filled<Vec<Offer>>> {
    self.list(list).await
  }

  pub async fn list_catalogs(&self, list: &ListRequest<Catalog>) -> error::Result<Filled<Vec<Catalog>>> {
    self.list(list).await
  }

  pub async fn list_dealers(&self, list: &ListRequest<Dealer>) -> error::Result<Vec<Dealer>> {
    Ok(self.list(list).await?.data)
  }

  pub async fn list_stores(&self, list: &ListRequest<Store>) -> error::Result<Filled<Vec<Store>>> {
    self.list(list).await
  }

  /// Get a single catalog by id.
  pub async fn get_catalog(&self, id: &str, auto_fill: AutoFill) -> error::Result<Filled<Catalog>> {
    let request = Request::<Catalog>::object(&endpoint::catalog_id(id));
    self.fill(request, auto_fill).await
  }

  /// Get a single offer by id.
  pub async fn get_offer(&self, id: &str, auto_fill: AutoFill) -> error::Result<Filled<Offer>> {
    let request = Request::<Offer>::object(&endpoint::offer_id(id));
    self.fill(request, auto_fill).await
  }

  fn fill<T>(&self, request: Request<T>, auto_fill: AutoFill) -> PendingResponse<Filled<T>>
  where
    T: Fillable + Send + 'static,
  {
    let (tx, rx) = oneshot::channel();
    let handle = self
      .queue
      .add_filled(request.with_ttl(self.ttl), auto_fill, move |result| {
        let _ = tx.send(result);
      });
    PendingResponse::new(rx, handle)
  }

  /// Stop the queue; queued requests are canceled.
  pub fn shutdown(&self) {
    self.queue.stop();
  }
}

impl std::fmt::Debug for ShopGunClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ShopGunClient")
      .field("queue", &self.queue)
      .field("ttl", &self.ttl)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::request::Filter;
  use crate::transport::mock::MockTransport;
  use serde_json::json;

  fn test_config() -> Config {
    let mut config = Config::default();
    config.api.base_url = Some("http://api.test".to_string());
    config.api.api_key = Some("key".to_string());
    config
  }

  #[tokio::test]
  async fn test_get_catalog_with_dealer() {
    let transport = MockTransport::json(|request| match request.path().as_str() {
      "/v2/catalogs/c1" => json!({"id": "c1", "dealer_id": "d1", "page_count": 12}),
      _ => json!([{"id": "d1", "name": "Netto"}]),
    });
    let client = ShopGunClient::with_transport(&test_config(), Arc::new(transport.clone()));

    let filled = client
      .get_catalog("c1", AutoFill::new().dealer(true))
      .await
      .unwrap();
    assert_eq!(filled.data.page_count, Some(12));
    assert_eq!(filled.relations.dealer("d1").unwrap().name, "Netto");

    let calls = transport.calls();
    assert_eq!(calls[0].query_param("api_key").as_deref(), Some("key"));
    assert_eq!(calls[1].query_param("dealer_ids").as_deref(), Some("d1"));
  }

  #[tokio::test]
  async fn test_repeated_list_is_cached() {
    let transport = MockTransport::json(|_| json!([{"id": "d1", "name": "Netto"}]));
    let client = ShopGunClient::with_transport(&test_config(), Arc::new(transport.clone()));
    let list = ListRequest::<Dealer>::new(endpoint::DEALER_LIST).filter(Filter::new().dealers(["d1"]));

    assert_eq!(client.list_dealers(&list).await.unwrap().len(), 1);
    assert_eq!(client.list_dealers(&list).await.unwrap().len(), 1);
    assert_eq!(transport.call_count(), 1);
    client.shutdown();
  }

  #[tokio::test]
  async fn test_disabled_cache_always_hits_network() {
    let transport = MockTransport::json(|_| json!([]));
    let mut config = test_config();
    config.cache.enabled = false;
    let client = ShopGunClient::with_transport(&config, Arc::new(transport.clone()));
    let list = ListRequest::<Store>::new(endpoint::STORE_LIST);

    client.list_stores(&list).await.unwrap();
    client.list_stores(&list).await.unwrap();
    assert_eq!(transport.call_count(), 2);
  }
}
