//! Core trait for response caches.

use tracing::debug;

use super::Item;
use crate::request::{Method, RequestMeta, Response};

/// A key→item store for API responses.
///
/// Implementations are shared by every dispatch worker and must be safe to
/// call concurrently. Lookups never return an expired item.
pub trait Cache: Send + Sync {
  /// Fresh item for `key`. Expired items are removed and reported as absent.
  fn get(&self, key: &str) -> Option<Item>;

  /// Store the cache entries of `response` when `request` allows it.
  fn put(&self, request: &RequestMeta, response: &Response);

  /// Remove every entry.
  fn clear(&self);
}

/// Whether a response to `request` may enter the cache.
///
/// Only GET requests marked cacheable qualify, and never a request that was
/// itself served from the cache.
pub fn is_cacheable(request: &RequestMeta, response: &Response) -> bool {
  request.method() == Method::Get
    && request.cache_response()
    && !request.is_cache_hit()
    && response.cache.as_ref().is_some_and(|entries| !entries.is_empty())
}

/// Stand-in for `cache.enabled: false`. Lookups miss and responses are
/// discarded, so every request reaches the transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl Cache for NoopCache {
  fn get(&self, _key: &str) -> Option<Item> {
    None
  }

  fn put(&self, request: &RequestMeta, _response: &Response) {
    debug!(key = %request.cache_key(), "caching disabled, discarding response");
  }

  fn clear(&self) {}
}
