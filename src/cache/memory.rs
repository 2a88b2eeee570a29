//! In-memory LRU cache with expiry.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::traits::{is_cacheable, Cache};
use super::Item;
use crate::clock::{Clock, SystemClock};
use crate::request::{RequestMeta, Response};

/// Average size of an API response item, used to derive the default budget.
pub const AVG_ITEM_SIZE: usize = 4096;

pub const DEFAULT_MAX_ITEMS: usize = 256;
pub const DEFAULT_MAX_BYTES: usize = DEFAULT_MAX_ITEMS * AVG_ITEM_SIZE;
pub const DEFAULT_PERCENT_TO_CLEAN: u8 = 20;

struct Entry {
  item: Item,
  tick: u64,
}

/// Map plus access order. `order` maps access tick → key, oldest first.
#[derive(Default)]
struct Inner {
  entries: HashMap<String, Entry>,
  order: BTreeMap<u64, String>,
  tick: u64,
  bytes: usize,
}

impl Inner {
  fn next_tick(&mut self) -> u64 {
    self.tick += 1;
    self.tick
  }

  fn remove(&mut self, key: &str) -> Option<Entry> {
    let entry = self.entries.remove(key)?;
    self.order.remove(&entry.tick);
    self.bytes -= entry.item.size();
    Some(entry)
  }

  fn insert(&mut self, key: String, item: Item) {
    self.remove(&key);
    let tick = self.next_tick();
    self.bytes += item.size();
    self.order.insert(tick, key.clone());
    self.entries.insert(key, Entry { item, tick });
  }

  fn touch(&mut self, key: &str) {
    let tick = self.next_tick();
    if let Some(entry) = self.entries.get_mut(key) {
      self.order.remove(&entry.tick);
      entry.tick = tick;
      self.order.insert(tick, key.to_string());
    }
  }

  fn evict_oldest(&mut self, count: usize) {
    for _ in 0..count {
      let Some((_, key)) = self.order.pop_first() else {
        break;
      };
      if let Some(entry) = self.entries.remove(&key) {
        self.bytes -= entry.item.size();
      }
    }
  }
}

/// Memory-bounded cache evicting least-recently-used items.
///
/// A single coarse lock guards the map; every operation is a point operation,
/// and items are shared immutably so readers never see a partial item.
pub struct MemoryCache {
  inner: Mutex<Inner>,
  max_items: usize,
  max_bytes: usize,
  percent_to_clean: u8,
  clock: Arc<dyn Clock>,
}

impl MemoryCache {
  pub fn new() -> Self {
    Self {
      inner: Mutex::new(Inner::default()),
      max_items: DEFAULT_MAX_ITEMS,
      max_bytes: DEFAULT_MAX_BYTES,
      percent_to_clean: DEFAULT_PERCENT_TO_CLEAN,
      clock: Arc::new(SystemClock),
    }
  }

  /// Limit the estimated memory use. Also bounds the item count at roughly
  /// `max_bytes / AVG_ITEM_SIZE`.
  pub fn with_limit(mut self, max_bytes: usize) -> Self {
    self.max_bytes = max_bytes;
    self.max_items = (max_bytes / AVG_ITEM_SIZE).max(1);
    debug!(
      "New memory limit: {}kb (approx {} items)",
      max_bytes / 1024,
      self.max_items
    );
    self
  }

  pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
    self.max_bytes = max_bytes;
    self
  }

  pub fn with_max_items(mut self, max_items: usize) -> Self {
    self.max_items = max_items;
    self
  }

  /// Percentage of the cache to drop when a limit is hit.
  ///
  /// # Panics
  ///
  /// When `percent` is outside `1..=99`.
  pub fn with_clean_limit(mut self, percent: u8) -> Self {
    assert!(
      (1..=99).contains(&percent),
      "percent to clean must be between 1 and 99, got {}",
      percent
    );
    self.percent_to_clean = percent;
    self
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn len(&self) -> usize {
    self.inner.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Estimated bytes held.
  pub fn size(&self) -> usize {
    self.inner.lock().bytes
  }

  fn check_size(&self, inner: &mut Inner) {
    let before = inner.entries.len();
    while inner.entries.len() > self.max_items || inner.bytes > self.max_bytes {
      let len = inner.entries.len();
      let to_remove = (len * usize::from(self.percent_to_clean) / 100).max(1);
      inner.evict_oldest(to_remove);
    }
    if inner.entries.len() < before {
      debug!(
        evicted = before - inner.entries.len(),
        size = inner.entries.len(),
        bytes = inner.bytes,
        "cleaned memory cache"
      );
    }
  }
}

impl Default for MemoryCache {
  fn default() -> Self {
    Self::new()
  }
}

impl Cache for MemoryCache {
  fn get(&self, key: &str) -> Option<Item> {
    let now = self.clock.now();
    let mut inner = self.inner.lock();

    let expired = inner.entries.get(key)?.item.is_expired_at(now);
    if expired {
      inner.remove(key);
      debug!(key, "dropped expired cache item");
      return None;
    }

    inner.touch(key);
    inner.entries.get(key).map(|entry| entry.item.clone())
  }

  fn put(&self, request: &RequestMeta, response: &Response) {
    if !is_cacheable(request, response) {
      return;
    }
    let Some(entries) = &response.cache else {
      return;
    };

    request.log().add("add-response-to-cache");
    let mut inner = self.inner.lock();
    for (key, item) in entries {
      inner.insert(key.clone(), item.clone());
    }
    self.check_size(&mut inner);
  }

  fn clear(&self) {
    let mut inner = self.inner.lock();
    *inner = Inner::default();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::request::{Method, Request};
  use chrono::{Duration, Utc};
  use serde_json::{json, Value};

  fn response_with(entries: &[(&str, Value)], ttl: Duration) -> Response {
    let now = Utc::now();
    Response {
      data: Value::Null,
      cache: Some(
        entries
          .iter()
          .map(|(k, v)| (k.to_string(), Item::new(v.clone(), now, ttl)))
          .collect(),
      ),
    }
  }

  fn put_one(cache: &MemoryCache, key: &str, value: Value) {
    let request: Request<Value> = Request::object("/v2/offers");
    let response = response_with(&[(key, value)], Duration::minutes(5));
    cache.put(request.meta(), &response);
  }

  #[test]
  fn test_get_returns_fresh_item() {
    let cache = MemoryCache::new();
    put_one(&cache, "GET:/v2/offers/a", json!({"id": "a"}));

    let item = cache.get("GET:/v2/offers/a").unwrap();
    assert_eq!(item.payload(), &json!({"id": "a"}));
    assert!(cache.get("GET:/v2/offers/b").is_none());
  }

  #[test]
  fn test_expired_item_is_purged() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let cache = MemoryCache::new().with_clock(clock.clone());
    put_one(&cache, "k", json!(1));
    assert_eq!(cache.len(), 1);

    clock.advance(Duration::minutes(10));
    assert!(cache.get("k").is_none());
    assert!(cache.get("k").is_none());
    assert_eq!(cache.len(), 0);
    assert_eq!(cache.size(), 0);
  }

  #[test]
  fn test_put_requires_get_and_cacheable() {
    let cache = MemoryCache::new();

    let post: Request<Value> = Request::json(Method::Post, "/v2/sessions");
    let response = response_with(&[("k", json!(1))], Duration::minutes(5));
    cache.put(post.meta(), &response);
    assert!(cache.is_empty());

    let uncached: Request<Value> = Request::object("/v2/offers").cache_response(false);
    cache.put(uncached.meta(), &response);
    assert!(cache.is_empty());

    let no_entries = Response {
      data: Value::Null,
      cache: None,
    };
    let get: Request<Value> = Request::object("/v2/offers");
    cache.put(get.meta(), &no_entries);
    assert!(cache.is_empty());
  }

  #[test]
  fn test_cache_hit_is_never_recached() {
    let cache = MemoryCache::new();
    let request: Request<Value> = Request::object("/v2/offers");
    request
      .handle()
      .state()
      .mark_cache_hit(Item::new(json!(1), Utc::now(), Duration::minutes(5)));

    let response = response_with(&[("k", json!(2))], Duration::minutes(5));
    cache.put(request.meta(), &response);
    assert!(cache.is_empty());
    assert!(!request.meta().log().contains("add-response-to-cache"));
  }

  #[test]
  fn test_put_merges_every_entry() {
    let cache = MemoryCache::new();
    let request: Request<Value> = Request::object("/v2/dealers");
    let response = response_with(
      &[
        ("GET:/v2/dealers?dealer_ids=a,b", json!([{"id": "a"}, {"id": "b"}])),
        ("GET:/v2/dealers/a", json!({"id": "a"})),
        ("GET:/v2/dealers/b", json!({"id": "b"})),
      ],
      Duration::minutes(5),
    );
    cache.put(request.meta(), &response);
    assert_eq!(cache.len(), 3);
    assert!(request.meta().log().contains("add-response-to-cache"));
  }

  #[test]
  fn test_evicts_least_recently_used_by_count() {
    let cache = MemoryCache::new().with_max_items(5).with_clean_limit(20);
    for i in 0..5 {
      put_one(&cache, &format!("k{}", i), json!(i));
    }
    // k0 becomes most recently used
    assert!(cache.get("k0").is_some());

    put_one(&cache, "k5", json!(5));
    assert_eq!(cache.len(), 5);
    assert!(cache.get("k1").is_none());
    assert!(cache.get("k0").is_some());
    assert!(cache.get("k5").is_some());
  }

  #[test]
  fn test_evicts_by_byte_budget() {
    // Each payload is a 100 character string, 102 bytes serialized
    let cache = MemoryCache::new().with_max_items(100).with_max_bytes(300);
    for i in 0..3 {
      put_one(&cache, &format!("k{}", i), json!("x".repeat(100)));
    }
    assert_eq!(cache.len(), 2);
    assert!(cache.size() <= 300);
    assert!(cache.get("k0").is_none());
  }

  #[test]
  #[should_panic(expected = "percent to clean")]
  fn test_clean_limit_out_of_range_panics() {
    let _ = MemoryCache::new().with_clean_limit(100);
  }

  #[test]
  fn test_clear() {
    let cache = MemoryCache::new();
    put_one(&cache, "a", json!(1));
    put_one(&cache, "b", json!(2));
    cache.clear();
    assert!(cache.is_empty());
    assert_eq!(cache.size(), 0);
  }
}
