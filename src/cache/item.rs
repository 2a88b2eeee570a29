use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

/// A cached payload with an absolute expiry time.
///
/// Items are immutable once built and shared by `Arc`, so a reader either
/// holds the whole item or nothing at all.
#[derive(Debug, Clone)]
pub struct Item {
  payload: Arc<Value>,
  expires: DateTime<Utc>,
  size: usize,
}

impl Item {
  /// Create an item that lives for `ttl` from `now`.
  pub fn new(payload: Value, now: DateTime<Utc>, ttl: Duration) -> Self {
    Self::with_expiry(payload, now + ttl)
  }

  pub fn with_expiry(payload: Value, expires: DateTime<Utc>) -> Self {
    let size = estimate_size(&payload);
    Self {
      payload: Arc::new(payload),
      expires,
      size,
    }
  }

  pub fn payload(&self) -> &Value {
    &self.payload
  }

  pub fn expires(&self) -> DateTime<Utc> {
    self.expires
  }

  /// Estimated size in bytes, used for the memory budget.
  pub fn size(&self) -> usize {
    self.size
  }

  /// True once `now` has passed the expiry time. Monotonic in `now`.
  pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
    self.expires < now
  }

  pub fn is_expired(&self) -> bool {
    self.is_expired_at(Utc::now())
  }
}

/// Serialized JSON length, which is what the item cost on the wire.
fn estimate_size(value: &Value) -> usize {
  serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0)
}
