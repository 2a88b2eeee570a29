//! Response caching.
//!
//! Cache entries are keyed by the request's canonical key
//! (`METHOD:url?sorted-params`) and expire at an absolute time. A response may
//! produce several entries, e.g. a list response also caches each element
//! under its single-object key so later lookups by id are served locally.

mod item;
mod memory;
mod traits;

pub use item::Item;
pub use memory::{MemoryCache, AVG_ITEM_SIZE, DEFAULT_MAX_BYTES, DEFAULT_MAX_ITEMS, DEFAULT_PERCENT_TO_CLEAN};
pub use traits::{is_cacheable, Cache, NoopCache};
