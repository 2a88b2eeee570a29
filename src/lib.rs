//! Client SDK for the ShopGun (eTilbudsavis) catalog and offers API.
//!
//! Requests are plain descriptors ([`request::Request`]) submitted to a
//! [`queue::RequestQueue`], which answers from the [`cache`] when it can and
//! otherwise runs them on a bounded worker pool over a [`transport::Transport`].
//! Related stores, dealers and catalogs are hydrated in batches by
//! [`autofill`], built on the composite [`loader::LoaderRequest`].

pub mod api;
pub mod autofill;
pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod context;
pub mod delivery;
pub mod error;
pub mod loader;
pub mod location;
pub mod logging;
pub mod model;
pub mod pending;
pub mod queue;
pub mod request;
pub mod session;
pub mod transport;

pub use error::{Error, Result};
