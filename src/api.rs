//! Endpoints, parameter names and environments of the ShopGun v2 API.

use serde::Deserialize;

/// Separator for multiple values given to one parameter.
pub const DELIMITER: &str = ",";

/// API environment a relative path is resolved against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
  #[default]
  Production,
  Edge,
  Staging,
  /// Local or otherwise custom deployment
  Custom(String),
}

impl Environment {
  pub fn base_url(&self) -> &str {
    match self {
      Environment::Production => "https://api.etilbudsavis.dk",
      Environment::Edge => "https://edge.api.etilbudsavis.dk",
      Environment::Staging => "https://staging.api.etilbudsavis.dk",
      Environment::Custom(url) => url.trim_end_matches('/'),
    }
  }

  /// Resolve `path` against this environment.
  ///
  /// Absolute URLs are returned unchanged, so requests that already point to
  /// another host are left alone.
  pub fn apply(&self, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
      return path.to_string();
    }
    if path.starts_with('/') {
      format!("{}{}", self.base_url(), path)
    } else {
      format!("{}/{}", self.base_url(), path)
    }
  }
}

pub mod endpoint {
  pub const CATALOG_LIST: &str = "/v2/catalogs";
  pub const CATALOG_SEARCH: &str = "/v2/catalogs/search";
  pub const DEALER_LIST: &str = "/v2/dealers";
  pub const DEALER_SEARCH: &str = "/v2/dealers/search";
  pub const OFFER_LIST: &str = "/v2/offers";
  pub const OFFER_SEARCH: &str = "/v2/offers/search";
  pub const STORE_LIST: &str = "/v2/stores";
  pub const STORE_SEARCH: &str = "/v2/stores/search";
  pub const SESSIONS: &str = "/v2/sessions";

  pub fn offer_id(id: &str) -> String {
    format!("{}/{}", OFFER_LIST, id)
  }

  pub fn store_id(id: &str) -> String {
    format!("{}/{}", STORE_LIST, id)
  }

  pub fn dealer_id(id: &str) -> String {
    format!("{}/{}", DEALER_LIST, id)
  }

  pub fn catalog_id(id: &str) -> String {
    format!("{}/{}", CATALOG_LIST, id)
  }

  pub fn catalog_pages(id: &str) -> String {
    format!("{}/{}/pages", CATALOG_LIST, id)
  }

  pub fn catalog_hotspots(id: &str) -> String {
    format!("{}/{}/hotspots", CATALOG_LIST, id)
  }
}

pub mod param {
  pub const ORDER_BY: &str = "order_by";
  pub const OFFSET: &str = "offset";
  pub const LIMIT: &str = "limit";
  pub const QUERY: &str = "query";

  pub const OFFER_IDS: &str = "offer_ids";
  pub const CATALOG_IDS: &str = "catalog_ids";
  pub const DEALER_IDS: &str = "dealer_ids";
  pub const STORE_IDS: &str = "store_ids";
  pub const AREA_IDS: &str = "area_ids";

  pub const SENSOR: &str = "r_sensor";
  pub const LATITUDE: &str = "r_lat";
  pub const LONGITUDE: &str = "r_lng";
  pub const RADIUS: &str = "r_radius";
  pub const BOUND_NORTH: &str = "b_north";
  pub const BOUND_EAST: &str = "b_east";
  pub const BOUND_SOUTH: &str = "b_south";
  pub const BOUND_WEST: &str = "b_west";

  pub const API_KEY: &str = "api_key";
}

pub mod sort {
  /// Prefix that turns an ascending sort key into a descending one
  pub const DESC: &str = "-";

  pub const POPULARITY: &str = "popularity";
  pub const DISTANCE: &str = "distance";
  pub const NAME: &str = "name";
  pub const PUBLICATION_DATE: &str = "publication_date";
  pub const EXPIRATION_DATE: &str = "expiration_date";
  pub const CREATED: &str = "created";
  pub const PAGE: &str = "page";
  pub const PRICE: &str = "price";
  pub const SAVINGS: &str = "savings";
  pub const DEALER: &str = "dealer";
}

pub mod header {
  pub const X_TOKEN: &str = "X-Token";
  pub const X_TOKEN_EXPIRES: &str = "X-Token-Expires";
  pub const X_SIGNATURE: &str = "X-Signature";
  pub const CONTENT_TYPE: &str = "Content-Type";
}
