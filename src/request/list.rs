//! Builders for the API's list endpoints.
//!
//! A list request is assembled from a [`Filter`] (which ids to return), an
//! [`Order`] (`order_by`), a [`Parameter`] block (`offset`, `limit` and free
//! form query parameters) and an optional [`AutoFill`] describing which
//! related entities to hydrate once the list arrives.

use std::collections::{BTreeMap, BTreeSet};

use serde::de::DeserializeOwned;

use super::Request;
use crate::api::{param, sort, DELIMITER};
use crate::autofill::AutoFill;

pub const DEFAULT_LIMIT: u32 = 25;

/// Id filters, one id set per filter parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
  ids: BTreeMap<String, BTreeSet<String>>,
}

impl Filter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(mut self, name: &str, id: impl Into<String>) -> Self {
    self.ids.entry(name.to_string()).or_default().insert(id.into());
    self
  }

  pub fn add_all<I, S>(mut self, name: &str, ids: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self
      .ids
      .entry(name.to_string())
      .or_default()
      .extend(ids.into_iter().map(Into::into));
    self
  }

  pub fn offers<I, S>(self, ids: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.add_all(param::OFFER_IDS, ids)
  }

  pub fn catalogs<I, S>(self, ids: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.add_all(param::CATALOG_IDS, ids)
  }

  pub fn dealers<I, S>(self, ids: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.add_all(param::DEALER_IDS, ids)
  }

  pub fn stores<I, S>(self, ids: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.add_all(param::STORE_IDS, ids)
  }

  pub fn areas<I, S>(self, ids: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.add_all(param::AREA_IDS, ids)
  }

  pub fn remove(mut self, name: &str) -> Self {
    self.ids.remove(name);
    self
  }

  pub fn is_empty(&self) -> bool {
    self.ids.values().all(BTreeSet::is_empty)
  }

  /// Query parameters, ids sorted and comma separated.
  pub fn to_params(&self) -> BTreeMap<String, String> {
    self
      .ids
      .iter()
      .filter(|(_, ids)| !ids.is_empty())
      .map(|(name, ids)| {
        let joined = ids.iter().map(String::as_str).collect::<Vec<_>>().join(DELIMITER);
        (name.clone(), joined)
      })
      .collect()
  }
}

/// `order_by` keys in priority order; descending keys carry a `-` prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Order {
  keys: Vec<String>,
}

impl Order {
  pub fn new() -> Self {
    Self::default()
  }

  /// The order offers and catalogs are listed in unless told otherwise.
  pub fn by_popularity() -> Self {
    Self::new().add(sort::POPULARITY, true)
  }

  /// Add `key`, replacing an earlier entry for the same key.
  pub fn add(mut self, key: &str, descending: bool) -> Self {
    self = self.remove(key);
    if descending {
      self.keys.push(format!("{}{}", sort::DESC, key));
    } else {
      self.keys.push(key.to_string());
    }
    self
  }

  pub fn remove(mut self, key: &str) -> Self {
    self
      .keys
      .retain(|k| k.trim_start_matches(sort::DESC) != key);
    self
  }

  pub fn is_empty(&self) -> bool {
    self.keys.is_empty()
  }

  pub fn to_param(&self) -> Option<String> {
    if self.keys.is_empty() {
      None
    } else {
      Some(self.keys.join(DELIMITER))
    }
  }
}

/// Paging and free-form query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
  offset: u32,
  limit: u32,
  extra: BTreeMap<String, String>,
}

impl Default for Parameter {
  fn default() -> Self {
    Self {
      offset: 0,
      limit: DEFAULT_LIMIT,
      extra: BTreeMap::new(),
    }
  }
}

impl Parameter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn offset(mut self, offset: u32) -> Self {
    self.offset = offset;
    self
  }

  pub fn limit(mut self, limit: u32) -> Self {
    self.limit = limit;
    self
  }

  pub fn set(mut self, name: &str, value: impl ToString) -> Self {
    self.extra.insert(name.to_string(), value.to_string());
    self
  }

  pub fn to_params(&self) -> BTreeMap<String, String> {
    let mut params = self.extra.clone();
    params.insert(param::OFFSET.to_string(), self.offset.to_string());
    params.insert(param::LIMIT.to_string(), self.limit.to_string());
    params
  }
}

/// Builder for a list endpoint returning `Vec<T>`.
#[derive(Debug, Clone)]
pub struct ListRequest<T> {
  url: String,
  filter: Filter,
  order: Order,
  parameter: Parameter,
  auto_fill: AutoFill,
  _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned + 'static> ListRequest<T> {
  pub fn new(url: &str) -> Self {
    Self {
      url: url.to_string(),
      filter: Filter::default(),
      order: Order::default(),
      parameter: Parameter::default(),
      auto_fill: AutoFill::default(),
      _marker: std::marker::PhantomData,
    }
  }

  pub fn filter(mut self, filter: Filter) -> Self {
    self.filter = filter;
    self
  }

  pub fn order(mut self, order: Order) -> Self {
    self.order = order;
    self
  }

  pub fn parameter(mut self, parameter: Parameter) -> Self {
    self.parameter = parameter;
    self
  }

  pub fn auto_fill(mut self, auto_fill: AutoFill) -> Self {
    self.auto_fill = auto_fill;
    self
  }

  pub fn get_auto_fill(&self) -> &AutoFill {
    &self.auto_fill
  }

  /// The plain request, without auto-fill.
  pub fn build(&self) -> Request<Vec<T>> {
    let mut request = Request::<Vec<T>>::list(&self.url)
      .with_params(self.parameter.to_params())
      .with_params(self.filter.to_params());
    if let Some(order) = self.order.to_param() {
      request = request.with_param(param::ORDER_BY, order);
    }
    request
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::endpoint;
  use crate::model::Offer;

  #[test]
  fn test_filter_dedupes_and_sorts_ids() {
    let filter = Filter::new().offers(["B", "A", "B"]).dealers(Vec::<String>::new());
    let params = filter.to_params();
    assert_eq!(params.get("offer_ids").map(String::as_str), Some("A,B"));
    assert!(!params.contains_key("dealer_ids"));
  }

  #[test]
  fn test_order_replaces_existing_key() {
    let order = Order::by_popularity()
      .add(sort::PRICE, false)
      .add(sort::POPULARITY, false);
    assert_eq!(order.to_param().as_deref(), Some("price,popularity"));
    assert_eq!(Order::new().remove(sort::PRICE).to_param(), None);
  }

  #[test]
  fn test_list_request_params() {
    let request = ListRequest::<Offer>::new(endpoint::OFFER_LIST)
      .filter(Filter::new().offers(["A", "B"]))
      .order(Order::by_popularity())
      .parameter(Parameter::new().limit(10).set("query", "milk"))
      .build();

    assert_eq!(
      request.meta().cache_key(),
      "GET:/v2/offers?limit=10&offer_ids=A,B&offset=0&order_by=-popularity&query=milk"
    );
  }
}
