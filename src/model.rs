//! Records returned by the catalog and offer endpoints.
//!
//! Relations are kept as ids (`dealer_id`, `store_id`, `catalog_id`); the
//! entities they point at are hydrated into
//! [`Relations`](crate::autofill::Relations) by auto-fill.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Image URLs in the sizes the API serves. Catalog pages are lists of these.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Images {
  #[serde(default)]
  pub thumb: Option<String>,
  #[serde(default)]
  pub view: Option<String>,
  #[serde(default)]
  pub zoom: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
  pub price: f64,
  #[serde(default)]
  pub pre_price: Option<f64>,
  #[serde(default)]
  pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
  pub id: String,
  #[serde(default)]
  pub heading: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub catalog_id: Option<String>,
  #[serde(default)]
  pub catalog_page: Option<u32>,
  #[serde(default)]
  pub dealer_id: Option<String>,
  #[serde(default)]
  pub store_id: Option<String>,
  #[serde(default)]
  pub run_from: Option<String>,
  #[serde(default)]
  pub run_till: Option<String>,
  #[serde(default)]
  pub pricing: Option<Pricing>,
  #[serde(default)]
  pub images: Option<Images>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dealer {
  pub id: String,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub website: Option<String>,
  #[serde(default)]
  pub logo: Option<String>,
  /// Brand color as hex, without `#`
  #[serde(default)]
  pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Country {
  pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
  pub id: String,
  #[serde(default)]
  pub dealer_id: Option<String>,
  #[serde(default)]
  pub street: Option<String>,
  #[serde(default)]
  pub city: Option<String>,
  #[serde(default)]
  pub zip_code: Option<String>,
  #[serde(default)]
  pub country: Option<Country>,
  #[serde(default)]
  pub latitude: Option<f64>,
  #[serde(default)]
  pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
  pub width: f64,
  pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
  pub id: String,
  #[serde(default)]
  pub label: Option<String>,
  #[serde(default)]
  pub dealer_id: Option<String>,
  #[serde(default)]
  pub store_id: Option<String>,
  #[serde(default)]
  pub run_from: Option<String>,
  #[serde(default)]
  pub run_till: Option<String>,
  #[serde(default)]
  pub page_count: Option<u32>,
  #[serde(default)]
  pub offer_count: Option<u32>,
  #[serde(default)]
  pub dimensions: Option<Dimensions>,
  #[serde(default)]
  pub images: Option<Images>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotspotOffer {
  pub id: String,
  #[serde(default)]
  pub heading: String,
}

/// A clickable offer region on one or more catalog pages.
///
/// `locations` maps a page number to the polygon outlining the offer, in
/// coordinates relative to the catalog's dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
  #[serde(rename = "type", default)]
  pub kind: Option<String>,
  #[serde(default)]
  pub offer: Option<HotspotOffer>,
  #[serde(default)]
  pub locations: BTreeMap<String, Vec<[f64; 2]>>,
}

impl Hotspot {
  /// Pages this hotspot appears on.
  pub fn pages(&self) -> Vec<u32> {
    self
      .locations
      .keys()
      .filter_map(|page| page.parse().ok())
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_offer_tolerates_missing_fields() {
    let offer: Offer = serde_json::from_value(json!({
      "id": "o1",
      "heading": "Milk",
      "dealer_id": "d1",
      "pricing": {"price": 9.95, "currency": "DKK"},
      "unknown": true
    }))
    .unwrap();
    assert_eq!(offer.dealer_id.as_deref(), Some("d1"));
    assert_eq!(offer.store_id, None);
    assert_eq!(offer.pricing.unwrap().price, 9.95);
  }

  #[test]
  fn test_hotspot_pages() {
    let hotspot: Hotspot = serde_json::from_value(json!({
      "type": "offer",
      "offer": {"id": "o1", "heading": "Milk"},
      "locations": {"2": [[0.1, 0.2], [0.3, 0.4]], "3": [[0.0, 0.0]]}
    }))
    .unwrap();
    assert_eq!(hotspot.kind.as_deref(), Some("offer"));
    assert_eq!(hotspot.pages(), vec![2, 3]);
  }
}
