//! Location query parameters.
//!
//! Location-aware endpoints take the user's position as `r_lat`, `r_lng`,
//! `r_radius` and `r_sensor`, plus an optional bounding box. How the position
//! is obtained is up to the host application.

use parking_lot::RwLock;
use serde::Deserialize;

use crate::api::param;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Bounds {
  pub north: f64,
  pub east: f64,
  pub south: f64,
  pub west: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Location {
  pub latitude: f64,
  pub longitude: f64,
  /// Search radius in meters.
  #[serde(default)]
  pub radius: Option<u32>,
  /// True when the position came from a device sensor.
  #[serde(default)]
  pub sensor: bool,
  #[serde(default)]
  pub bounds: Option<Bounds>,
}

impl Location {
  pub fn new(latitude: f64, longitude: f64) -> Self {
    Self {
      latitude,
      longitude,
      radius: None,
      sensor: false,
      bounds: None,
    }
  }

  pub fn with_radius(mut self, radius: u32) -> Self {
    self.radius = Some(radius);
    self
  }

  pub fn with_sensor(mut self, sensor: bool) -> Self {
    self.sensor = sensor;
    self
  }

  pub fn with_bounds(mut self, bounds: Bounds) -> Self {
    self.bounds = Some(bounds);
    self
  }

  pub fn to_params(&self) -> Vec<(&'static str, String)> {
    let mut params = vec![
      (param::LATITUDE, self.latitude.to_string()),
      (param::LONGITUDE, self.longitude.to_string()),
      (param::SENSOR, self.sensor.to_string()),
    ];
    if let Some(radius) = self.radius {
      params.push((param::RADIUS, radius.to_string()));
    }
    if let Some(b) = &self.bounds {
      params.push((param::BOUND_NORTH, b.north.to_string()));
      params.push((param::BOUND_EAST, b.east.to_string()));
      params.push((param::BOUND_SOUTH, b.south.to_string()));
      params.push((param::BOUND_WEST, b.west.to_string()));
    }
    params
  }
}

pub trait LocationProvider: Send + Sync {
  fn location(&self) -> Option<Location>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoLocation;

impl LocationProvider for NoLocation {
  fn location(&self) -> Option<Location> {
    None
  }
}

/// A location set by the application, e.g. from config or a picker.
#[derive(Debug, Default)]
pub struct StaticLocation {
  location: RwLock<Option<Location>>,
}

impl StaticLocation {
  pub fn new(location: Location) -> Self {
    Self {
      location: RwLock::new(Some(location)),
    }
  }

  pub fn set(&self, location: Location) {
    *self.location.write() = Some(location);
  }

  pub fn clear(&self) {
    *self.location.write() = None;
  }
}

impl LocationProvider for StaticLocation {
  fn location(&self) -> Option<Location> {
    self.location.read().clone()
  }
}
