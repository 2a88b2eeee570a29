//! Per-request event log for diagnostics.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;

/// A lifecycle marker recorded on a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
  pub name: String,
  pub detail: Option<String>,
  pub at: DateTime<Utc>,
}

/// Ordered list of lifecycle markers, appended from whichever thread is
/// currently working on the request.
#[derive(Debug, Default)]
pub struct EventLog {
  events: Mutex<Vec<Event>>,
}

impl EventLog {
  pub fn add(&self, name: &str) {
    self.push(name, None);
  }

  pub fn add_with_detail(&self, name: &str, detail: impl Into<String>) {
    self.push(name, Some(detail.into()));
  }

  fn push(&self, name: &str, detail: Option<String>) {
    self.events.lock().push(Event {
      name: name.to_string(),
      detail,
      at: Utc::now(),
    });
  }

  pub fn events(&self) -> Vec<Event> {
    self.events.lock().clone()
  }

  /// Event names in the order they were recorded.
  pub fn names(&self) -> Vec<String> {
    self.events.lock().iter().map(|e| e.name.clone()).collect()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.events.lock().iter().any(|e| e.name == name)
  }
}

impl fmt::Display for EventLog {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let events = self.events.lock();
    let start = events.first().map(|e| e.at);
    for event in events.iter() {
      let offset = start
        .map(|s| (event.at - s).num_milliseconds())
        .unwrap_or_default();
      write!(f, "+{}ms {}", offset, event.name)?;
      if let Some(detail) = &event.detail {
        write!(f, " [{}]", detail)?;
      }
      writeln!(f)?;
    }
    Ok(())
  }
}
