use tracing::debug;

use super::EventLog;
use crate::error::Error;

/// Hook that observes a request once it reaches a terminal state.
pub trait RequestDebugger: Send + Sync {
  fn on_finish(&self, key: &str, log: &EventLog, error: Option<&Error>);
}

/// Dumps the event log of every finished request at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDebugger;

impl RequestDebugger for TracingDebugger {
  fn on_finish(&self, key: &str, log: &EventLog, error: Option<&Error>) {
    match error {
      Some(e) => debug!(request = key, error = %e, "request finished\n{}", log),
      None => debug!(request = key, "request finished\n{}", log),
    }
  }
}
