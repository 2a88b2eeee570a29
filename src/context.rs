//! Collaborators shared by everything the queue dispatches.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::api::Environment;
use crate::clock::{Clock, SystemClock};
use crate::location::{LocationProvider, NoLocation};
use crate::request::ParamsEncoding;
use crate::session::{NoSession, SessionProvider};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_WORKERS: usize = 4;

/// Environment, session, location and clock for one SDK instance.
///
/// Built once by the application and handed to the queue; nothing in the
/// crate reaches for global state.
#[derive(Clone)]
pub struct Context {
  pub environment: Environment,
  pub session: Arc<dyn SessionProvider>,
  pub location: Arc<dyn LocationProvider>,
  pub clock: Arc<dyn Clock>,
  pub api_key: Option<String>,
  pub default_timeout: Duration,
  pub workers: usize,
  pub encoding: ParamsEncoding,
}

impl Context {
  pub fn new(environment: Environment) -> Self {
    Self {
      environment,
      session: Arc::new(NoSession),
      location: Arc::new(NoLocation),
      clock: Arc::new(SystemClock),
      api_key: None,
      default_timeout: DEFAULT_TIMEOUT,
      workers: DEFAULT_WORKERS,
      encoding: ParamsEncoding::default(),
    }
  }

  pub fn with_session(mut self, session: Arc<dyn SessionProvider>) -> Self {
    self.session = session;
    self
  }

  pub fn with_location(mut self, location: Arc<dyn LocationProvider>) -> Self {
    self.location = location;
    self
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
    self.api_key = Some(api_key.into());
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.default_timeout = timeout;
    self
  }

  /// Number of dispatch workers. At least one.
  pub fn with_workers(mut self, workers: usize) -> Self {
    self.workers = workers.max(1);
    self
  }

  pub fn with_encoding(mut self, encoding: ParamsEncoding) -> Self {
    self.encoding = encoding;
    self
  }
}

impl Default for Context {
  fn default() -> Self {
    Self::new(Environment::default())
  }
}

impl fmt::Debug for Context {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Context")
      .field("environment", &self.environment)
      .field("default_timeout", &self.default_timeout)
      .field("workers", &self.workers)
      .field("encoding", &self.encoding)
      .finish_non_exhaustive()
  }
}
