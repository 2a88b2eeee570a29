//! Execution contexts for result callbacks.
//!
//! A dispatch worker never calls a listener directly; it hands a task to a
//! [`Delivery`], which decides where the listener runs.

use std::fmt;
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A listener invocation waiting to run.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait Delivery: Send + Sync {
  fn deliver(&self, task: Task);
}

/// Runs the task on the calling worker.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDelivery;

impl Delivery for InlineDelivery {
  fn deliver(&self, task: Task) {
    task();
  }
}

/// Spawns every task on a tokio runtime.
#[derive(Debug, Clone)]
pub struct ExecutorDelivery {
  handle: tokio::runtime::Handle,
}

impl ExecutorDelivery {
  pub fn new(handle: tokio::runtime::Handle) -> Self {
    Self { handle }
  }

  /// Deliver on the runtime this is called from.
  ///
  /// # Panics
  ///
  /// When called outside a tokio runtime.
  pub fn current() -> Self {
    Self::new(tokio::runtime::Handle::current())
  }
}

impl Delivery for ExecutorDelivery {
  fn deliver(&self, task: Task) {
    self.handle.spawn(async move { task() });
  }
}

/// Runs tasks in order on one dedicated thread, the way a UI main loop
/// would receive them.
pub struct ThreadDelivery {
  tx: mpsc::UnboundedSender<Task>,
  name: String,
}

impl ThreadDelivery {
  /// Start the callback thread. It exits once the delivery is dropped and
  /// queued tasks have run.
  pub fn spawn(name: &str) -> std::io::Result<Self> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
    let thread_name = name.to_string();
    thread::Builder::new().name(thread_name.clone()).spawn(move || {
      while let Some(task) = rx.blocking_recv() {
        task();
      }
      debug!(thread = %thread_name, "delivery thread stopped");
    })?;
    Ok(Self {
      tx,
      name: name.to_string(),
    })
  }
}

impl Delivery for ThreadDelivery {
  fn deliver(&self, task: Task) {
    if self.tx.send(task).is_err() {
      warn!(thread = %self.name, "delivery thread gone, dropping result");
    }
  }
}

impl fmt::Debug for ThreadDelivery {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ThreadDelivery")
      .field("name", &self.name)
      .finish_non_exhaustive()
  }
}
