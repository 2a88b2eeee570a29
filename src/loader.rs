//! Composite requests.
//!
//! A [`LoaderRequest`] owns a value of type `T` and a function that, given
//! that value, builds a set of sub-requests ([`LoaderPart`]s). Each part
//! carries a typed request and a merge function folding its result into `T`.
//! The loader itself never touches the network: it submits its parts under a
//! shared tag, collects their outcomes and reports back through a
//! [`LoaderListener`].
//!
//! ```text
//! Created -> RequestsSpawned -> AllFinished -> Delivered
//!     \______________\_______________\______-> Canceled
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::queue::RequestQueue;
use crate::request::{EventLog, Request, RequestDebugger, RequestHandle, RequestState, Tag};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Created,
  RequestsSpawned,
  AllFinished,
  Delivered,
  Canceled,
}

/// Receives a loader's progress.
pub trait LoaderListener<T>: Send + 'static {
  /// A sub-request finished and others are still running.
  fn on_intermediate(&mut self, _data: &T, _errors: &[Error]) {}

  /// Every sub-request finished.
  fn on_complete(self: Box<Self>, data: T, errors: Vec<Error>);
}

impl<T, F> LoaderListener<T> for F
where
  F: FnOnce(T, Vec<Error>) + Send + 'static,
{
  fn on_complete(self: Box<Self>, data: T, errors: Vec<Error>) {
    (*self)(data, errors)
  }
}

/// State a loader hands down to every sub-request.
struct Inherit {
  tag: Tag,
  skip_cache: bool,
  use_location: bool,
  timeout: Option<Duration>,
  debugger: Option<Arc<dyn RequestDebugger>>,
}

impl Inherit {
  fn apply<U>(&self, request: Request<U>) -> Request<U> {
    let mut request = request
      .with_tag(self.tag)
      .skip_cache(self.skip_cache)
      .use_location(self.use_location);
    if let Some(timeout) = self.timeout {
      request = request.with_timeout(timeout);
    }
    if let Some(debugger) = &self.debugger {
      request = request.with_debugger(Arc::clone(debugger));
    }
    request.meta().log().add("executed-by-loader");
    request
  }
}

type Spawn<T> = Box<dyn FnOnce(&RequestQueue, &Inherit, Arc<LoaderShared<T>>) -> RequestHandle + Send>;

/// One sub-request of a loader and how its result merges into the loader's
/// value.
pub struct LoaderPart<T> {
  spawn: Spawn<T>,
}

impl<T: Send + 'static> LoaderPart<T> {
  pub fn new<U, F>(request: Request<U>, apply: F) -> Self
  where
    U: Send + 'static,
    F: FnOnce(&mut T, U) + Send + 'static,
  {
    Self {
      spawn: Box::new(move |queue, inherit, shared| {
        let request = inherit.apply(request);
        let guard = PartGuard {
          shared: Some(shared),
        };
        queue.add(request, move |result| guard.complete(result, apply))
      }),
    }
  }
}

impl<T> fmt::Debug for LoaderPart<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LoaderPart").finish_non_exhaustive()
  }
}

/// Reports a part as finished exactly once: on completion, or on drop when
/// the part was canceled and its listener discarded.
struct PartGuard<T: Send + 'static> {
  shared: Option<Arc<LoaderShared<T>>>,
}

impl<T: Send + 'static> PartGuard<T> {
  fn complete<U>(mut self, result: Result<U>, apply: impl FnOnce(&mut T, U)) {
    if let Some(shared) = self.shared.take() {
      shared.finish_part(move |data, errors| match result {
        Ok(value) => apply(data, value),
        Err(e) => errors.push(e),
      });
    }
  }
}

impl<T: Send + 'static> Drop for PartGuard<T> {
  fn drop(&mut self) {
    if let Some(shared) = self.shared.take() {
      shared.finish_part(|_, _| {});
    }
  }
}

struct LoaderInner<T> {
  data: Option<T>,
  errors: Vec<Error>,
  remaining: usize,
  listener: Option<Box<dyn LoaderListener<T>>>,
}

struct LoaderShared<T> {
  inner: Mutex<LoaderInner<T>>,
  phase: Arc<Mutex<Phase>>,
  state: Arc<RequestState>,
}

impl<T: Send + 'static> LoaderShared<T> {
  fn finish_part(&self, update: impl FnOnce(&mut T, &mut Vec<Error>)) {
    let mut inner = self.inner.lock();
    {
      let LoaderInner { data, errors, .. } = &mut *inner;
      if let Some(data) = data.as_mut() {
        update(data, errors);
      }
    }
    inner.remaining = inner.remaining.saturating_sub(1);

    if self.state.is_canceled() {
      *self.phase.lock() = Phase::Canceled;
      if inner.remaining == 0 {
        inner.listener = None;
        self.state.finish();
      }
      return;
    }

    if inner.remaining > 0 {
      let LoaderInner {
        data,
        errors,
        listener,
        ..
      } = &mut *inner;
      if let (Some(data), Some(listener)) = (data.as_ref(), listener.as_mut()) {
        listener.on_intermediate(data, errors);
      }
      return;
    }

    *self.phase.lock() = Phase::AllFinished;
    let data = inner.data.take();
    let errors = std::mem::take(&mut inner.errors);
    let listener = inner.listener.take();
    drop(inner);
    self.deliver(data, errors, listener);
  }

  fn deliver(&self, data: Option<T>, errors: Vec<Error>, listener: Option<Box<dyn LoaderListener<T>>>) {
    *self.phase.lock() = Phase::Delivered;
    self.state.log().add("delivered");
    self.state.finish();
    debug!(errors = errors.len(), "loader finished");
    if let (Some(data), Some(listener)) = (data, listener) {
      listener.on_complete(data, errors);
    }
  }
}

/// A composite request: a value plus the sub-requests that fill it in.
///
/// There is deliberately no way to give a loader a custom delivery; its
/// callbacks always come from its own coordinator.
pub struct LoaderRequest<T> {
  data: T,
  errors: Vec<Error>,
  create: Box<dyn FnOnce(&T) -> Vec<LoaderPart<T>> + Send>,
  tag: Option<Tag>,
  skip_cache: bool,
  use_location: bool,
  timeout: Option<Duration>,
  debugger: Option<Arc<dyn RequestDebugger>>,
  state: Arc<RequestState>,
}

impl<T: Send + 'static> LoaderRequest<T> {
  pub fn new<F>(data: T, create: F) -> Self
  where
    F: FnOnce(&T) -> Vec<LoaderPart<T>> + Send + 'static,
  {
    Self {
      data,
      errors: Vec::new(),
      create: Box::new(create),
      tag: None,
      skip_cache: false,
      use_location: true,
      timeout: None,
      debugger: None,
      state: Arc::new(RequestState::default()),
    }
  }

  pub fn with_tag(mut self, tag: Tag) -> Self {
    self.tag = Some(tag);
    self
  }

  pub fn skip_cache(mut self, skip: bool) -> Self {
    self.skip_cache = skip;
    self
  }

  pub fn use_location(mut self, use_location: bool) -> Self {
    self.use_location = use_location;
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  pub fn with_debugger(mut self, debugger: Arc<dyn RequestDebugger>) -> Self {
    self.debugger = Some(debugger);
    self
  }

  /// Seed the error list, e.g. with a failure inherited from a parent request.
  pub fn with_error(mut self, error: Error) -> Self {
    self.errors.push(error);
    self
  }

  pub fn tag(&self) -> Option<Tag> {
    self.tag
  }
}

impl<T> fmt::Debug for LoaderRequest<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LoaderRequest")
      .field("tag", &self.tag)
      .field("skip_cache", &self.skip_cache)
      .field("use_location", &self.use_location)
      .field("errors", &self.errors.len())
      .finish_non_exhaustive()
  }
}

/// Caller-side view of a submitted loader.
#[derive(Clone)]
pub struct LoaderHandle {
  request: RequestHandle,
  phase: Arc<Mutex<Phase>>,
  tag: Tag,
}

impl LoaderHandle {
  /// Cancel the loader and every sub-request sharing its tag. No callback
  /// fires afterwards.
  pub fn cancel(&self) {
    self.request.cancel();
  }

  pub fn is_canceled(&self) -> bool {
    self.request.is_canceled()
  }

  pub fn is_finished(&self) -> bool {
    self.request.is_finished()
  }

  pub fn phase(&self) -> Phase {
    *self.phase.lock()
  }

  pub fn tag(&self) -> Tag {
    self.tag
  }

  pub fn log(&self) -> &EventLog {
    self.request.log()
  }

  pub fn request_handle(&self) -> &RequestHandle {
    &self.request
  }
}

impl fmt::Debug for LoaderHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LoaderHandle")
      .field("phase", &self.phase())
      .field("tag", &self.tag)
      .finish()
  }
}

impl RequestQueue {
  /// Submit a loader. A tag is assigned when none was given; canceling the
  /// returned handle cancels everything carrying that tag.
  pub fn add_loader<T, L>(&self, loader: LoaderRequest<T>, listener: L) -> LoaderHandle
  where
    T: Send + 'static,
    L: LoaderListener<T>,
  {
    let LoaderRequest {
      data,
      errors,
      create,
      tag,
      skip_cache,
      use_location,
      timeout,
      debugger,
      state,
    } = loader;

    let tag = tag.unwrap_or_default();
    let phase = Arc::new(Mutex::new(Phase::Created));
    state.log().add("added-to-queue");
    self.register(tag, &state);

    let queue = self.downgrade();
    let cancel_phase = Arc::clone(&phase);
    state.on_cancel(move || {
      {
        let mut phase = cancel_phase.lock();
        if *phase != Phase::Delivered {
          *phase = Phase::Canceled;
        }
      }
      if let Some(queue) = queue.upgrade() {
        queue.cancel_all(tag);
      }
    });

    let handle = LoaderHandle {
      request: RequestHandle::new(Arc::clone(&state)),
      phase: Arc::clone(&phase),
      tag,
    };
    if state.is_canceled() {
      state.finish();
      return handle;
    }

    let parts = create(&data);
    let shared = Arc::new(LoaderShared {
      inner: Mutex::new(LoaderInner {
        data: Some(data),
        errors,
        remaining: parts.len(),
        listener: Some(Box::new(listener)),
      }),
      phase: Arc::clone(&phase),
      state: Arc::clone(&state),
    });
    debug!(?tag, parts = parts.len(), "spawning loader requests");

    if parts.is_empty() {
      let (data, errors, listener) = {
        let mut inner = shared.inner.lock();
        (
          inner.data.take(),
          std::mem::take(&mut inner.errors),
          inner.listener.take(),
        )
      };
      shared.deliver(data, errors, listener);
      return handle;
    }

    {
      let mut phase = phase.lock();
      if *phase == Phase::Created {
        *phase = Phase::RequestsSpawned;
      }
    }
    let inherit = Inherit {
      tag,
      skip_cache,
      use_location,
      timeout,
      debugger,
    };
    for part in parts {
      let part_handle = (part.spawn)(self, &inherit, Arc::clone(&shared));
      // Canceled while spawning: cancel_all may have run before this part
      // was registered
      if state.is_canceled() {
        part_handle.cancel();
      }
    }
    handle
  }
}
