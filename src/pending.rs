//! Future-based access to a request's outcome.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::request::RequestHandle;

/// The outcome of a request submitted with
/// [`RequestQueue::send`](crate::queue::RequestQueue::send).
///
/// Await it, or call [`try_take`](Self::try_take) from a polling loop. A
/// request that is canceled (or dropped by a stopping queue) resolves to
/// [`Error::Canceled`].
pub struct PendingResponse<T> {
  receiver: oneshot::Receiver<Result<T>>,
  handle: RequestHandle,
}

impl<T> PendingResponse<T> {
  pub(crate) fn new(receiver: oneshot::Receiver<Result<T>>, handle: RequestHandle) -> Self {
    Self { receiver, handle }
  }

  pub fn handle(&self) -> &RequestHandle {
    &self.handle
  }

  pub fn cancel(&self) {
    self.handle.cancel();
  }

  /// The outcome if it has arrived, without waiting.
  pub fn try_take(&mut self) -> Option<Result<T>> {
    match self.receiver.try_recv() {
      Ok(result) => Some(result),
      Err(oneshot::error::TryRecvError::Empty) => None,
      // Sender dropped without sending - the request was canceled
      Err(oneshot::error::TryRecvError::Closed) => Some(Err(Error::Canceled)),
    }
  }
}

impl<T> Future for PendingResponse<T> {
  type Output = Result<T>;

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    Pin::new(&mut self.receiver)
      .poll(cx)
      .map(|received| received.unwrap_or(Err(Error::Canceled)))
  }
}

impl<T> std::fmt::Debug for PendingResponse<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PendingResponse")
      .field("handle", &self.handle)
      .finish_non_exhaustive()
  }
}
