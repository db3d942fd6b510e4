//! Completion handle for work dispatched to the worker pool.

use futures::channel::oneshot;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Result of a background operation, delivered once.
///
/// Control loops poll it with [`Pending::try_take`]; async callers await it.
/// Resolves to `None` if the job was dropped without completing, e.g. when
/// the pool shut down first.
pub struct Pending<T> {
    rx: oneshot::Receiver<T>,
}

/// Producer side handed to the background job.
pub struct Completer<T> {
    tx: oneshot::Sender<T>,
}

impl<T> Completer<T> {
    pub fn complete(self, value: T) {
        // The caller may have dropped its handle; nothing to deliver to then.
        let _ = self.tx.send(value);
    }
}

impl<T> Pending<T> {
    pub fn channel() -> (Completer<T>, Pending<T>) {
        let (tx, rx) = oneshot::channel();
        (Completer { tx }, Pending { rx })
    }

    /// Already-resolved handle, used when an operation fails before dispatch.
    pub fn ready(value: T) -> Self {
        let (completer, pending) = Self::channel();
        completer.complete(value);
        pending
    }

    /// Non-blocking check. `None` while the job is still running.
    pub fn try_take(&mut self) -> Option<T> {
        self.rx.try_recv().ok().flatten()
    }

    /// Block the current thread until the job completes.
    pub fn wait(self) -> Option<T> {
        futures::executor::block_on(self)
    }
}

impl<T> Future for Pending<T> {
    type Output = Option<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(Result::ok)
    }
}
