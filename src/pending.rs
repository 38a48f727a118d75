//! Async result handle for one-shot operations.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{Result, SessionError};

/// The eventual outcome of a `query`, `ping` or `quit` call.
///
/// The command is dispatched when the operation is called; awaiting only
/// collects the outcome. Dropping a `Pending` does not cancel the command.
#[must_use = "the outcome of the command is only observable by awaiting it"]
#[derive(Debug)]
pub struct Pending<T> {
    rx: oneshot::Receiver<Result<T>>,
}

pub(crate) type Resolver<T> = oneshot::Sender<Result<T>>;

impl<T> Pending<T> {
    pub(crate) fn channel() -> (Resolver<T>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// A handle that is already resolved.
    pub(crate) fn ready(outcome: Result<T>) -> Self {
        let (tx, pending) = Self::channel();
        let _ = tx.send(outcome);
        pending
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A listener that vanished without resolving never saw a terminal event.
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(Err(SessionError::ConnectionLost)))
    }
}
