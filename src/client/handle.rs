//! Asynchronous result delivery.
//!
//! Each submitted request gets a [`ResultSink`]/[`ResponseHandle`] pair: a
//! write-once slot for the terminal outcome and the future the caller
//! awaits. The sink is consumed by fulfillment, so a second outcome cannot
//! be recorded, and the handle resolves independently of the client handle
//! that created it.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::Response;
use crate::error::{Error, ErrorKind};

type Outcome = Result<Response, Error>;

/// The write-once slot a request's terminal outcome is delivered into.
#[derive(Debug)]
pub(crate) struct ResultSink {
    tx: oneshot::Sender<Outcome>,
}

impl ResultSink {
    pub(crate) fn channel() -> (ResultSink, ResponseHandle) {
        let (tx, rx) = oneshot::channel();
        (ResultSink { tx }, ResponseHandle { rx })
    }

    /// Record the terminal outcome.
    ///
    /// Consumes the sink, so exactly one outcome is ever written. A caller
    /// that dropped its handle is ignored; the request still completed.
    pub(crate) fn fulfill(self, outcome: Outcome) {
        let _ = self.tx.send(outcome);
    }
}

/// A handle to the eventual outcome of a submitted request.
///
/// Awaiting it yields the response once headers have been received, or the
/// classified error that ended the request. The handle stays valid after
/// the [`Client`][crate::Client] that produced it is gone.
#[derive(Debug)]
pub struct ResponseHandle {
    rx: oneshot::Receiver<Outcome>,
}

impl Future for ResponseHandle {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::message(
                ErrorKind::ConnectionAborted,
                "request was abandoned before completion",
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}
