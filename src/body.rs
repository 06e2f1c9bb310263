//! Request and response body types.
//!
//! [`Body`] is the buffered request body handed to the HTTP codec.
//! [`ResponseBody`] wraps the codec's incoming stream and enforces the
//! body-read stall timer: the timer is armed when the first read suspends
//! and re-armed after every delivered frame, so a response whose headers
//! were already handed to the caller can still fail asynchronously with
//! [`ErrorKind::TimedOut`][crate::ErrorKind::TimedOut].

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http_body::{Frame, SizeHint};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use pin_project::pin_project;
use tokio::time::{Instant, Sleep};

use crate::client::dispatch::{Phase, Track};
use crate::error::Error;

/// A buffered request body.
///
/// Bodies can be created from [`Bytes`], [`String`], [`Vec<u8>`] or
/// [`&'static str`](str) using [`From`] implementations, or empty with
/// [`Body::empty`].
#[derive(Debug, Clone)]
pub struct Body {
    inner: InnerBody,
}

#[derive(Debug, Clone)]
enum InnerBody {
    Empty,
    Full(Full<Bytes>),
}

impl Body {
    /// Create a new empty body.
    pub fn empty() -> Self {
        Self {
            inner: InnerBody::Empty,
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Bytes> for Body {
    fn from(body: Bytes) -> Self {
        Self {
            inner: InnerBody::Full(Full::new(body)),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(body: Vec<u8>) -> Self {
        Bytes::from(body).into()
    }
}

impl From<String> for Body {
    fn from(body: String) -> Self {
        Bytes::from(body).into()
    }
}

impl From<&'static str> for Body {
    fn from(body: &'static str) -> Self {
        Bytes::from_static(body.as_bytes()).into()
    }
}

impl http_body::Body for Body {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match &mut self.get_mut().inner {
            InnerBody::Empty => Poll::Ready(None),
            InnerBody::Full(full) => Pin::new(full).poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.inner {
            InnerBody::Empty => true,
            InnerBody::Full(full) => full.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.inner {
            InnerBody::Empty => SizeHint::with_exact(0),
            InnerBody::Full(full) => full.size_hint(),
        }
    }
}

/// The streaming body of a received response.
///
/// Reads suspend like any other body; if a read stalls past the configured
/// body-read timeout the stream fails with a timeout error while the
/// already-delivered response head remains valid.
#[pin_project]
pub struct ResponseBody {
    #[pin]
    inner: Incoming,
    stall: Option<Duration>,
    #[pin]
    timer: Option<Sleep>,
    track: Track,
}

impl ResponseBody {
    pub(crate) fn new(inner: Incoming, stall: Option<Duration>, track: Track) -> Self {
        Self {
            inner,
            stall,
            timer: None,
            track,
        }
    }

    /// Read the remaining body to completion, returning the collected bytes.
    pub async fn read_to_end(self) -> Result<Bytes, Error> {
        Ok(BodyExt::collect(self).await?.to_bytes())
    }
}

impl http_body::Body for ResponseBody {
    type Data = Bytes;
    type Error = Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();

        match this.inner.poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let (Some(stall), Some(timer)) = (this.stall, this.timer.as_mut().as_pin_mut())
                {
                    timer.reset(Instant::now() + *stall);
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(error))) => {
                this.track.advance(Phase::Failed);
                Poll::Ready(Some(Err(Error::from_hyper(error))))
            }
            Poll::Ready(None) => {
                this.track.advance(Phase::Completed);
                Poll::Ready(None)
            }
            Poll::Pending => {
                if let Some(stall) = this.stall {
                    if this.timer.as_mut().as_pin_mut().is_none() {
                        this.timer.set(Some(tokio::time::sleep(*stall)));
                    }
                    if let Some(timer) = this.timer.as_mut().as_pin_mut() {
                        if timer.poll(cx).is_ready() {
                            this.track.advance(Phase::Failed);
                            return Poll::Ready(Some(Err(Error::timed_out())));
                        }
                    }
                }
                Poll::Pending
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody")
            .field("stall", &self.stall)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use http_body::Body as _;

    use super::*;

    #[test]
    fn empty_body_is_done() {
        let body = Body::empty();
        assert!(body.is_end_stream());
        assert_eq!(body.size_hint().exact(), Some(0));
    }

    #[test]
    fn full_body_reports_size() {
        let body = Body::from("hello");
        assert!(!body.is_end_stream());
        assert_eq!(body.size_hint().exact(), Some(5));
    }

    #[tokio::test]
    async fn full_body_yields_bytes_once() {
        let body = Body::from("payload");
        let collected = BodyExt::collect(body).await.expect("infallible");
        assert_eq!(collected.to_bytes(), Bytes::from_static(b"payload"));
    }
}
