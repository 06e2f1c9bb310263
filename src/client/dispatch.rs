//! Driving requests from submission to a terminal outcome.
//!
//! Every request moves through one totally ordered lifecycle:
//! `Queued → Connecting → Sending → AwaitingHeaders → StreamingBody →
//! Completed`, with `Failed` reachable from any non-terminal state. The
//! pipeline claims a connection from the pool (or establishes one), runs
//! the exchange under the whole-request deadline, and fulfills the result
//! sink exactly once. Under the FIFO policy a per-destination worker task
//! drains a queue sequentially, so wire-send order on any one connection
//! matches submission order; unordered requests each get their own task.

use std::fmt;
use std::sync::Arc;

use http::uri::{Parts, Scheme};
use http::{HeaderValue, Uri};
use hyper::body::Incoming;
use tokio::sync::mpsc;
use tracing::trace;

use super::conn;
use super::deadline::Deadline;
use super::handle::ResultSink;
use super::pool::{Destination, Pool};
use super::{Config, Response};
use crate::body::{Body, ResponseBody};
use crate::error::{Error, ErrorKind};

/// Lifecycle states of a pending request, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Phase {
    Queued,
    Connecting,
    Sending,
    AwaitingHeaders,
    StreamingBody,
    Completed,
    Failed,
}

impl Phase {
    fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Queued => "queued",
            Phase::Connecting => "connecting",
            Phase::Sending => "sending",
            Phase::AwaitingHeaders => "awaiting-headers",
            Phase::StreamingBody => "streaming-body",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        })
    }
}

/// Tracks one request's progress through the lifecycle.
///
/// The observable phase only ever moves forward; once a terminal phase is
/// recorded no further transition happens. An internal retry re-runs
/// earlier steps without the phase moving backwards.
#[derive(Debug)]
pub(crate) struct Track {
    seq: u64,
    phase: Phase,
}

impl Track {
    fn new(seq: u64) -> Self {
        Self {
            seq,
            phase: Phase::Queued,
        }
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    pub(crate) fn advance(&mut self, next: Phase) {
        if self.phase.is_terminal() || next <= self.phase {
            return;
        }
        trace!(seq = self.seq, from = %self.phase, to = %next, "request state");
        self.phase = next;
    }
}

/// A submitted request on its way through the pipeline.
#[derive(Debug)]
pub(crate) struct Exchange {
    pub(crate) dest: Destination,
    pub(crate) request: http::Request<Body>,
    pub(crate) seq: u64,
    pub(crate) sink: ResultSink,
}

/// Start the ordered dispatch worker for one destination.
///
/// The worker owns its own pool handle, never the session, so it drains
/// whatever is queued and exits once every sender is gone — pending
/// requests finish even after the client handle is dropped.
pub(crate) fn worker(
    pool: Pool,
    config: Arc<Config>,
    dest: Destination,
) -> mpsc::UnboundedSender<Exchange> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        trace!(%dest, "ordered dispatch started");
        while let Some(exchange) = rx.recv().await {
            drive(&pool, &config, exchange).await;
        }
        trace!(%dest, "ordered dispatch finished");
    });
    tx
}

/// Drive one request to a terminal outcome and fulfill its sink.
pub(crate) async fn drive(pool: &Pool, config: &Config, exchange: Exchange) {
    let Exchange {
        dest,
        request,
        seq,
        sink,
    } = exchange;

    let mut track = Track::new(seq);
    let deadline = Deadline::new(config.timeout);
    let (parts, body) = request.into_parts();

    let outcome = deadline
        .enforce(open_exchange(pool, config, &dest, &parts, &body, &mut track))
        .await;

    match outcome {
        Ok(response) => {
            track.advance(Phase::StreamingBody);
            let (head, incoming) = response.into_parts();
            let body = ResponseBody::new(incoming, config.timeout, track);
            sink.fulfill(Ok(Response::new(head, body)));
        }
        Err(error) => {
            track.advance(Phase::Failed);
            trace!(seq, kind = %error.kind(), "request failed");
            sink.fulfill(Err(error));
        }
    }
}

/// Run the connect/send/await-headers portion of the exchange.
///
/// An idle connection that turns out to be half-closed when first used is
/// retried once on a freshly established connection; any further failure is
/// terminal. A connection that saw a failure is discarded, never reparked.
async fn open_exchange(
    pool: &Pool,
    config: &Config,
    dest: &Destination,
    parts: &http::request::Parts,
    body: &Body,
    track: &mut Track,
) -> Result<http::Response<Incoming>, Error> {
    let mut fresh_only = false;

    loop {
        track.advance(Phase::Connecting);
        let mut conn = match (!fresh_only).then(|| pool.checkout(dest)).flatten() {
            Some(conn) => conn,
            None => {
                let conn = conn::connect(dest, config).await?;
                pool.lease(dest.clone(), conn)
            }
        };

        let mut request = http::Request::from_parts(parts.clone(), body.clone());
        prepare(&mut request);

        track.advance(Phase::Sending);
        let send = conn.send_request(request);
        track.advance(Phase::AwaitingHeaders);

        match send.await {
            Ok(response) => {
                // repark once the connection is ready for the next request
                tokio::spawn(repark(conn));
                return Ok(response);
            }
            Err(error) => {
                let was_reused = conn.is_reused();
                conn.discard();
                let error = Error::from_hyper(error);
                if was_reused && !fresh_only && error.kind() == ErrorKind::ConnectionAborted {
                    trace!(
                        seq = track.seq(),
                        "idle connection went stale, retrying on a fresh connection"
                    );
                    fresh_only = true;
                    continue;
                }
                return Err(error);
            }
        }
    }
}

async fn repark(mut conn: super::pool::Pooled) {
    match conn.when_ready().await {
        Ok(()) => conn.park(),
        Err(_) => conn.discard(),
    }
}

/// Put the request into the shape the HTTP/1.1 codec expects: a Host
/// header derived from the absolute target, an identifying user agent,
/// and an origin-form request target.
fn prepare(request: &mut http::Request<Body>) {
    request
        .headers_mut()
        .entry(http::header::USER_AGENT)
        .or_insert_with(|| {
            HeaderValue::from_static(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
        });

    set_host_header(request);
    origin_form(request.uri_mut());
}

fn set_host_header(request: &mut http::Request<Body>) {
    if request.headers().contains_key(http::header::HOST) {
        return;
    }
    let uri = request.uri();
    let Some(host) = uri.host() else { return };

    let value = match uri.port_u16() {
        Some(port) if port != default_port(uri) => format!("{host}:{port}"),
        _ => host.to_owned(),
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        request.headers_mut().insert(http::header::HOST, value);
    }
}

fn default_port(uri: &Uri) -> u16 {
    if uri.scheme() == Some(&Scheme::HTTPS) {
        443
    } else {
        80
    }
}

/// Reduce the URI to just its path and query.
fn origin_form(uri: &mut Uri) {
    *uri = match uri.path_and_query() {
        Some(path) if path.as_str() != "/" => {
            let mut parts = Parts::default();
            parts.path_and_query = Some(path.clone());
            Uri::from_parts(parts).expect("path is a valid uri")
        }
        _ => Uri::default(),
    };
}
