//! The user-facing client session.
//!
//! A [`Client`] is a cheap handle over shared session state: the connection
//! pool, the ordered dispatch queues and the submission counter. Submitting
//! a request never fails synchronously and never blocks on the network —
//! every failure, including a malformed base address, arrives through the
//! returned [`ResponseHandle`]. In-flight requests hold their own clones of
//! the shared state, so dropping the last `Client` handle neither cancels
//! nor invalidates them; the state is torn down only once the final holder
//! is gone.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use self::dispatch::Exchange;
use self::handle::ResultSink;
use self::pool::{Destination, Pool};
use crate::body::{Body, ResponseBody};
use crate::error::{Error, ErrorKind};

mod builder;
pub(crate) mod conn;
pub(crate) mod deadline;
pub(crate) mod dispatch;
mod handle;
pub mod pool;

pub use builder::Builder;
pub use handle::ResponseHandle;

/// Client configuration, immutable once the client is built.
#[derive(Debug, Clone)]
pub struct Config {
    /// Time limit for connect, send and the wait for response headers, and
    /// independently for each body-read stall. `None` disables both timers.
    pub timeout: Option<Duration>,

    /// Send requests to any one connection strictly in submission order.
    pub guarantee_order: bool,

    /// Connection pool tuning.
    pub pool: pool::Config,

    /// TLS configuration used for `https` destinations.
    #[cfg(feature = "tls")]
    pub tls: Arc<rustls::ClientConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: None,
            guarantee_order: false,
            pool: pool::Config::default(),
            #[cfg(feature = "tls")]
            tls: conn::default_tls_config(),
        }
    }
}

/// Shared session state: everything an in-flight request needs to finish
/// without the client handle that submitted it.
struct Shared {
    config: Arc<Config>,
    pool: Pool,
    sequence: AtomicU64,
    queues: Mutex<HashMap<Destination, mpsc::UnboundedSender<Exchange>>>,
}

impl Shared {
    fn dispatch(&self, exchange: Exchange) {
        if self.config.guarantee_order {
            let mut queues = self.queues.lock();
            let sender = queues.entry(exchange.dest.clone()).or_insert_with_key(|dest| {
                dispatch::worker(self.pool.clone(), self.config.clone(), dest.clone())
            });
            if let Err(mpsc::error::SendError(exchange)) = sender.send(exchange) {
                exchange.sink.fulfill(Err(Error::message(
                    ErrorKind::ConnectionAborted,
                    "dispatch queue closed",
                )));
            }
        } else {
            let pool = self.pool.clone();
            let config = self.config.clone();
            tokio::spawn(async move { dispatch::drive(&pool, &config, exchange).await });
        }
    }
}

/// An asynchronous HTTP client for one base address.
///
/// # Example
/// ```no_run
/// # async fn run() -> Result<(), courier::Error> {
/// let client = courier::Client::builder()
///     .timeout(std::time::Duration::from_secs(5))
///     .build("http://localhost:8080");
/// let response = client.get("/status").await?;
/// println!("{}", response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    base: String,
    shared: Arc<Shared>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").field("base", &self.base).finish()
    }
}

impl Client {
    /// Create a client for a base address with the given configuration.
    ///
    /// The address is not validated here; an unusable address surfaces as
    /// [`ErrorKind::InvalidUri`] on the first request's handle.
    pub fn new(base: impl Into<String>, config: Config) -> Self {
        Self {
            base: base.into(),
            shared: Arc::new(Shared {
                pool: Pool::new(config.pool.clone()),
                config: Arc::new(config),
                sequence: AtomicU64::new(0),
                queues: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Create a new, empty builder for clients.
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Submit a GET request for the target.
    pub fn get(&self, target: &str) -> ResponseHandle {
        self.request(http::Method::GET, target)
    }

    /// Submit a request with an empty body.
    pub fn request(&self, method: http::Method, target: &str) -> ResponseHandle {
        self.send(method, target, Body::empty())
    }

    /// Submit a request with a body.
    ///
    /// Returns immediately. The handle resolves once response headers have
    /// arrived or the request has failed; it remains valid after this
    /// client is dropped.
    pub fn send(&self, method: http::Method, target: &str, body: Body) -> ResponseHandle {
        let (sink, handle) = ResultSink::channel();
        let seq = self.shared.sequence.fetch_add(1, Ordering::Relaxed);

        let request = match self.build_request(method, target, body) {
            Ok(request) => request,
            Err(error) => {
                sink.fulfill(Err(error));
                return handle;
            }
        };

        let dest = match Destination::try_from(request.uri()) {
            Ok(dest) => dest,
            Err(error) => {
                sink.fulfill(Err(error));
                return handle;
            }
        };

        self.shared.dispatch(Exchange {
            dest,
            request,
            seq,
            sink,
        });
        handle
    }

    fn build_request(
        &self,
        method: http::Method,
        target: &str,
        body: Body,
    ) -> Result<http::Request<Body>, Error> {
        let uri = self.resolve(target)?;
        http::Request::builder()
            .method(method)
            .uri(uri)
            .body(body)
            .map_err(|error| Error::new(ErrorKind::InvalidUri, error))
    }

    /// Join the base address and a request target into an absolute URI.
    fn resolve(&self, target: &str) -> Result<http::Uri, Error> {
        let base = self.base.trim_end_matches('/');
        let joined = if target.is_empty() {
            base.to_owned()
        } else if target.starts_with('/') {
            format!("{base}{target}")
        } else {
            format!("{base}/{target}")
        };

        joined
            .parse::<http::Uri>()
            .map_err(|error| Error::new(ErrorKind::InvalidUri, error))
    }
}

/// A received response: status, headers, and a body that is still
/// streaming in.
///
/// The response is delivered as soon as headers arrive. Reading the body
/// can independently fail later — most notably with
/// [`ErrorKind::TimedOut`] when a body read stalls past the configured
/// timeout — without retracting the head.
#[derive(Debug)]
pub struct Response {
    head: http::response::Parts,
    body: ResponseBody,
}

impl Response {
    pub(crate) fn new(head: http::response::Parts, body: ResponseBody) -> Self {
        Self { head, body }
    }

    /// The response status code.
    pub fn status(&self) -> http::StatusCode {
        self.head.status
    }

    /// The response headers.
    pub fn headers(&self) -> &http::HeaderMap {
        &self.head.headers
    }

    /// The HTTP version the server answered with.
    pub fn version(&self) -> http::Version {
        self.head.version
    }

    /// Buffer the remaining body to completion.
    pub async fn content_ready(self) -> Result<Bytes, Error> {
        self.body.read_to_end().await
    }

    /// Take the streaming body.
    pub fn into_body(self) -> ResponseBody {
        self.body
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Client: Send, Sync, Clone);
    assert_impl_all!(ResponseHandle: Send);
    assert_impl_all!(Response: Send);

    fn client(base: &str) -> Client {
        Client::new(base, Config::default())
    }

    #[test]
    fn resolve_joins_base_and_target() {
        let client = client("http://localhost:8080");
        assert_eq!(client.resolve("/x/y").unwrap(), "http://localhost:8080/x/y");
        assert_eq!(client.resolve("x/y").unwrap(), "http://localhost:8080/x/y");
        assert_eq!(client.resolve("").unwrap(), "http://localhost:8080");
    }

    #[test]
    fn resolve_keeps_base_path() {
        let client = client("http://localhost:8080/api/");
        assert_eq!(
            client.resolve("/items").unwrap(),
            "http://localhost:8080/api/items"
        );
    }

    #[test]
    fn resolve_rejects_garbage() {
        let client = client("http://localhost323:-1");
        let error = client.resolve("/").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidUri);
    }

    #[tokio::test]
    async fn invalid_base_is_deferred_to_the_handle() {
        let client = client("http://localhost323:-1");
        let error = client.get("/").await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidUri);
    }

    #[tokio::test]
    async fn missing_scheme_is_deferred_to_the_handle() {
        let client = client("localhost:8080");
        let error = client.get("/").await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidUri);
    }
}
