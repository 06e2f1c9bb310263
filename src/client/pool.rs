//! Connection pooling.
//!
//! The pool owns idle connections keyed by [`Destination`] and lends each
//! one to at most a single in-flight request at a time. Claiming happens as
//! one pop under the pool mutex, so there is no window in which two requests
//! could reclaim the same idle connection. Connections come back through the
//! [`Pooled`] guard, and only deliberately: [`Pooled::park`] returns a
//! healthy connection to the idle list, while dropping the guard — on
//! failure, timeout or abandonment — closes the connection for good. A
//! connection that saw any failure is never offered for reuse.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use http::uri::Scheme;
use parking_lot::Mutex;
use tracing::trace;

use super::conn::Conn;
use crate::error::{Error, ErrorKind};

/// The reuse key for a connection: scheme, host and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    scheme: Scheme,
    host: Box<str>,
    port: u16,
}

impl Destination {
    pub(crate) fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    pub(crate) fn host(&self) -> &str {
        &self.host
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl TryFrom<&http::Uri> for Destination {
    type Error = Error;

    fn try_from(uri: &http::Uri) -> Result<Self, Error> {
        let scheme = uri
            .scheme()
            .cloned()
            .ok_or_else(|| Error::message(ErrorKind::InvalidUri, "uri is missing a scheme"))?;
        let host = uri
            .host()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| Error::message(ErrorKind::InvalidUri, "uri is missing a host"))?;
        let port = uri.port_u16().unwrap_or(if scheme == Scheme::HTTPS {
            443
        } else {
            80
        });

        Ok(Self {
            scheme,
            host: host.into(),
            port,
        })
    }
}

/// Configuration for the connection pool.
#[derive(Debug, Clone)]
pub struct Config {
    /// How long a connection may sit idle before it is no longer reused.
    pub idle_timeout: Option<Duration>,

    /// The maximum number of idle connections kept per destination.
    pub max_idle_per_host: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::from_secs(90)),
            max_idle_per_host: 32,
        }
    }
}

/// A pool of reusable connections, shared by handle cloning.
#[derive(Debug, Clone)]
pub(crate) struct Pool {
    inner: Arc<Mutex<PoolInner>>,
}

#[derive(Debug)]
struct PoolInner {
    config: Config,
    idle: HashMap<Destination, Vec<Idle>>,
}

#[derive(Debug)]
struct Idle {
    at: Instant,
    conn: Conn,
}

impl Pool {
    pub(crate) fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                config,
                idle: HashMap::new(),
            })),
        }
    }

    /// Claim an idle connection for the destination, if one is available.
    ///
    /// The claim is atomic: the connection leaves the idle list under the
    /// pool lock and no other request can observe it. Closed and expired
    /// entries found along the way are evicted.
    pub(crate) fn checkout(&self, dest: &Destination) -> Option<Pooled> {
        let mut inner = self.inner.lock();
        let idle_timeout = inner.config.idle_timeout;

        let conn = inner
            .idle
            .get_mut(dest)
            .and_then(|list| pop_open(list, idle_timeout))?;

        if inner.idle.get(dest).is_some_and(|list| list.is_empty()) {
            inner.idle.remove(dest);
        }

        trace!(%dest, id = conn.id(), "reusing idle connection");
        Some(self.lend(dest.clone(), conn, true))
    }

    /// Wrap a freshly established connection in a pool guard.
    pub(crate) fn lease(&self, dest: Destination, conn: Conn) -> Pooled {
        self.lend(dest, conn, false)
    }

    fn lend(&self, dest: Destination, conn: Conn, reused: bool) -> Pooled {
        Pooled {
            conn: Some(conn),
            dest,
            reused,
            pool: Arc::downgrade(&self.inner),
        }
    }

    #[cfg(test)]
    fn idle_count(&self, dest: &Destination) -> usize {
        self.inner
            .lock()
            .idle
            .get(dest)
            .map_or(0, |list| list.len())
    }
}

/// Pop the most recently parked open connection, dropping closed entries.
///
/// Entries are pushed in time order; if the newest one has already expired,
/// every older entry has too and the whole list is evicted.
fn pop_open(list: &mut Vec<Idle>, idle_timeout: Option<Duration>) -> Option<Conn> {
    let expired_before = idle_timeout
        .filter(|timeout| !timeout.is_zero())
        .and_then(|timeout| Instant::now().checked_sub(timeout));

    while let Some(entry) = list.pop() {
        if expired_before.is_some_and(|cutoff| entry.at < cutoff) {
            trace!("idle connections expired");
            list.clear();
            return None;
        }

        if entry.conn.is_open() {
            return Some(entry.conn);
        }

        trace!("dropping closed idle connection");
    }

    None
}

impl PoolInner {
    fn park(&mut self, dest: Destination, conn: Conn) {
        let list = self.idle.entry(dest).or_default();
        if list.len() < self.config.max_idle_per_host {
            list.push(Idle {
                at: Instant::now(),
                conn,
            });
        }
    }
}

/// A connection on loan from the pool, exclusively held by one request.
///
/// Reuse is opt-in: [`Pooled::park`] puts a still-open connection back on
/// the idle list. Dropping the guard any other way — after a failure, a
/// fired timer, or because the exchange future was torn down mid-flight —
/// discards the connection.
pub(crate) struct Pooled {
    conn: Option<Conn>,
    dest: Destination,
    reused: bool,
    pool: Weak<Mutex<PoolInner>>,
}

impl Pooled {
    /// Whether this connection came out of the idle list rather than being
    /// freshly established.
    pub(crate) fn is_reused(&self) -> bool {
        self.reused
    }

    /// Return a healthy connection to the idle list for reuse.
    pub(crate) fn park(mut self) {
        if let Some(conn) = self.conn.take() {
            if conn.is_open() {
                if let Some(pool) = self.pool.upgrade() {
                    trace!(id = conn.id(), dest = %self.dest, "parking connection for reuse");
                    pool.lock().park(self.dest.clone(), conn);
                    return;
                }
            }
            trace!(id = conn.id(), "connection not reusable, discarding");
        }
    }

    /// Close the connection; it will not return to the pool.
    pub(crate) fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            trace!(id = conn.id(), "discarding connection");
        }
    }
}

impl fmt::Debug for Pooled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("dest", &self.dest)
            .field("reused", &self.reused)
            .finish_non_exhaustive()
    }
}

impl Deref for Pooled {
    type Target = Conn;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection taken only on drop")
    }
}

impl DerefMut for Pooled {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection taken only on drop")
    }
}

impl Drop for Pooled {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            trace!(id = conn.id(), "connection dropped mid-exchange, discarding");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::conn::tests::stub_conn;

    fn dest() -> Destination {
        Destination::try_from(&http::Uri::from_static("http://localhost:8080")).unwrap()
    }

    #[test]
    fn destination_from_uri() {
        let dest = dest();
        assert_eq!(dest.scheme(), &Scheme::HTTP);
        assert_eq!(dest.host(), "localhost");
        assert_eq!(dest.port(), 8080);
        assert_eq!(dest.to_string(), "http://localhost:8080");
    }

    #[test]
    fn destination_default_ports() {
        let http = Destination::try_from(&http::Uri::from_static("http://example.com/")).unwrap();
        assert_eq!(http.port(), 80);

        let https = Destination::try_from(&http::Uri::from_static("https://example.com/")).unwrap();
        assert_eq!(https.port(), 443);
    }

    #[test]
    fn destination_requires_scheme_and_host() {
        let relative = http::Uri::from_static("/just/a/path");
        let error = Destination::try_from(&relative).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidUri);
    }

    #[tokio::test]
    async fn checkout_is_exclusive() {
        let pool = Pool::new(Config::default());
        let (conn, _io) = stub_conn().await;

        pool.lease(dest(), conn).park();
        assert_eq!(pool.idle_count(&dest()), 1);

        let first = pool.checkout(&dest()).expect("idle connection available");
        assert!(first.is_reused());
        assert!(
            pool.checkout(&dest()).is_none(),
            "claimed connection must not be handed out twice"
        );
    }

    #[tokio::test]
    async fn discard_evicts_for_good() {
        let pool = Pool::new(Config::default());
        let (conn, _io) = stub_conn().await;

        pool.lease(dest(), conn).discard();
        assert_eq!(pool.idle_count(&dest()), 0);
        assert!(pool.checkout(&dest()).is_none());
    }

    #[tokio::test]
    async fn dropped_guards_do_not_repark() {
        let pool = Pool::new(Config::default());
        let (conn, _io) = stub_conn().await;

        drop(pool.lease(dest(), conn));
        assert_eq!(pool.idle_count(&dest()), 0);
    }

    #[tokio::test]
    async fn closed_connections_are_not_reused() {
        let pool = Pool::new(Config::default());
        let (conn, io) = stub_conn().await;

        pool.lease(dest(), conn).park();
        drop(io);
        // the driver task needs a beat to observe the closed transport
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(pool.checkout(&dest()).is_none());
    }

    #[tokio::test]
    async fn expired_idle_connections_are_evicted() {
        let pool = Pool::new(Config {
            idle_timeout: Some(Duration::from_millis(1)),
            ..Config::default()
        });
        let (conn, _io) = stub_conn().await;

        pool.lease(dest(), conn).park();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(pool.checkout(&dest()).is_none());
        assert_eq!(pool.idle_count(&dest()), 0);
    }

    #[tokio::test]
    async fn idle_list_is_capped() {
        let pool = Pool::new(Config {
            max_idle_per_host: 1,
            ..Config::default()
        });
        let (first, _io_first) = stub_conn().await;
        let (second, _io_second) = stub_conn().await;

        pool.lease(dest(), first).park();
        pool.lease(dest(), second).park();

        assert_eq!(pool.idle_count(&dest()), 1);
    }
}
