//! Building clients.

use std::time::Duration;

use super::{pool, Client, Config};

/// A builder for [`Client`]s.
///
/// The defaults are no timeout and unordered dispatch; the pool keeps up to
/// 32 idle connections per destination for 90 seconds.
#[derive(Debug, Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    /// Set the request timeout.
    ///
    /// The same duration limits the wait for response headers and each
    /// body-read stall, as two independent timers.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Send requests on any one connection strictly in submission order.
    pub fn guarantee_order(mut self, guarantee: bool) -> Self {
        self.config.guarantee_order = guarantee;
        self
    }

    /// Tune the connection pool.
    pub fn pool(mut self, pool: pool::Config) -> Self {
        self.config.pool = pool;
        self
    }

    /// Use a specific TLS configuration for `https` destinations.
    #[cfg(feature = "tls")]
    pub fn tls(mut self, tls: std::sync::Arc<rustls::ClientConfig>) -> Self {
        self.config.tls = tls;
        self
    }

    /// Build a client for the given base address.
    ///
    /// The address is validated lazily, on the first request.
    pub fn build(self, base: impl Into<String>) -> Client {
        Client::new(base, self.config)
    }
}
