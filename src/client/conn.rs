//! Establishing and driving transport connections.
//!
//! A [`Conn`] pairs an HTTP/1.1 sender with an identifier for tracing. The
//! codec's connection state machine runs on its own spawned task, so a
//! `Conn` (and the request holding it) never blocks on another request's
//! I/O. Establishment errors are classified here, at the connect stage,
//! before they ever reach a result sink.

use std::future::poll_fn;
use std::sync::atomic::{AtomicU64, Ordering};

use http::uri::Scheme;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use super::pool::Destination;
use super::Config;
use crate::body::Body;
use crate::error::{Error, ErrorKind};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// An established HTTP/1.1 connection.
pub(crate) struct Conn {
    id: u64,
    sender: hyper::client::conn::http1::SendRequest<Body>,
}

impl Conn {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    pub(crate) async fn send_request(
        &mut self,
        request: http::Request<Body>,
    ) -> hyper::Result<http::Response<hyper::body::Incoming>> {
        self.sender.send_request(request).await
    }

    /// Wait until the connection can take another request.
    ///
    /// For HTTP/1.1 this resolves once the previous response body has been
    /// consumed; it fails if the connection died in the meantime.
    pub(crate) async fn when_ready(&mut self) -> hyper::Result<()> {
        poll_fn(|cx| self.sender.poll_ready(cx)).await
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Establish a new connection to the destination.
pub(crate) async fn connect(dest: &Destination, config: &Config) -> Result<Conn, Error> {
    trace!(%dest, "connecting");

    let stream = TcpStream::connect((dest.host(), dest.port()))
        .await
        .map_err(|error| Error::new(ErrorKind::from_connect(&error), error))?;

    if dest.scheme() == &Scheme::HTTP {
        return handshake(stream).await;
    }

    #[cfg(feature = "tls")]
    if dest.scheme() == &Scheme::HTTPS {
        let stream = tls::wrap(stream, dest, config).await?;
        return handshake(stream).await;
    }

    let _ = config;
    Err(Error::message(ErrorKind::InvalidUri, "unsupported scheme"))
}

/// Perform the HTTP/1.1 handshake and spawn the connection driver.
async fn handshake<IO>(stream: IO) -> Result<Conn, Error>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sender, conn) = hyper::client::conn::http1::Builder::new()
        .handshake(TokioIo::new(stream))
        .await
        .map_err(Error::from_hyper)?;

    tokio::spawn(async move {
        if let Err(error) = conn.await {
            debug!(%error, "connection driver error");
        }
    });

    let id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
    trace!(id, "http/1.1 handshake complete");
    Ok(Conn { id, sender })
}

#[cfg(feature = "tls")]
mod tls {
    use std::sync::Arc;

    use rustls::pki_types::ServerName;
    use tokio::net::TcpStream;
    use tokio_rustls::client::TlsStream;
    use tokio_rustls::TlsConnector;
    use tracing::trace;

    use super::{Config, Destination, Error, ErrorKind};

    /// Wrap an established TCP stream in a client-side TLS session.
    pub(super) async fn wrap(
        stream: TcpStream,
        dest: &Destination,
        config: &Config,
    ) -> Result<TlsStream<TcpStream>, Error> {
        let name = ServerName::try_from(dest.host().to_owned())
            .map_err(|error| Error::new(ErrorKind::InvalidUri, error))?;

        let connector = TlsConnector::from(config.tls.clone());
        let stream = connector
            .connect(name, stream)
            .await
            .map_err(|error| Error::new(ErrorKind::from_connect(&error), error))?;

        trace!(dest = %dest, "tls handshake complete");
        Ok(stream)
    }

    /// A client TLS configuration trusting the platform's certificates.
    pub(crate) fn default_config() -> Arc<rustls::ClientConfig> {
        let mut roots = rustls::RootCertStore::empty();
        for cert in rustls_native_certs::load_native_certs().certs {
            let _ = roots.add(cert);
        }

        let mut config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        config.alpn_protocols.push(b"http/1.1".to_vec());
        Arc::new(config)
    }
}

#[cfg(feature = "tls")]
pub(crate) use tls::default_config as default_tls_config;
