//! Secure channel capability for `https` endpoints.
//!
//! The engine always opens the TCP connection itself. For `https`
//! endpoints it then hands the raw stream to a [`Connector`], which returns
//! the stream that HTTP is spoken over. Plain `http` endpoints never touch
//! the connector.

use core::fmt;
use std::{io, sync::Arc};

use futures::future::BoxFuture;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_rustls::{
    TlsConnector,
    rustls::{ClientConfig, RootCertStore, pki_types::ServerName},
};

/// Byte stream an exchange can be carried over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// A type-erased [`AsyncStream`].
pub type BoxedStream = Box<dyn AsyncStream>;

/// Attaches a secure channel to a freshly opened TCP stream.
pub trait Connector: Send + Sync + fmt::Debug {
    /// Wrap `stream`, connected to `host:port`, in a secure channel.
    ///
    /// # Errors
    ///
    /// Any I/O or handshake failure. The exchange that needed the channel
    /// fails with [`TransportError::Tls`](crate::TransportError::Tls).
    fn attach_secure(
        &self,
        stream: TcpStream,
        host: &str,
        port: u16,
    ) -> BoxFuture<'_, io::Result<BoxedStream>>;
}

/// Default [`Connector`]: rustls with the Mozilla root set.
#[derive(Clone)]
pub struct RustlsConnector {
    inner: TlsConnector,
}

impl RustlsConnector {
    /// Connector that trusts the bundled web PKI roots.
    #[must_use]
    pub fn new() -> Self {
        let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Self::from_config(Arc::new(config))
    }

    /// Connector using a caller-provided rustls configuration.
    #[must_use]
    pub fn from_config(config: Arc<ClientConfig>) -> Self {
        Self {
            inner: TlsConnector::from(config),
        }
    }
}

impl Default for RustlsConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RustlsConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RustlsConnector").finish_non_exhaustive()
    }
}

impl Connector for RustlsConnector {
    fn attach_secure(
        &self,
        stream: TcpStream,
        host: &str,
        _port: u16,
    ) -> BoxFuture<'_, io::Result<BoxedStream>> {
        let server_name = ServerName::try_from(host.to_owned())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e));

        Box::pin(async move {
            let tls = self.inner.connect(server_name?, stream).await?;
            Ok(Box::new(tls) as BoxedStream)
        })
    }
}
