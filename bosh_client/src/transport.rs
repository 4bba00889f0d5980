//! One HTTP round trip to the connection manager.
//!
//! [`Transport`] is the seam between the session engine and the network.
//! [`HttpTransport`] is the default implementation: HTTP/1.1 over hyper,
//! TCP opened with tokio, upgraded through the configured [`Connector`] for
//! `https` endpoints. Connections are kept alive and reused, but no
//! connection is tied to a particular request id.

use core::fmt;
use std::sync::Arc;

use async_lock::Mutex;
use bytes::Bytes;
use futures::future::BoxFuture;
use http_body_util::{BodyExt, Full};
use hyper::{
    Request,
    client::conn::http1::{self, SendRequest},
    header::{CONTENT_TYPE, HOST},
};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use url::{Host, Url};

use crate::{
    config::BoshConfig,
    connector::{BoxedStream, Connector, RustlsConnector},
    error::{BoshError, TransportError},
};

/// Content type of every request body.
pub const XML_CONTENT_TYPE: &str = "text/xml; charset=utf-8";

/// Idle keep-alive connections retained for reuse.
const MAX_IDLE_CONNECTIONS: usize = 4;

/// A minimal HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// The HTTP status code.
    pub status: u16,

    /// The response body bytes.
    pub body: Vec<u8>,
}

/// Sends one serialised wrapper body and returns the CM's answer.
///
/// Implementations handle connection management and secure channels; the
/// caller applies timeouts and cancellation.
pub trait Transport: Send + Sync + fmt::Debug {
    /// POST `xml` to the endpoint.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the request could not be delivered or
    /// its response could not be read. Non-200 statuses are *not* errors at
    /// this level.
    fn exchange(&self, xml: String) -> BoxFuture<'_, Result<HttpResponse, TransportError>>;
}

/// Default [`Transport`] built on hyper's HTTP/1.1 client.
pub struct HttpTransport {
    host: String,
    port: u16,
    authority: String,
    target: String,
    connector: Option<Arc<dyn Connector>>,
    idle: Mutex<Vec<SendRequest<Full<Bytes>>>>,
}

impl HttpTransport {
    /// Transport for the endpoint in `config`.
    ///
    /// `https` endpoints use the configured connector, or a
    /// [`RustlsConnector`] if none was set.
    ///
    /// # Errors
    ///
    /// Returns [`BoshError::InvalidConfig`] if the endpoint has no host.
    pub fn new(config: &BoshConfig) -> Result<Self, BoshError> {
        let endpoint = config.endpoint();
        let (host, authority) = host_and_authority(endpoint)?;
        let port = endpoint.port_or_known_default().unwrap_or(80);

        let connector = if config.is_secure() {
            Some(
                config
                    .connector()
                    .cloned()
                    .unwrap_or_else(|| Arc::new(RustlsConnector::new())),
            )
        } else {
            None
        };

        Ok(Self {
            host,
            port,
            authority,
            target: request_target(endpoint),
            connector,
            idle: Mutex::new(Vec::new()),
        })
    }

    async fn round_trip(&self, xml: String) -> Result<HttpResponse, TransportError> {
        let mut sender = self.checkout().await?;

        let request = Request::post(self.target.as_str())
            .header(HOST, self.authority.as_str())
            .header(CONTENT_TYPE, XML_CONTENT_TYPE)
            .body(Full::new(Bytes::from(xml)))
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let response = sender.send_request(request).await?;
        let status = response.status().as_u16();
        let body = response.into_body().collect().await?.to_bytes().to_vec();

        self.checkin(sender).await;

        Ok(HttpResponse { status, body })
    }

    async fn checkout(&self) -> Result<SendRequest<Full<Bytes>>, TransportError> {
        loop {
            let candidate = self.idle.lock().await.pop();
            let Some(mut sender) = candidate else {
                break;
            };
            if sender.ready().await.is_ok() {
                tracing::trace!(host = %self.host, "reusing keep-alive connection");
                return Ok(sender);
            }
        }

        self.connect().await
    }

    async fn checkin(&self, sender: SendRequest<Full<Bytes>>) {
        if sender.is_closed() {
            return;
        }
        let mut idle = self.idle.lock().await;
        if idle.len() < MAX_IDLE_CONNECTIONS {
            idle.push(sender);
        }
    }

    async fn connect(&self) -> Result<SendRequest<Full<Bytes>>, TransportError> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(TransportError::Connect)?;
        if let Err(e) = tcp.set_nodelay(true) {
            tracing::debug!("set_nodelay failed: {e}");
        }

        let stream: BoxedStream = match &self.connector {
            Some(connector) => connector
                .attach_secure(tcp, &self.host, self.port)
                .await
                .map_err(TransportError::Tls)?,
            None => Box::new(tcp),
        };

        let (sender, connection) = http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!("connection closed: {e}");
            }
        });

        tracing::debug!(host = %self.host, port = self.port, "opened connection");
        Ok(sender)
    }
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("authority", &self.authority)
            .field("target", &self.target)
            .field("secure", &self.connector.is_some())
            .finish_non_exhaustive()
    }
}

impl Transport for HttpTransport {
    fn exchange(&self, xml: String) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        Box::pin(self.round_trip(xml))
    }
}

/// Host to connect to (IPv6 without brackets) and the `Host` header value.
fn host_and_authority(endpoint: &Url) -> Result<(String, String), BoshError> {
    let host = match endpoint.host() {
        Some(Host::Ipv6(addr)) => addr.to_string(),
        Some(other) => other.to_string(),
        None => return Err(BoshError::InvalidConfig("endpoint has no host".into())),
    };

    let host_header = endpoint.host_str().unwrap_or(&host);
    let authority = match endpoint.port() {
        Some(port) => format!("{host_header}:{port}"),
        None => host_header.to_owned(),
    };

    Ok((host, authority))
}

/// Origin-form request target: path plus query.
fn request_target(endpoint: &Url) -> String {
    match endpoint.query() {
        Some(query) => format!("{}?{query}", endpoint.path()),
        None => endpoint.path().to_owned(),
    }
}
