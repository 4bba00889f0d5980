//! Stub connection manager for integration tests.
//!
//! Serves HTTP/1.1 on a loopback port and behaves like a CM with `hold=1`:
//! empty polls are parked and answered with an empty body as soon as the
//! next non-poll request arrives (or after [`POLL_HOLD`]). Every other
//! request is handed to the test as a [`StubExchange`] to answer by hand.

#![allow(
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::unwrap_used,
    dead_code,
    missing_docs,
    unreachable_pub
)]

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, OnceLock, PoisonError},
    time::Duration,
};

use bosh_client::{Body, attr};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response, StatusCode, body::Incoming};
use tokio::{net::TcpListener, sync::oneshot};

/// How long the stub parks an empty poll before answering it.
pub const POLL_HOLD: Duration = Duration::from_secs(2);

/// How long tests wait for the client to send something.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Session id handed out by the stub.
pub const STUB_SID: &str = "123XYZ";

pub fn init_tracing() {
    static ONCE: OnceLock<()> = OnceLock::new();
    ONCE.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

enum Reply {
    Body(Body),
    Status(u16),
}

/// A request waiting for the test to answer it.
pub struct StubExchange {
    pub body: Body,
    responder: oneshot::Sender<Reply>,
}

impl StubExchange {
    /// Answer with a wrapper body.
    pub fn respond(self, body: Body) {
        let _ = self.responder.send(Reply::Body(body));
    }

    /// Answer with a bare HTTP status and no body.
    pub fn respond_status(self, status: u16) {
        let _ = self.responder.send(Reply::Status(status));
    }
}

#[derive(Default)]
struct StubState {
    requests: Mutex<Vec<Body>>,
    held: Mutex<Vec<oneshot::Sender<Reply>>>,
}

impl StubState {
    fn record(&self, body: Body) {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(body);
    }

    fn release_held(&self) {
        let held: Vec<_> = self
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for waiter in held {
            let _ = waiter.send(Reply::Body(Body::default()));
        }
    }
}

pub struct StubCm {
    address: SocketAddr,
    state: Arc<StubState>,
    exchanges: async_channel::Receiver<StubExchange>,
    /// Dropping the sender signals cancellation to the accept loop.
    _cancel: async_channel::Sender<()>,
}

impl StubCm {
    pub async fn start() -> Self {
        let tcp = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = tcp.local_addr().expect("local_addr");

        let state = Arc::new(StubState::default());
        let (exchange_tx, exchanges) = async_channel::unbounded();
        let (cancel_tx, cancel_rx) = async_channel::bounded::<()>(1);

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            accept_loop(tcp, accept_state, exchange_tx, cancel_rx).await;
        });

        Self {
            address,
            state,
            exchanges,
            _cancel: cancel_tx,
        }
    }

    pub fn uri(&self) -> url::Url {
        url::Url::parse(&format!("http://{}/http-bind", self.address)).expect("uri")
    }

    pub fn uri_https(&self) -> url::Url {
        url::Url::parse(&format!("https://{}/http-bind", self.address)).expect("uri")
    }

    /// Wait for the next request that is not an empty poll.
    pub async fn await_request(&self) -> StubExchange {
        tokio::time::timeout(REQUEST_TIMEOUT, self.exchanges.recv())
            .await
            .expect("timed out waiting for a request")
            .expect("stub CM stopped")
    }

    /// Whether a request is waiting within `within`.
    pub async fn request_within(&self, within: Duration) -> Option<StubExchange> {
        tokio::time::timeout(within, self.exchanges.recv())
            .await
            .ok()
            .and_then(Result::ok)
    }

    /// Every request received so far, polls included, in arrival order.
    pub fn requests(&self) -> Vec<Body> {
        self.state
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// A typical creation response for `request`.
pub fn session_creation_response(request: &Body) -> Body {
    Body::builder()
        .attribute(attr::SID, STUB_SID)
        .attribute(attr::WAIT, request.attribute(attr::WAIT).unwrap_or("60"))
        .attribute(attr::HOLD, "1")
        .attribute(attr::REQUESTS, "2")
        .attribute(attr::INACTIVITY, "30")
        .attribute(attr::POLLING, "2")
        .attribute(attr::VER, "1.8")
        .build()
}

/// A `type='terminate'` response, optionally with a condition.
pub fn terminate_response(condition: Option<&str>) -> Body {
    let builder = Body::builder().attribute(attr::TYPE, attr::TYPE_TERMINATE);
    match condition {
        Some(c) => builder.attribute(attr::CONDITION, c).build(),
        None => builder.build(),
    }
}

fn is_poll(body: &Body) -> bool {
    body.attribute(attr::SID).is_some() && body.attribute(attr::TYPE).is_none() && body.is_empty()
}

async fn accept_loop(
    tcp: TcpListener,
    state: Arc<StubState>,
    exchanges: async_channel::Sender<StubExchange>,
    cancel: async_channel::Receiver<()>,
) {
    use tokio::task::JoinSet;

    let mut conns = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.recv() => break,
            res = tcp.accept() => {
                match res {
                    Ok((stream, addr)) => {
                        let state = Arc::clone(&state);
                        let exchanges = exchanges.clone();
                        conns.spawn(async move {
                            serve_http_connection(stream, addr, state, exchanges).await;
                        });
                    }
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                    }
                }
            }
        }
    }

    conns.abort_all();
}

async fn serve_http_connection(
    tcp: tokio::net::TcpStream,
    addr: SocketAddr,
    state: Arc<StubState>,
    exchanges: async_channel::Sender<StubExchange>,
) {
    use hyper_util::rt::TokioIo;

    let io = TokioIo::new(tcp);

    let service = hyper::service::service_fn(move |req| {
        let state = Arc::clone(&state);
        let exchanges = exchanges.clone();
        async move { Ok::<_, hyper::Error>(handle(req, &state, &exchanges).await) }
    });

    let builder =
        hyper_util::server::conn::auto::Builder::new(hyper_util::rt::TokioExecutor::new());
    let conn = builder.serve_connection(io, service);

    if let Err(e) = conn.await {
        tracing::debug!("HTTP connection from {addr} ended: {e}");
    }
}

async fn handle(
    req: Request<Incoming>,
    state: &StubState,
    exchanges: &async_channel::Sender<StubExchange>,
) -> Response<Full<Bytes>> {
    let bytes = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return status(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    let Ok(body) = Body::parse(&String::from_utf8_lossy(&bytes)) else {
        return status(StatusCode::BAD_REQUEST, "not a wrapper body");
    };

    state.record(body.clone());

    let (tx, rx) = oneshot::channel();
    if is_poll(&body) {
        state
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        return match tokio::time::timeout(POLL_HOLD, rx).await {
            Ok(Ok(reply)) => render(reply),
            _ => render(Reply::Body(Body::default())),
        };
    }

    state.release_held();
    if exchanges
        .send(StubExchange {
            body,
            responder: tx,
        })
        .await
        .is_err()
    {
        return status(StatusCode::SERVICE_UNAVAILABLE, "stub stopped");
    }

    match rx.await {
        Ok(reply) => render(reply),
        Err(_) => status(StatusCode::INTERNAL_SERVER_ERROR, "no reply"),
    }
}

fn render(reply: Reply) -> Response<Full<Bytes>> {
    match reply {
        Reply::Body(body) => Response::builder()
            .header(hyper::header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .body(Full::new(Bytes::from(body.to_xml())))
            .expect("response"),
        Reply::Status(code) => {
            let code = StatusCode::from_u16(code).expect("status code");
            status(code, "")
        }
    }
}

fn status(code: StatusCode, message: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(code)
        .body(Full::new(Bytes::from(message.to_owned())))
        .expect("response")
}
