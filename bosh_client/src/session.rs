//! The BOSH session state machine.
//!
//! [`BoshClient`] is a cheap, cloneable handle. All mutable session state
//! lives behind one ordering lock; every transition, rid assignment and
//! event notice happens while it is held, and it is never held across an
//! `.await` or while listener code runs.
//!
//! ```text
//!  Unstarted ──send──► Connecting ──creation response──► Connected
//!                          │                                 │
//!                          └──────────disconnect─────────────┤
//!                                                            ▼
//!                     Disconnected(Normal|Error) ◄──── Disconnecting
//! ```
//!
//! Any state may jump to `Disconnected` on `close()`, a CM terminate, an
//! unrecoverable error or an exhausted retry budget.

mod watchdog;

use core::time::Duration;
use std::{
    collections::{BTreeMap, BTreeSet},
    pin::pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bosh_body::{Body, attr};
use tokio::{runtime::Handle, sync::Notify, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    PROTOCOL_VERSION,
    backoff::Backoff,
    condition::TerminalCondition,
    config::BoshConfig,
    error::{BoshError, TransportError},
    events::{
        ConnectionEvent, ConnectionListener, EventNotifier, ListenerId, RequestListener,
        ResponseListener,
    },
    params::SessionParams,
    pool::{ConnectionPool, ExchangeOutcome, Slot},
    resequencer::Resequencer,
    sequencer::{RequestSequencer, WireRequest},
    transport::{HttpTransport, Transport, XML_CONTENT_TYPE},
};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// Closed locally or terminated at the client's request.
    Normal,

    /// Ended by an error or an unsolicited CM terminate.
    Error,
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Nothing sent yet.
    Unstarted,

    /// Creation request outstanding.
    Connecting,

    /// Session established.
    Connected,

    /// Terminate requested, acknowledgement pending.
    Disconnecting,

    /// Session over. Terminal.
    Disconnected(DisconnectReason),
}

impl SessionState {
    /// Whether the session has ended.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected(_))
    }
}

/// Handle to a BOSH session.
///
/// Cloning is cheap; all clones drive the same session.
#[derive(Debug, Clone)]
pub struct BoshClient {
    inner: Arc<Inner>,
}

impl BoshClient {
    /// Create an engine for the session described by `config`.
    ///
    /// Must be called from within a tokio runtime; the runtime is captured
    /// and used for all background work.
    ///
    /// # Errors
    ///
    /// * [`BoshError::InvalidConfig`] if the configuration is unusable.
    /// * [`BoshError::NoRuntime`] outside a tokio runtime.
    pub fn new(config: BoshConfig) -> Result<Self, BoshError> {
        config.validate()?;
        let transport = Arc::new(HttpTransport::new(&config)?);
        Self::with_transport(config, transport)
    }

    /// Create an engine that exchanges bodies through `transport`.
    ///
    /// # Errors
    ///
    /// Same as [`BoshClient::new`].
    pub fn with_transport(
        config: BoshConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, BoshError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| BoshError::NoRuntime(e.to_string()))?;

        let cancel = CancellationToken::new();
        let pool = ConnectionPool::new(transport, runtime.clone(), cancel.clone(), 1);
        let notifier = EventNotifier::spawn(&runtime);

        let sequencer = RequestSequencer::new(config.initial_rid());
        let resequencer = Resequencer::new(sequencer.next_rid(), config.response_order());

        let now = Instant::now();
        let shared = Shared {
            state: SessionState::Unstarted,
            sid: None,
            params: None,
            sequencer,
            resequencer,
            in_flight: BTreeMap::new(),
            outstanding: BTreeSet::new(),
            creation_pending: false,
            terminate_sent: false,
            consecutive_failures: 0,
            backoff: config.backoff(),
            retry_pending: false,
            poll_scheduled: false,
            poll_delay: config.poll_delay(),
            exchange_timeout: config.exchange_timeout_for(config.wait()),
            last_exchange: now,
            last_activity: now,
            connected_emitted: false,
            disconnected_emitted: false,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                runtime,
                pool,
                notifier,
                cancel,
                shared: Mutex::new(shared),
                settled: Notify::new(),
            }),
        })
    }

    /// Queue `body` for delivery. Never blocks on the network.
    ///
    /// The first call creates the session. Attributes on `body` are merged
    /// into the wrapper, except `sid`, `rid` and `type`, which the engine
    /// controls.
    ///
    /// # Errors
    ///
    /// Returns [`BoshError::SessionClosed`] once `disconnect` or `close`
    /// has been called, or the session has ended.
    pub fn send(&self, body: Body) -> Result<(), BoshError> {
        let mut shared = self.inner.lock();
        match shared.state {
            SessionState::Disconnecting | SessionState::Disconnected(_) => {
                return Err(BoshError::SessionClosed);
            }
            SessionState::Unstarted => {
                tracing::info!(endpoint = %self.inner.config.endpoint(), "starting session");
                shared.state = SessionState::Connecting;
            }
            SessionState::Connecting | SessionState::Connected => {}
        }

        let ordinal = shared.sequencer.enqueue(body, false);
        shared.outstanding.insert(ordinal);
        self.inner.pump(&mut shared);
        Ok(())
    }

    /// Ask the CM to end the session.
    ///
    /// The terminate request rides on the next dispatched request, after
    /// everything already queued.
    ///
    /// # Errors
    ///
    /// Returns [`BoshError::SessionClosed`] if the session was never started
    /// or is already ending.
    pub fn disconnect(&self) -> Result<(), BoshError> {
        let mut shared = self.inner.lock();
        match shared.state {
            SessionState::Connecting | SessionState::Connected => {}
            SessionState::Unstarted
            | SessionState::Disconnecting
            | SessionState::Disconnected(_) => return Err(BoshError::SessionClosed),
        }

        tracing::info!(sid = ?shared.sid, "disconnecting");
        shared.state = SessionState::Disconnecting;

        if shared.sid.is_none() && !shared.creation_pending {
            // Creation is waiting out a backoff; the CM has no session to end.
            self.inner.finish(&mut shared);
            drop(shared);
            self.inner.settle();
            return Ok(());
        }

        let ordinal = shared.sequencer.enqueue(Body::default(), true);
        shared.outstanding.insert(ordinal);
        self.inner.pump(&mut shared);
        Ok(())
    }

    /// Abort the session locally.
    ///
    /// Cancels in-flight exchanges and timers, discards queued payloads and
    /// moves to `Disconnected(Normal)`. A disconnected event is emitted if
    /// the session had started. Calling it again has no effect.
    pub fn close(&self) {
        let mut shared = self.inner.lock();
        if shared.state.is_terminal() {
            return;
        }

        let started = shared.state != SessionState::Unstarted;
        tracing::info!(sid = ?shared.sid, "closing session");
        shared.state = SessionState::Disconnected(DisconnectReason::Normal);
        self.inner.teardown(&mut shared);

        if started {
            self.inner.emit_disconnected(&mut shared, ConnectionEvent::closed());
        }
        drop(shared);
        self.inner.settle();
    }

    /// Wait until everything sent before this call has been settled.
    ///
    /// Returns once each earlier payload was acknowledged, discarded or
    /// given up on, and every event produced by then has been delivered to
    /// listeners. Payloads sent after the call are not waited for.
    pub async fn drain(&self) {
        let ticket = self.inner.lock().sequencer.last_ordinal();

        loop {
            let mut notified = pin!(self.inner.settled.notified());
            notified.as_mut().enable();

            {
                let shared = self.inner.lock();
                let settled = ticket.is_none_or(|t| shared.outstanding.range(..=t).next().is_none());
                if settled || shared.state.is_terminal() {
                    break;
                }
            }

            notified.await;
        }

        self.inner.notifier.flush().await;
    }

    /// The session id, once the CM has assigned one.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.inner.lock().sid.clone()
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// The parameters negotiated at creation, once known.
    #[must_use]
    pub fn session_params(&self) -> Option<SessionParams> {
        self.inner.lock().params.clone()
    }

    /// The configuration this session was created with.
    #[must_use]
    pub fn config(&self) -> &BoshConfig {
        &self.inner.config
    }

    /// Observe connection events.
    pub fn add_connection_listener(
        &self,
        listener: impl ConnectionListener + 'static,
    ) -> ListenerId {
        self.inner.notifier.add_connection_listener(Arc::new(listener))
    }

    /// Stop observing connection events. Returns whether `id` was registered.
    pub fn remove_connection_listener(&self, id: ListenerId) -> bool {
        self.inner.notifier.remove_connection_listener(id)
    }

    /// Observe every dispatched request body.
    pub fn add_request_listener(&self, listener: impl RequestListener + 'static) -> ListenerId {
        self.inner.notifier.add_request_listener(Arc::new(listener))
    }

    /// Stop observing request bodies.
    pub fn remove_request_listener(&self, id: ListenerId) -> bool {
        self.inner.notifier.remove_request_listener(id)
    }

    /// Observe every response body.
    pub fn add_response_listener(&self, listener: impl ResponseListener + 'static) -> ListenerId {
        self.inner.notifier.add_response_listener(Arc::new(listener))
    }

    /// Stop observing response bodies.
    pub fn remove_response_listener(&self, id: ListenerId) -> bool {
        self.inner.notifier.remove_response_listener(id)
    }
}

#[derive(Debug)]
struct Inner {
    config: BoshConfig,
    runtime: Handle,
    pool: ConnectionPool,
    notifier: EventNotifier,
    cancel: CancellationToken,
    shared: Mutex<Shared>,
    settled: Notify,
}

/// State guarded by the ordering lock.
#[derive(Debug)]
struct Shared {
    state: SessionState,
    sid: Option<String>,
    params: Option<SessionParams>,
    sequencer: RequestSequencer,
    resequencer: Resequencer<(WireRequest, Body)>,
    in_flight: BTreeMap<u64, WireRequest>,
    /// Ordinals not yet acknowledged or discarded.
    outstanding: BTreeSet<u64>,
    creation_pending: bool,
    terminate_sent: bool,
    consecutive_failures: u32,
    backoff: Backoff,
    retry_pending: bool,
    poll_scheduled: bool,
    poll_delay: Duration,
    exchange_timeout: Duration,
    last_exchange: Instant,
    /// Last dispatch or response; drives the inactivity watchdog.
    last_activity: Instant,
    connected_emitted: bool,
    disconnected_emitted: bool,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self) {
        self.settled.notify_waiters();
    }

    /// Dispatch whatever the current state allows.
    fn pump(self: &Arc<Self>, shared: &mut Shared) {
        if shared.state.is_terminal()
            || shared.creation_pending
            || shared.terminate_sent
            || shared.retry_pending
        {
            return;
        }

        if shared.sequencer.has_pending() {
            if let Some(slot) = self.pool.try_acquire() {
                self.dispatch(shared, slot);
            }
            return;
        }

        if shared.state != SessionState::Connected || self.pool.open() > 0 {
            return;
        }

        let idle = shared.last_exchange.elapsed();
        if idle >= shared.poll_delay {
            if let Some(slot) = self.pool.try_acquire() {
                self.dispatch(shared, slot);
            }
        } else {
            let remaining = shared.poll_delay - idle;
            self.schedule_poll(shared, remaining);
        }
    }

    fn dispatch(self: &Arc<Self>, shared: &mut Shared, slot: Slot) {
        let request = shared.sequencer.materialize();
        let rid = request.rid;

        let creating = shared.sid.is_none();
        let defaults = if creating {
            self.creation_attributes()
        } else {
            Vec::new()
        };
        let body = request.to_body(shared.sid.as_deref(), &defaults);

        if creating {
            shared.creation_pending = true;
        }
        if request.is_terminate() {
            shared.terminate_sent = true;
        }

        tracing::debug!(
            rid,
            items = request.items.len(),
            poll = request.is_poll(),
            terminate = request.is_terminate(),
            "sending request"
        );

        let now = Instant::now();
        shared.last_exchange = now;
        shared.last_activity = now;
        shared.in_flight.insert(rid, request);

        let xml = body.to_xml();
        self.notifier.request(body);

        let session = Arc::downgrade(self);
        self.pool
            .dispatch(slot, rid, xml, shared.exchange_timeout, move |rid, outcome| {
                if let Some(inner) = session.upgrade() {
                    inner.complete(rid, outcome);
                }
            });
    }

    fn creation_attributes(&self) -> Vec<(&'static str, String)> {
        let config = &self.config;
        let mut attrs = vec![
            (attr::TO, config.to().to_owned()),
            (attr::XML_LANG, config.lang().to_owned()),
            (attr::VER, PROTOCOL_VERSION.to_owned()),
            (attr::WAIT, config.wait().as_secs().to_string()),
            (attr::HOLD, config.hold().to_string()),
            (attr::CONTENT, XML_CONTENT_TYPE.to_owned()),
        ];
        if let Some(from) = config.from() {
            attrs.push((attr::FROM, from.to_owned()));
        }
        if let Some(route) = config.route() {
            attrs.push((attr::ROUTE, route.to_owned()));
        }
        attrs
    }

    fn schedule_poll(self: &Arc<Self>, shared: &mut Shared, delay: Duration) {
        if shared.poll_scheduled {
            return;
        }
        shared.poll_scheduled = true;

        let session = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        self.runtime.spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if let Some(inner) = session.upgrade() {
                        let mut shared = inner.lock();
                        shared.poll_scheduled = false;
                        inner.pump(&mut shared);
                    }
                }
            }
        });
    }

    fn schedule_retry(self: &Arc<Self>, shared: &mut Shared) {
        let delay = shared.backoff.next_delay();
        shared.retry_pending = true;

        let session = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        self.runtime.spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if let Some(inner) = session.upgrade() {
                        let mut shared = inner.lock();
                        shared.retry_pending = false;
                        inner.pump(&mut shared);
                    }
                }
            }
        });
    }

    /// Completion callback for one exchange.
    fn complete(self: &Arc<Self>, rid: u64, outcome: ExchangeOutcome) {
        let mut shared = self.lock();
        if shared.state.is_terminal() {
            return;
        }
        let Some(request) = shared.in_flight.remove(&rid) else {
            return;
        };

        let now = Instant::now();
        shared.last_exchange = now;
        shared.last_activity = now;

        match outcome {
            ExchangeOutcome::Response(body)
                if body.attribute(attr::TYPE) == Some(attr::TYPE_ERROR) =>
            {
                self.exchange_failed(&mut shared, request, TransportError::RecoverableBinding);
            }
            ExchangeOutcome::Response(body) => {
                tracing::debug!(rid, "received response");
                let ready = shared.resequencer.complete(rid, (request, body));
                self.process_ready(&mut shared, ready);
            }
            ExchangeOutcome::TransportFailed(error) => {
                self.exchange_failed(&mut shared, request, error);
            }
            ExchangeOutcome::Fatal(error) => self.fail(&mut shared, error),
        }

        self.pump(&mut shared);
        drop(shared);
        self.settle();
    }

    fn process_ready(self: &Arc<Self>, shared: &mut Shared, ready: Vec<(u64, (WireRequest, Body))>) {
        for (_, (request, body)) in ready {
            if shared.state.is_terminal() {
                break;
            }
            self.process_response(shared, request, body);
        }
    }

    fn process_response(self: &Arc<Self>, shared: &mut Shared, request: WireRequest, body: Body) {
        for ordinal in request.ordinals() {
            shared.outstanding.remove(&ordinal);
        }
        shared.consecutive_failures = 0;
        shared.backoff.reset();

        if body.attribute(attr::TYPE) == Some(attr::TYPE_TERMINATE) {
            self.notifier.response(body.clone());
            if shared.state == SessionState::Disconnecting {
                self.finish(shared);
            } else {
                self.fail(shared, terminate_cause(&body));
            }
            return;
        }

        if shared.sid.is_none() {
            if let Err(error) = self.establish(shared, &body) {
                self.fail(shared, error);
                return;
            }
        }

        self.notifier.response(body);

        if request.is_terminate() {
            self.finish(shared);
        }
    }

    fn establish(self: &Arc<Self>, shared: &mut Shared, body: &Body) -> Result<(), BoshError> {
        let params =
            SessionParams::from_creation_response(body, self.config.wait(), self.config.hold())?;

        tracing::info!(
            sid = %params.sid,
            wait = params.wait.as_secs(),
            hold = params.hold,
            requests = ?params.requests,
            inactivity = ?params.inactivity,
            "session established"
        );

        self.pool.set_limit(params.max_concurrent());
        shared.poll_delay = params.poll_delay(self.config.poll_delay());
        shared.exchange_timeout = self.config.exchange_timeout_for(params.wait);
        shared.creation_pending = false;
        shared.sid = Some(params.sid.clone());

        if let Some(inactivity) = params.inactivity {
            watchdog::spawn(self, inactivity, params.wait);
        }
        shared.params = Some(params);

        if shared.state == SessionState::Connecting {
            shared.state = SessionState::Connected;
        }
        if !shared.connected_emitted {
            shared.connected_emitted = true;
            self.notifier.connection(ConnectionEvent::established());
        }
        Ok(())
    }

    fn exchange_failed(
        self: &Arc<Self>,
        shared: &mut Shared,
        request: WireRequest,
        error: TransportError,
    ) {
        shared.consecutive_failures = shared.consecutive_failures.saturating_add(1);
        let attempts = shared.consecutive_failures;

        if attempts > self.config.max_retries() {
            tracing::error!(rid = request.rid, attempts, %error, "retry budget exhausted");
            self.fail(shared, BoshError::RetriesExhausted { attempts, last: error });
            return;
        }

        tracing::warn!(rid = request.rid, attempt = attempts, %error, "exchange failed; retrying");

        if shared.sid.is_none() {
            shared.creation_pending = false;
        }
        if request.is_terminate() {
            shared.terminate_sent = false;
        }

        let ready = shared.resequencer.skip(request.rid);
        shared.sequencer.requeue_front(request.items);
        self.process_ready(shared, ready);

        if !shared.state.is_terminal() {
            self.schedule_retry(shared);
        }
    }

    /// End the session cleanly.
    fn finish(&self, shared: &mut Shared) {
        tracing::info!(sid = ?shared.sid, "session ended");
        shared.state = SessionState::Disconnected(DisconnectReason::Normal);
        self.teardown(shared);
        self.emit_disconnected(shared, ConnectionEvent::closed());
    }

    /// End the session because of `error`.
    fn fail(&self, shared: &mut Shared, error: BoshError) {
        if shared.state.is_terminal() {
            return;
        }
        tracing::error!(sid = ?shared.sid, %error, "session failed");
        shared.state = SessionState::Disconnected(DisconnectReason::Error);
        self.teardown(shared);
        self.emit_disconnected(shared, ConnectionEvent::failed(Arc::new(error)));
    }

    fn teardown(&self, shared: &mut Shared) {
        let discarded = shared.sequencer.discard();
        if !discarded.is_empty() {
            tracing::debug!(count = discarded.len(), "discarding unsent payloads");
        }
        shared.outstanding.clear();
        shared.in_flight.clear();
        shared.resequencer.clear();
        self.pool.close();
    }

    fn emit_disconnected(&self, shared: &mut Shared, event: ConnectionEvent) {
        if shared.disconnected_emitted {
            return;
        }
        shared.disconnected_emitted = true;
        self.notifier.connection(event);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The error a `type='terminate'` response stands for.
fn terminate_cause(body: &Body) -> BoshError {
    match body.attribute(attr::CONDITION) {
        Some(token) => BoshError::Terminal {
            condition: token
                .parse()
                .unwrap_or(TerminalCondition::UndefinedCondition),
        },
        None => BoshError::TerminatedByServer,
    }
}
