//! Listener registration and asynchronous event delivery.
//!
//! The session never calls listener code itself. Notices are queued on an
//! unbounded channel (cheap and non-blocking, so the session may queue
//! while holding its ordering lock) and a dedicated task delivers them in
//! queue order. A panicking listener is logged and skipped; later listeners
//! still see the notice.

use core::fmt;
use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use bosh_body::Body;
use tokio::{runtime::Handle, sync::oneshot};

use crate::error::BoshError;

/// Change in session connectivity.
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    connected: bool,
    error: bool,
    cause: Option<Arc<BoshError>>,
}

impl ConnectionEvent {
    /// The session was established.
    #[must_use]
    pub const fn established() -> Self {
        Self {
            connected: true,
            error: false,
            cause: None,
        }
    }

    /// The session ended cleanly.
    #[must_use]
    pub const fn closed() -> Self {
        Self {
            connected: false,
            error: false,
            cause: None,
        }
    }

    /// The session ended because of `cause`.
    #[must_use]
    pub fn failed(cause: Arc<BoshError>) -> Self {
        Self {
            connected: false,
            error: true,
            cause: Some(cause),
        }
    }

    /// Whether the session is now connected.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether the session ended because of an error.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error
    }

    /// Why the session ended, for error events.
    #[must_use]
    pub fn cause(&self) -> Option<&BoshError> {
        self.cause.as_deref()
    }
}

/// Observes session connectivity.
pub trait ConnectionListener: Send + Sync {
    /// Called once when the session is established and once when it ends.
    fn connection_event(&self, event: &ConnectionEvent);
}

impl<F: Fn(&ConnectionEvent) + Send + Sync> ConnectionListener for F {
    fn connection_event(&self, event: &ConnectionEvent) {
        self(event);
    }
}

/// Observes every wrapper body the session dispatches.
pub trait RequestListener: Send + Sync {
    /// Called with each request body, in dispatch order.
    fn request_sent(&self, body: &Body);
}

impl<F: Fn(&Body) + Send + Sync> RequestListener for F {
    fn request_sent(&self, body: &Body) {
        self(body);
    }
}

/// Observes every wrapper body the CM sends back.
pub trait ResponseListener: Send + Sync {
    /// Called with each processed response body.
    fn response_received(&self, body: &Body);
}

impl<F: Fn(&Body) + Send + Sync> ResponseListener for F {
    fn response_received(&self, body: &Body) {
        self(body);
    }
}

/// Handle returned when a listener is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Registry {
    connection: Vec<(ListenerId, Arc<dyn ConnectionListener>)>,
    request: Vec<(ListenerId, Arc<dyn RequestListener>)>,
    response: Vec<(ListenerId, Arc<dyn ResponseListener>)>,
}

enum Notice {
    Connection(ConnectionEvent),
    Request(Body),
    Response(Body),
    Flush(oneshot::Sender<()>),
}

/// Listener registry plus the delivery queue.
pub struct EventNotifier {
    registry: Arc<Mutex<Registry>>,
    queue: async_channel::Sender<Notice>,
    next_id: AtomicU64,
}

impl EventNotifier {
    /// Start the delivery task on `runtime`.
    ///
    /// The task exits once the notifier is dropped and the queue is empty.
    #[must_use]
    pub fn spawn(runtime: &Handle) -> Self {
        let registry = Arc::new(Mutex::new(Registry::default()));
        let (queue, rx) = async_channel::unbounded();

        let worker_registry = Arc::clone(&registry);
        runtime.spawn(async move {
            while let Ok(notice) = rx.recv().await {
                deliver(&worker_registry, notice);
            }
            tracing::trace!("event notifier stopped");
        });

        Self {
            registry,
            queue,
            next_id: AtomicU64::new(0),
        }
    }

    fn allocate_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a connection listener.
    pub fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) -> ListenerId {
        let id = self.allocate_id();
        self.registry().connection.push((id, listener));
        id
    }

    /// Register a request listener.
    pub fn add_request_listener(&self, listener: Arc<dyn RequestListener>) -> ListenerId {
        let id = self.allocate_id();
        self.registry().request.push((id, listener));
        id
    }

    /// Register a response listener.
    pub fn add_response_listener(&self, listener: Arc<dyn ResponseListener>) -> ListenerId {
        let id = self.allocate_id();
        self.registry().response.push((id, listener));
        id
    }

    /// Unregister a connection listener. Returns whether it was registered.
    pub fn remove_connection_listener(&self, id: ListenerId) -> bool {
        remove(&mut self.registry().connection, id)
    }

    /// Unregister a request listener. Returns whether it was registered.
    pub fn remove_request_listener(&self, id: ListenerId) -> bool {
        remove(&mut self.registry().request, id)
    }

    /// Unregister a response listener. Returns whether it was registered.
    pub fn remove_response_listener(&self, id: ListenerId) -> bool {
        remove(&mut self.registry().response, id)
    }

    /// Queue a connection event.
    pub fn connection(&self, event: ConnectionEvent) {
        self.push(Notice::Connection(event));
    }

    /// Queue a dispatched request body.
    pub fn request(&self, body: Body) {
        self.push(Notice::Request(body));
    }

    /// Queue a received response body.
    pub fn response(&self, body: Body) {
        self.push(Notice::Response(body));
    }

    /// Wait until everything queued before this call has been delivered.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.push(Notice::Flush(tx));
        let _ = rx.await;
    }

    fn push(&self, notice: Notice) {
        if self.queue.try_send(notice).is_err() {
            tracing::warn!("event notifier is gone; dropping notice");
        }
    }
}

impl fmt::Debug for EventNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventNotifier")
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

fn remove<T: ?Sized>(list: &mut Vec<(ListenerId, Arc<T>)>, id: ListenerId) -> bool {
    let before = list.len();
    list.retain(|(registered, _)| *registered != id);
    list.len() != before
}

/// Deliver one notice outside every lock.
fn deliver(registry: &Mutex<Registry>, notice: Notice) {
    let lock = move || registry.lock().unwrap_or_else(PoisonError::into_inner);

    match notice {
        Notice::Connection(event) => {
            let listeners: Vec<_> = lock().connection.iter().map(|(_, l)| Arc::clone(l)).collect();
            for listener in listeners {
                guarded(|| listener.connection_event(&event));
            }
        }
        Notice::Request(body) => {
            let listeners: Vec<_> = lock().request.iter().map(|(_, l)| Arc::clone(l)).collect();
            for listener in listeners {
                guarded(|| listener.request_sent(&body));
            }
        }
        Notice::Response(body) => {
            let listeners: Vec<_> = lock().response.iter().map(|(_, l)| Arc::clone(l)).collect();
            for listener in listeners {
                guarded(|| listener.response_received(&body));
            }
        }
        Notice::Flush(done) => {
            let _ = done.send(());
        }
    }
}

fn guarded(call: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(call)).is_err() {
        tracing::error!("listener panicked; continuing with remaining listeners");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testresult::TestResult;

    #[tokio::test]
    async fn delivers_in_registration_order() {
        let notifier = EventNotifier::spawn(&Handle::current());
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            notifier.add_connection_listener(Arc::new(move |e: &ConnectionEvent| {
                seen.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((tag, e.is_connected()));
            }));
        }

        notifier.connection(ConnectionEvent::established());
        notifier.connection(ConnectionEvent::closed());
        notifier.flush().await;

        let seen = seen.lock().unwrap_or_else(PoisonError::into_inner).clone();
        assert_eq!(
            seen,
            vec![
                ("first", true),
                ("second", true),
                ("first", false),
                ("second", false)
            ]
        );
    }

    struct Panicking;

    impl ResponseListener for Panicking {
        fn response_received(&self, _body: &Body) {
            panic!("listener failure");
        }
    }

    #[tokio::test]
    async fn panicking_listener_does_not_stop_delivery() {
        let notifier = EventNotifier::spawn(&Handle::current());
        let hits = Arc::new(AtomicU64::new(0));

        notifier.add_response_listener(Arc::new(Panicking));
        let counter = Arc::clone(&hits);
        notifier.add_response_listener(Arc::new(move |_: &Body| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        notifier.response(Body::default());
        notifier.response(Body::default());
        notifier.flush().await;

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn removed_listener_is_not_called() -> TestResult {
        let notifier = EventNotifier::spawn(&Handle::current());
        let hits = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&hits);
        let id = notifier.add_request_listener(Arc::new(move |_: &Body| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        notifier.request(Body::default());
        notifier.flush().await;
        assert!(notifier.remove_request_listener(id));
        assert!(!notifier.remove_request_listener(id));

        notifier.request(Body::default());
        notifier.flush().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn failed_event_carries_cause() {
        let event = ConnectionEvent::failed(Arc::new(BoshError::TerminatedByServer));
        assert!(!event.is_connected());
        assert!(event.is_error());
        assert!(matches!(event.cause(), Some(BoshError::TerminatedByServer)));
    }
}
