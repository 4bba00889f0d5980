//! Bounded pool of in-flight exchanges.
//!
//! The CM limits how many requests a client may have outstanding. The pool
//! hands out at most `limit` [`Slot`]s; each dispatched exchange holds one
//! until it completes. Slots are RAII guards, so a slot can never leak even
//! if the exchange task is cancelled.
//!
//! Exchanges run as tasks on the session's runtime and report back through
//! a completion callback. The callback is invoked *after* the slot has been
//! released, so the callee can immediately dispatch again.

use core::time::Duration;
use std::sync::{Arc, Mutex, PoisonError};

use bosh_body::{Body, ParseError};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::{
    condition::TerminalCondition,
    error::{BoshError, TransportError},
    transport::{HttpResponse, Transport},
};

/// Result of one exchange, as seen by the session.
#[derive(Debug)]
pub enum ExchangeOutcome {
    /// The CM answered with a wrapper body.
    Response(Body),

    /// The exchange failed in a way that may succeed on retry.
    TransportFailed(TransportError),

    /// The exchange failed in a way that ends the session.
    Fatal(BoshError),
}

#[derive(Debug)]
struct SlotCounter {
    open: usize,
    limit: usize,
}

/// Permission to run one exchange. Released on drop.
#[derive(Debug)]
pub struct Slot {
    counter: Arc<Mutex<SlotCounter>>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        let mut counter = self.counter.lock().unwrap_or_else(PoisonError::into_inner);
        counter.open = counter.open.saturating_sub(1);
    }
}

/// Slot accounting plus exchange dispatch.
#[derive(Debug)]
pub struct ConnectionPool {
    counter: Arc<Mutex<SlotCounter>>,
    transport: Arc<dyn Transport>,
    runtime: Handle,
    cancel: CancellationToken,
}

impl ConnectionPool {
    /// Pool that allows `limit` concurrent exchanges.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        runtime: Handle,
        cancel: CancellationToken,
        limit: usize,
    ) -> Self {
        Self {
            counter: Arc::new(Mutex::new(SlotCounter { open: 0, limit })),
            transport,
            runtime,
            cancel,
        }
    }

    /// Take a slot if one is free. Never blocks.
    #[must_use]
    pub fn try_acquire(&self) -> Option<Slot> {
        let mut counter = self.lock();
        if counter.open >= counter.limit {
            return None;
        }
        counter.open += 1;
        Some(Slot {
            counter: Arc::clone(&self.counter),
        })
    }

    /// Change the number of concurrent exchanges allowed.
    ///
    /// Lowering the limit does not interrupt exchanges already running.
    pub fn set_limit(&self, limit: usize) {
        self.lock().limit = limit;
    }

    /// Current limit.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.lock().limit
    }

    /// Exchanges currently in flight.
    #[must_use]
    pub fn open(&self) -> usize {
        self.lock().open
    }

    /// Cancel every in-flight exchange and refuse new slots.
    ///
    /// Cancelled exchanges do not invoke their completion callback.
    pub fn close(&self) {
        self.set_limit(0);
        self.cancel.cancel();
    }

    /// Run one exchange in the background.
    ///
    /// `on_complete` receives `rid` and the classified outcome after `slot`
    /// has been released, unless the pool was closed first.
    pub fn dispatch<F>(&self, slot: Slot, rid: u64, xml: String, timeout: Duration, on_complete: F)
    where
        F: FnOnce(u64, ExchangeOutcome) + Send + 'static,
    {
        let transport = Arc::clone(&self.transport);
        let cancel = self.cancel.clone();

        tracing::debug!(rid, bytes = xml.len(), "dispatching exchange");

        self.runtime.spawn(async move {
            let outcome = tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!(rid, "exchange cancelled");
                    drop(slot);
                    return;
                }
                result = tokio::time::timeout(timeout, transport.exchange(xml)) => match result {
                    Ok(Ok(response)) => classify(response),
                    Ok(Err(e)) => ExchangeOutcome::TransportFailed(e),
                    Err(_) => ExchangeOutcome::TransportFailed(TransportError::Timeout(timeout)),
                },
            };

            drop(slot);
            on_complete(rid, outcome);
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotCounter> {
        self.counter.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sort an HTTP response into the outcome families the session acts on.
#[must_use]
pub fn classify(response: HttpResponse) -> ExchangeOutcome {
    if response.status != 200 {
        tracing::debug!(status = response.status, "non-200 response");
        return match TerminalCondition::from_http_status(response.status) {
            Some(condition) => ExchangeOutcome::Fatal(BoshError::Terminal { condition }),
            None => ExchangeOutcome::TransportFailed(TransportError::Status(response.status)),
        };
    }

    let parsed = String::from_utf8(response.body)
        .map_err(|_| ParseError::InvalidEncoding)
        .and_then(|text| Body::parse(&text));

    match parsed {
        Ok(body) => ExchangeOutcome::Response(body),
        Err(e) => ExchangeOutcome::Fatal(BoshError::MalformedResponse(e)),
    }
}
