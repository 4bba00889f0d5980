//! Inactivity watchdog.
//!
//! The CM drops a session that stays silent longer than the negotiated
//! `inactivity` period. The watchdog ends the session locally at the same
//! point instead of waiting for the next exchange to fail. While an
//! exchange is outstanding the deadline is pushed out by `wait`, since the
//! CM may hold a request that long without either side being at fault.

use core::time::Duration;
use std::sync::Arc;

use tokio::time::Instant;

use super::{Inner, Shared};
use crate::error::BoshError;

/// Start watching `inner` for inactivity. Exits on session end.
pub(super) fn spawn(inner: &Arc<Inner>, inactivity: Duration, wait: Duration) {
    let session = Arc::downgrade(inner);
    let cancel = inner.cancel.clone();

    inner.runtime.spawn(async move {
        loop {
            let due = {
                let Some(inner) = session.upgrade() else {
                    return;
                };
                let shared = inner.lock();
                if shared.state.is_terminal() {
                    return;
                }
                deadline(&inner, &shared, inactivity, wait)
            };

            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep_until(due) => {}
            }

            let Some(inner) = session.upgrade() else {
                return;
            };
            let mut shared = inner.lock();
            if shared.state.is_terminal() {
                return;
            }
            if Instant::now() >= deadline(&inner, &shared, inactivity, wait) {
                tracing::warn!(sid = ?shared.sid, ?inactivity, "inactivity period elapsed");
                inner.fail(&mut shared, BoshError::InactivityTimeout(inactivity));
                drop(shared);
                inner.settle();
                return;
            }
        }
    });
}

fn deadline(inner: &Inner, shared: &Shared, inactivity: Duration, wait: Duration) -> Instant {
    let base = shared.last_activity + inactivity;
    if inner.pool.open() > 0 { base + wait } else { base }
}
