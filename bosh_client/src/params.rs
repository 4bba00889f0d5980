//! Session parameters negotiated in the creation response.

use core::time::Duration;

use bosh_body::{Body, attr};

use crate::error::BoshError;

/// Parameters the CM announced when the session was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    /// Session identifier.
    pub sid: String,

    /// Longest time the CM will hold a request.
    pub wait: Duration,

    /// Number of requests the CM may hold at once.
    pub hold: u32,

    /// Maximum simultaneous requests, if the CM limits them explicitly.
    pub requests: Option<u32>,

    /// Shortest allowed interval between polls.
    pub polling: Option<Duration>,

    /// Longest allowed silence from the client.
    pub inactivity: Option<Duration>,

    /// Longest pause the CM would accept.
    pub maxpause: Option<Duration>,

    /// Protocol version the CM speaks.
    pub ver: Option<String>,
}

impl SessionParams {
    /// Read the negotiated parameters from a creation response.
    ///
    /// Values the CM omits fall back to what was requested (`wait`, `hold`).
    ///
    /// # Errors
    ///
    /// Returns [`BoshError::Protocol`] if `sid` is missing or a numeric
    /// attribute is not a non-negative integer.
    pub fn from_creation_response(
        body: &Body,
        requested_wait: Duration,
        requested_hold: u32,
    ) -> Result<Self, BoshError> {
        let sid = body
            .attribute(attr::SID)
            .filter(|sid| !sid.is_empty())
            .ok_or_else(|| BoshError::Protocol("session creation response has no sid".into()))?
            .to_owned();

        let wait = seconds(body, attr::WAIT)?.unwrap_or(requested_wait);
        let hold = number(body, attr::HOLD)?.unwrap_or(requested_hold);

        Ok(Self {
            sid,
            wait,
            hold,
            requests: number(body, attr::REQUESTS)?,
            polling: seconds(body, attr::POLLING)?,
            inactivity: seconds(body, attr::INACTIVITY)?,
            maxpause: seconds(body, attr::MAXPAUSE)?,
            ver: body.attribute(attr::VER).map(str::to_owned),
        })
    }

    /// Simultaneous exchanges the CM tolerates.
    ///
    /// Never more than `hold + 1`, narrowed by `requests` when the CM sent
    /// it, and never below one so the session can always make progress.
    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        let ceiling = self.hold.saturating_add(1);
        let limit = self.requests.map_or(ceiling, |r| r.min(ceiling)).max(1);
        usize::try_from(limit).unwrap_or(usize::MAX)
    }

    /// Delay before an idle session polls.
    ///
    /// With `hold = 0` the CM answers immediately, so polls are spaced by at
    /// least the negotiated `polling` interval.
    #[must_use]
    pub fn poll_delay(&self, configured: Duration) -> Duration {
        match self.polling {
            Some(polling) if self.hold == 0 => configured.max(polling),
            _ => configured,
        }
    }
}

fn number(body: &Body, name: &str) -> Result<Option<u32>, BoshError> {
    body.attribute(name)
        .map(|raw| {
            raw.trim()
                .parse::<u32>()
                .map_err(|_| BoshError::Protocol(format!("invalid {name} attribute: {raw:?}")))
        })
        .transpose()
}

fn seconds(body: &Body, name: &str) -> Result<Option<Duration>, BoshError> {
    Ok(number(body, name)?.map(|s| Duration::from_secs(u64::from(s))))
}
