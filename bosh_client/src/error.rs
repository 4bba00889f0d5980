//! Error types for the BOSH session engine.
//!
//! Errors fall into four families:
//!
//! | Family      | Variants                                        | Surfaced as                      |
//! |-------------|-------------------------------------------------|----------------------------------|
//! | Usage       | `SessionClosed`, `InvalidConfig`, `NoRuntime`   | `Err` on the offending call      |
//! | Transport   | [`TransportError`]                              | retried; `RetriesExhausted` last |
//! | Protocol    | `MalformedResponse`, `Protocol`, `InactivityTimeout` | disconnected event cause    |
//! | Terminal    | `Terminal`, `TerminatedByServer`                | disconnected event cause         |

use core::time::Duration;
use std::io;

use bosh_body::ParseError;
use thiserror::Error;

use crate::condition::TerminalCondition;

/// Problem with a single HTTP exchange. Always eligible for retry.
#[derive(Debug, Error)]
pub enum TransportError {
    /// TCP connection could not be established.
    #[error("connection failed: {0}")]
    Connect(#[source] io::Error),

    /// The secure channel could not be attached.
    #[error("secure channel failed: {0}")]
    Tls(#[source] io::Error),

    /// HTTP protocol failure (reset, closed, malformed framing).
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// The request could not be assembled.
    #[error("invalid request: {0}")]
    Request(String),

    /// No response within the per-exchange timeout.
    #[error("exchange timed out after {0:?}")]
    Timeout(Duration),

    /// The CM answered with an unexpected HTTP status.
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// The CM reported a recoverable binding error (`type='error'`).
    #[error("connection manager reported a recoverable binding error")]
    RecoverableBinding,
}

/// Errors produced by the BOSH session engine.
#[derive(Debug, Error)]
pub enum BoshError {
    /// The session has been closed or is being disconnected.
    #[error("Cannot send message when session is closed")]
    SessionClosed,

    /// The configuration cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The engine was created outside a tokio runtime.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),

    /// The CM sent a body that could not be decoded.
    #[error("malformed response: {0}")]
    MalformedResponse(#[from] ParseError),

    /// The CM sent a well-formed body that violates the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The CM terminated the session with a binding condition.
    #[error("Terminal binding condition encountered: {condition} ({})", .condition.message())]
    Terminal {
        /// Reported condition.
        condition: TerminalCondition,
    },

    /// The CM terminated the session without giving a condition.
    #[error("session terminated by the connection manager")]
    TerminatedByServer,

    /// Nothing was sent or received within the negotiated inactivity period.
    #[error("no activity within the negotiated inactivity period of {0:?}")]
    InactivityTimeout(Duration),

    /// Too many consecutive exchanges failed.
    #[error("giving up after {attempts} failed exchanges: {last}")]
    RetriesExhausted {
        /// Consecutive failures observed.
        attempts: u32,

        /// The final failure.
        #[source]
        last: TransportError,
    },
}

impl BoshError {
    /// Whether this error reports caller misuse rather than session failure.
    #[must_use]
    pub const fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::SessionClosed | Self::InvalidConfig(_) | Self::NoRuntime(_)
        )
    }
}
