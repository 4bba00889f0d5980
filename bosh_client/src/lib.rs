//! # BOSH Client
//!
//! Client session engine for BOSH (XEP-0124) bidirectional streams over HTTP.
//!
//! A single logical duplex session is carried over a rotating pool of
//! short-lived HTTP exchanges with a connection manager (CM):
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                          BoshClient                            │
//! │                                                                │
//! │  send(body) ──► RequestSequencer ──► ConnectionPool ──► CM     │
//! │                 (rid, FIFO batch)    (hold + 1 slots)          │
//! │                                                                │
//! │  listeners ◄── EventNotifier ◄── Resequencer ◄── responses     │
//! │                                  (rid order)                   │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`BoshClient::send`] never blocks on the network: payloads are queued
//! under a single ordering lock and shipped by background tasks. Callers
//! that need a happens-before barrier use [`BoshClient::drain`].

pub mod backoff;
pub mod condition;
pub mod config;
pub mod connector;
pub mod error;
pub mod events;
pub mod params;
pub mod pool;
pub mod resequencer;
pub mod sequencer;
pub mod session;
pub mod transport;

pub use bosh_body::{Body, BodyBuilder, attr};
pub use condition::TerminalCondition;
pub use config::{BoshConfig, ResponseOrder};
pub use connector::{BoxedStream, Connector, RustlsConnector};
pub use error::{BoshError, TransportError};
pub use events::{ConnectionEvent, ConnectionListener, ListenerId, RequestListener, ResponseListener};
pub use session::{BoshClient, DisconnectReason, SessionState};

/// Protocol version advertised in the session creation request.
pub const PROTOCOL_VERSION: &str = "1.8";

/// Default longest time (seconds) the CM may hold a request.
pub const DEFAULT_WAIT_SECS: u64 = 60;

/// Default number of requests the CM may hold.
pub const DEFAULT_HOLD: u32 = 1;

/// Default number of consecutive failed exchanges tolerated before the
/// session is abandoned.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before an idle session sends an empty long-poll request.
pub const DEFAULT_POLL_DELAY_MILLIS: u64 = 100;

/// Slack added to `wait` when deriving the per-exchange timeout.
pub const DEFAULT_TIMEOUT_MARGIN_SECS: u64 = 10;

/// Default language attribute for the session creation request.
pub const DEFAULT_LANG: &str = "en";
