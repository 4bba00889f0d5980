//! Terminal binding conditions reported by a connection manager.

use core::{fmt, str::FromStr};

use thiserror::Error;

/// Reason a connection manager gives for terminating a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminalCondition {
    /// Unacceptable HTTP header or wrapper element.
    BadRequest,

    /// Target domain or route is no longer serviced.
    HostGone,

    /// Target domain or route is unknown.
    HostUnknown,

    /// Missing `to` or `route` where one is required.
    ImproperAddressing,

    /// The CM failed internally.
    InternalServerError,

    /// Invalid `sid`, `rid` outside the window, or similar.
    ItemNotFound,

    /// A concurrent request caused the session to terminate.
    OtherRequest,

    /// The client broke the session rules.
    PolicyViolation,

    /// The CM lost its connection to the server.
    RemoteConnectionFailed,

    /// Error in the carried protocol.
    RemoteStreamError,

    /// The CM does not operate at this URI.
    SeeOtherUri,

    /// The CM is shutting down.
    SystemShutdown,

    /// Any other condition.
    UndefinedCondition,
}

impl TerminalCondition {
    /// All known conditions.
    pub const ALL: [Self; 13] = [
        Self::BadRequest,
        Self::HostGone,
        Self::HostUnknown,
        Self::ImproperAddressing,
        Self::InternalServerError,
        Self::ItemNotFound,
        Self::OtherRequest,
        Self::PolicyViolation,
        Self::RemoteConnectionFailed,
        Self::RemoteStreamError,
        Self::SeeOtherUri,
        Self::SystemShutdown,
        Self::UndefinedCondition,
    ];

    /// The wire token carried in the `condition` attribute.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::BadRequest => "bad-request",
            Self::HostGone => "host-gone",
            Self::HostUnknown => "host-unknown",
            Self::ImproperAddressing => "improper-addressing",
            Self::InternalServerError => "internal-server-error",
            Self::ItemNotFound => "item-not-found",
            Self::OtherRequest => "other-request",
            Self::PolicyViolation => "policy-violation",
            Self::RemoteConnectionFailed => "remote-connection-failed",
            Self::RemoteStreamError => "remote-stream-error",
            Self::SeeOtherUri => "see-other-uri",
            Self::SystemShutdown => "system-shutdown",
            Self::UndefinedCondition => "undefined-condition",
        }
    }

    /// Human-readable explanation of the condition.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::BadRequest => {
                "The format of an HTTP header or binding element received from the client is \
                 unacceptable (e.g., syntax error)."
            }
            Self::HostGone => {
                "The target domain specified in the 'to' attribute or the target host or port \
                 specified in the 'route' attribute is no longer serviced by the connection \
                 manager."
            }
            Self::HostUnknown => {
                "The target domain specified in the 'to' attribute or the target host or port \
                 specified in the 'route' attribute is unknown to the connection manager."
            }
            Self::ImproperAddressing => {
                "The initialization element lacks a 'to' or 'route' attribute (or the attribute \
                 has no value) but the connection manager requires one."
            }
            Self::InternalServerError => {
                "The connection manager has experienced an internal error that prevents it from \
                 servicing the request."
            }
            Self::ItemNotFound => {
                "(1) 'sid' is not valid, (2) 'stream' is not valid, (3) 'rid' is larger than the \
                 upper limit of the expected window, (4) connection manager is unable to resend \
                 response, (5) 'key' sequence is invalid."
            }
            Self::OtherRequest => {
                "Another request being processed at the same time as this request caused the \
                 session to terminate."
            }
            Self::PolicyViolation => {
                "The client has broken the session rules (polling too frequently, requesting too \
                 frequently, sending too many simultaneous requests)."
            }
            Self::RemoteConnectionFailed => {
                "The connection manager was unable to connect to, or unable to connect securely \
                 to, or has lost its connection to, the server."
            }
            Self::RemoteStreamError => "Encapsulates an error in the protocol being transported.",
            Self::SeeOtherUri => {
                "The connection manager does not operate at this URI (e.g., the connection \
                 manager accepts only SSL or TLS connections at some https: URI rather than the \
                 http: URI requested by the client)."
            }
            Self::SystemShutdown => {
                "The connection manager is being shut down. All active HTTP sessions are being \
                 terminated. No new sessions can be created."
            }
            Self::UndefinedCondition => {
                "The error is not one of those defined herein; the connection manager SHOULD \
                 include application-specific information in the content of the wrapper."
            }
        }
    }

    /// Map a bare HTTP error status to the condition it stands for.
    ///
    /// Older connection managers report some conditions only through the
    /// response status.
    #[must_use]
    pub const fn from_http_status(status: u16) -> Option<Self> {
        match status {
            400 => Some(Self::BadRequest),
            403 => Some(Self::PolicyViolation),
            404 => Some(Self::ItemNotFound),
            _ => None,
        }
    }
}

impl fmt::Display for TerminalCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// The `condition` attribute carried a token outside the known set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown terminal condition: {0}")]
pub struct UnknownCondition(pub String);

impl FromStr for TerminalCondition {
    type Err = UnknownCondition;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.token() == s)
            .ok_or_else(|| UnknownCondition(s.to_owned()))
    }
}
