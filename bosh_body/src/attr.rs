//! Wrapper element attribute names.

/// Session identifier, assigned by the connection manager.
pub const SID: &str = "sid";

/// Request identifier, present on every client request.
pub const RID: &str = "rid";

/// Request/response type (`terminate`, `error`).
pub const TYPE: &str = "type";

/// Terminal binding condition token.
pub const CONDITION: &str = "condition";

/// Longest time (seconds) the connection manager may wait before responding.
pub const WAIT: &str = "wait";

/// Maximum number of requests the connection manager may keep waiting.
pub const HOLD: &str = "hold";

/// Shortest allowable polling interval (seconds).
pub const POLLING: &str = "polling";

/// Longest allowable inactivity period (seconds).
pub const INACTIVITY: &str = "inactivity";

/// Longest allowable pause (seconds).
pub const MAXPAUSE: &str = "maxpause";

/// Limit on simultaneous requests the client may make.
pub const REQUESTS: &str = "requests";

/// Protocol version.
pub const VER: &str = "ver";

/// Target domain of the first stream.
pub const TO: &str = "to";

/// Identity of the client.
pub const FROM: &str = "from";

/// Host and port the connection manager should connect to.
pub const ROUTE: &str = "route";

/// Default language of human-readable content.
pub const XML_LANG: &str = "xml:lang";

/// Acknowledgement of the highest received response.
pub const ACK: &str = "ack";

/// Content encodings the client accepts.
pub const ACCEPT: &str = "accept";

/// Character sets the connection manager accepts.
pub const CHARSETS: &str = "charsets";

/// `Content-Type` the connection manager will use.
pub const CONTENT: &str = "content";

/// Value of [`TYPE`] signalling the end of the session.
pub const TYPE_TERMINATE: &str = "terminate";

/// Value of [`TYPE`] signalling a recoverable binding error.
pub const TYPE_ERROR: &str = "error";
