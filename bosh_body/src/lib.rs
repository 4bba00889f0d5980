//! # BOSH Body
//!
//! The `<body/>` wrapper element exchanged with a BOSH connection manager.
//!
//! Every HTTP request and response in a BOSH session carries exactly one
//! wrapper element: a handful of session-control attributes (`sid`, `rid`,
//! `type`, negotiation parameters) plus zero or more payload fragments of the
//! carried application protocol.
//!
//! ```text
//! <body xmlns='http://jabber.org/protocol/httpbind'
//!       rid='1573741820' sid='SomeSID'
//!       xmlns:foo='http://foo/'>
//!   <foo:bar>0</foo:bar>          ◄── payload XML, kept verbatim
//! </body>
//! ```
//!
//! [`Body`] is immutable; use [`BodyBuilder`] (or [`Body::rebuild`]) to
//! derive new values.

pub mod attr;
pub mod body;
pub mod error;
mod parse;

pub use body::{Body, BodyBuilder};
pub use error::ParseError;

/// Namespace of the BOSH wrapper element.
pub const BOSH_NAMESPACE: &str = "http://jabber.org/protocol/httpbind";

/// Local name of the BOSH wrapper element.
pub const BODY_ELEMENT: &str = "body";
