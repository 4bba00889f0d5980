//! Error types for wire body decoding.

use thiserror::Error;

/// Problem while decoding a `<body/>` wrapper element.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The input is not well-formed XML.
    #[error("malformed XML: {0}")]
    Xml(String),

    /// The input contains no root element.
    #[error("missing root element")]
    MissingRoot,

    /// The root element is not a BOSH wrapper.
    #[error("unexpected root element <{0}>")]
    UnexpectedRoot(String),

    /// An attribute name or value is not valid UTF-8.
    #[error("attribute is not valid UTF-8")]
    InvalidUtf8,

    /// The document bytes are not valid UTF-8.
    #[error("document is not valid UTF-8")]
    InvalidEncoding,
}
