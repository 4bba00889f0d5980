//! The immutable wrapper element value and its builder.

use std::{collections::BTreeMap, fmt};

use quick_xml::escape::escape;

use crate::{BODY_ELEMENT, BOSH_NAMESPACE, error::ParseError, parse};

/// A BOSH `<body/>` wrapper element.
///
/// Attributes are kept sorted by name so that serialisation is stable.
/// The payload is opaque XML: it is never inspected, only concatenated
/// and carried.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Body {
    attributes: BTreeMap<String, String>,
    namespaces: BTreeMap<String, String>,
    payload: String,
}

impl Body {
    /// Start building an empty body.
    #[must_use]
    pub fn builder() -> BodyBuilder {
        BodyBuilder::default()
    }

    /// Start building a body seeded with this body's contents.
    #[must_use]
    pub fn rebuild(&self) -> BodyBuilder {
        BodyBuilder {
            inner: self.clone(),
        }
    }

    /// Decode a wrapper element from its XML text.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if the text is not well-formed or its root
    /// element is not `<body/>`.
    pub fn parse(xml: &str) -> Result<Self, ParseError> {
        parse::parse_body(xml)
    }

    /// Look up an attribute value.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Iterate over all attributes in name order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Iterate over namespace prefix declarations (`xmlns:prefix='uri'`).
    pub fn namespaces(&self) -> impl Iterator<Item = (&str, &str)> {
        self.namespaces
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The raw payload XML carried inside the wrapper.
    #[must_use]
    pub fn payload_xml(&self) -> &str {
        &self.payload
    }

    /// Whether the body carries no payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Encode as XML text.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut out = String::with_capacity(64 + self.payload.len());
        out.push('<');
        out.push_str(BODY_ELEMENT);
        push_attr(&mut out, "xmlns", BOSH_NAMESPACE);
        for (name, value) in &self.attributes {
            push_attr(&mut out, name, value);
        }
        for (prefix, uri) in &self.namespaces {
            push_attr(&mut out, &format!("xmlns:{prefix}"), uri);
        }

        if self.payload.is_empty() {
            out.push_str("/>");
        } else {
            out.push('>');
            out.push_str(&self.payload);
            out.push_str("</");
            out.push_str(BODY_ELEMENT);
            out.push('>');
        }
        out
    }
}

fn push_attr(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("='");
    out.push_str(&escape(value));
    out.push('\'');
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Body({})", self.to_xml())
    }
}

impl fmt::Display for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_xml())
    }
}

/// Builder for [`Body`].
#[derive(Debug, Clone, Default)]
pub struct BodyBuilder {
    inner: Body,
}

impl BodyBuilder {
    /// Set an attribute, replacing any previous value.
    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.attributes.insert(name.into(), value.into());
        self
    }

    /// Remove an attribute if present.
    #[must_use]
    pub fn remove_attribute(mut self, name: &str) -> Self {
        self.inner.attributes.remove(name);
        self
    }

    /// Declare a namespace prefix used by the payload.
    #[must_use]
    pub fn namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.inner.namespaces.insert(prefix.into(), uri.into());
        self
    }

    /// Replace the payload XML.
    #[must_use]
    pub fn payload_xml(mut self, xml: impl Into<String>) -> Self {
        self.inner.payload = xml.into();
        self
    }

    /// Append to the payload XML.
    #[must_use]
    pub fn append_payload_xml(mut self, xml: &str) -> Self {
        self.inner.payload.push_str(xml);
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> Body {
        self.inner
    }
}
