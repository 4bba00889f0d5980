//! XML decoding of the wrapper element.

use quick_xml::{Reader, events::Event};

use crate::{BODY_ELEMENT, Body, error::ParseError};

const XMLNS_PREFIX: &str = "xmlns:";

pub(crate) fn parse_body(xml: &str) -> Result<Body, ParseError> {
    let mut reader = Reader::from_str(xml);

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(start) => {
                let builder = read_attributes(&start)?;
                let end = start.to_end().into_owned();
                let span = reader.read_to_end(end.name()).map_err(xml_error)?;

                let from = usize::try_from(span.start).map_err(|_| ParseError::MissingRoot)?;
                let to = usize::try_from(span.end).map_err(|_| ParseError::MissingRoot)?;
                let payload = xml.get(from..to).ok_or(ParseError::MissingRoot)?;

                return Ok(builder.payload_xml(payload).build());
            }
            Event::Empty(start) => return Ok(read_attributes(&start)?.build()),
            Event::Eof => return Err(ParseError::MissingRoot),
            Event::End(_) => return Err(ParseError::Xml("unexpected closing tag".into())),
            _ => {}
        }
    }
}

fn read_attributes(
    start: &quick_xml::events::BytesStart<'_>,
) -> Result<crate::BodyBuilder, ParseError> {
    let local = start.local_name();
    let local = core::str::from_utf8(local.as_ref()).map_err(|_| ParseError::InvalidUtf8)?;
    if local != BODY_ELEMENT {
        return Err(ParseError::UnexpectedRoot(local.to_owned()));
    }

    let mut builder = Body::builder();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(xml_error)?;
        let name =
            core::str::from_utf8(attribute.key.as_ref()).map_err(|_| ParseError::InvalidUtf8)?;
        let value = attribute.unescape_value().map_err(xml_error)?;

        if name == "xmlns" {
            continue;
        }

        builder = match name.strip_prefix(XMLNS_PREFIX) {
            Some(prefix) => builder.namespace(prefix, value.as_ref()),
            None => builder.attribute(name, value.as_ref()),
        };
    }

    Ok(builder)
}

#[allow(clippy::needless_pass_by_value)]
fn xml_error<E: core::fmt::Display>(err: E) -> ParseError {
    ParseError::Xml(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr;
    use testresult::TestResult;

    #[test]
    fn parses_self_closing_body() -> TestResult {
        let body = Body::parse(
            "<body xmlns='http://jabber.org/protocol/httpbind' sid='SomeSID' wait='60'/>",
        )?;
        assert_eq!(body.attribute(attr::SID), Some("SomeSID"));
        assert_eq!(body.attribute(attr::WAIT), Some("60"));
        assert!(body.is_empty());
        Ok(())
    }

    #[test]
    fn keeps_payload_verbatim() -> TestResult {
        let body = Body::parse(
            "<?xml version='1.0'?>\n<body xmlns='http://jabber.org/protocol/httpbind' \
             xmlns:foo='http://foo/' rid='10'><foo:bar a='1'>x &amp; y</foo:bar><foo:baz/></body>",
        )?;
        assert_eq!(
            body.payload_xml(),
            "<foo:bar a='1'>x &amp; y</foo:bar><foo:baz/>"
        );
        assert_eq!(
            body.namespaces().collect::<Vec<_>>(),
            vec![("foo", "http://foo/")]
        );
        assert_eq!(body.attribute(attr::RID), Some("10"));
        Ok(())
    }

    #[test]
    fn keeps_surrounding_whitespace() -> TestResult {
        let body = Body::parse("<body>  <a/>\n</body>")?;
        assert_eq!(body.payload_xml(), "  <a/>\n");
        Ok(())
    }

    #[test]
    fn unescapes_attribute_values() -> TestResult {
        let body = Body::parse("<body from='a&amp;b'/>")?;
        assert_eq!(body.attribute(attr::FROM), Some("a&b"));
        Ok(())
    }

    #[test]
    fn keeps_prefixed_attributes() -> TestResult {
        let body = Body::parse("<body xml:lang='en' xmpp:version='1.0'/>")?;
        assert_eq!(body.attribute(attr::XML_LANG), Some("en"));
        assert_eq!(body.attribute("xmpp:version"), Some("1.0"));
        Ok(())
    }

    #[test]
    fn rejects_foreign_root() {
        assert_eq!(
            Body::parse("<html/>"),
            Err(ParseError::UnexpectedRoot("html".into()))
        );
    }

    #[test]
    fn rejects_empty_input() {
        assert_eq!(Body::parse("   "), Err(ParseError::MissingRoot));
    }

    #[test]
    fn rejects_unterminated_body() {
        assert!(matches!(
            Body::parse("<body><foo>"),
            Err(ParseError::Xml(_))
        ));
    }

    #[test]
    fn encoded_body_decodes_to_same_value() -> TestResult {
        let body = Body::builder()
            .attribute(attr::RID, "5")
            .attribute(attr::FROM, "o'neil")
            .namespace("foo", "http://foo/")
            .payload_xml("<foo:bar>1</foo:bar>")
            .build();
        assert_eq!(Body::parse(&body.to_xml())?, body);
        Ok(())
    }
}
