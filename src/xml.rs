//! Minimal XML element tree built on quick-xml events.
//!
//! The response interpreter hands the config fetcher a root node to
//! walk, so responses are materialized into a small owned tree rather
//! than deserialized into fixed structs.

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::trace;

/// An owned XML element: name, attributes, child elements, and the
/// concatenated character data directly inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Element>,
    text: String,
}

impl Element {
    fn new(name: String, attrs: Vec<(String, String)>) -> Self {
        Self {
            name,
            attrs,
            children: Vec::new(),
            text: String::new(),
        }
    }

    /// Attribute value by exact name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Text content with surrounding whitespace trimmed.
    pub fn text(&self) -> &str {
        self.text.trim()
    }

    /// First child element with the given name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Trimmed text of the first child with the given name.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text())
    }
}

/// Strict parse of `body` into an element tree. Returns `None` for
/// anything that is not a well-formed XML document with a single root;
/// the caller then tries the pseudo-JavaScript grammar instead.
pub fn parse(body: &str) -> Option<Element> {
    let mut reader = Reader::from_str(body);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                trace!("Not parseable as XML: {}", e);
                return None;
            }
        };
        match event {
            Event::Start(start) => {
                if root.is_some() {
                    // Trailing second root element
                    return None;
                }
                stack.push(Element::new(
                    String::from_utf8_lossy(start.name().as_ref()).into_owned(),
                    read_attrs(&start)?,
                ));
            }
            Event::Empty(start) => {
                if root.is_some() {
                    return None;
                }
                let element = Element::new(
                    String::from_utf8_lossy(start.name().as_ref()).into_owned(),
                    read_attrs(&start)?,
                );
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Event::End(_) => {
                let element = stack.pop()?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Event::Text(text) => {
                let text = text.unescape().ok()?;
                match stack.last_mut() {
                    Some(element) => element.text.push_str(&text),
                    // Non-whitespace character data outside any
                    // element means this is not an XML document.
                    None if !text.trim().is_empty() => return None,
                    None => {}
                }
            }
            Event::CData(cdata) => {
                let text = String::from_utf8_lossy(&cdata.into_inner()).into_owned();
                match stack.last_mut() {
                    Some(element) => element.text.push_str(&text),
                    None if !text.trim().is_empty() => return None,
                    None => {}
                }
            }
            Event::Decl(_) | Event::PI(_) | Event::DocType(_) | Event::Comment(_) => {}
            Event::Eof => break,
        }
    }

    if !stack.is_empty() {
        return None;
    }
    root
}

fn read_attrs(start: &quick_xml::events::BytesStart<'_>) -> Option<Vec<(String, String)>> {
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.ok()?;
        attrs.push((
            String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
            attr.unescape_value().ok()?.into_owned(),
        ));
    }
    Some(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_document() {
        let root = parse("<response><ip-address>10.0.1.5</ip-address></response>").unwrap();
        assert_eq!(root.name, "response");
        assert_eq!(root.child_text("ip-address"), Some("10.0.1.5"));
    }

    #[test]
    fn test_parse_attributes() {
        let root = parse(r#"<response status="error"><error>nope</error></response>"#).unwrap();
        assert_eq!(root.attr("status"), Some("error"));
        assert_eq!(root.child_text("error"), Some("nope"));
    }

    #[test]
    fn test_parse_nested_members() {
        let root = parse(
            "<response><dns><member>1.1.1.1</member><member>8.8.8.8</member></dns></response>",
        )
        .unwrap();
        let dns = root.child("dns").unwrap();
        assert_eq!(dns.children.len(), 2);
        assert_eq!(dns.children[0].text(), "1.1.1.1");
    }

    #[test]
    fn test_parse_with_declaration_and_whitespace() {
        let root = parse("<?xml version=\"1.0\"?>\n<response>\n  <mtu>0</mtu>\n</response>\n")
            .unwrap();
        assert_eq!(root.child_text("mtu"), Some("0"));
    }

    #[test]
    fn test_self_closing_element() {
        let root = parse("<response><ipsec/></response>").unwrap();
        assert!(root.child("ipsec").is_some());
    }

    #[test]
    fn test_rejects_javascript_body() {
        assert!(parse("var respStatus = \"Error\";\n").is_none());
    }

    #[test]
    fn test_rejects_unbalanced_document() {
        assert!(parse("<response><dns></response>").is_none());
        assert!(parse("<response>").is_none());
    }

    #[test]
    fn test_rejects_empty_body() {
        assert!(parse("").is_none());
        assert!(parse("   \n").is_none());
    }
}
