use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::BTreeMap;
use std::str;

use crate::dsig::{Error, Result};

/// Byte span of an element within its source document, together with the
/// namespace bindings that are in scope at that element. The span indexes
/// the original text, so slicing it yields the element exactly as it
/// appeared on the wire.
#[derive(Debug)]
pub(crate) struct ElementSpan {
    pub start: usize,
    pub end: usize,
    pub namespaces: BTreeMap<String, String>,
}

impl ElementSpan {
    pub fn slice<'a>(&self, xml: &'a str) -> &'a str {
        &xml[self.start..self.end]
    }
}

/// Locate the first element with the given local name.
pub(crate) fn by_local_name(xml: &str, local: &str) -> Result<ElementSpan> {
    let target = local.as_bytes();
    scan(xml, &mut |e| e.name().local_name().as_ref() == target)?
        .ok_or_else(|| Error::Structural(format!("element '{local}' not found")))
}

/// Locate the element carrying the given id attribute value.
pub(crate) fn by_id(xml: &str, id: &str) -> Result<ElementSpan> {
    scan(xml, &mut |e| {
        e.attributes().with_checks(false).filter_map(|a| a.ok()).any(|attr| {
            let key = attr.key.local_name();
            matches!(key.as_ref(), b"Id" | b"ID")
                && attr.unescape_value().ok().as_deref() == Some(id)
        })
    })?
    .ok_or_else(|| Error::Structural(format!("element with Id='{id}' not found")))
}

/// Collect the character content of the first element with the given local
/// name.
pub(crate) fn text_of(xml: &str, local: &str) -> Result<String> {
    let span = by_local_name(xml, local)?;
    let mut reader = Reader::from_str(span.slice(xml));
    reader.config_mut().trim_text(false);

    let mut content = String::new();
    loop {
        match reader.read_event()? {
            Event::Text(e) => {
                content.push_str(&e.xml_content().map_err(|e| Error::Xml(e.to_string()))?);
            }
            Event::CData(e) => {
                content.push_str(str::from_utf8(&e.into_inner())?);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(content)
}

/// Scan for the first element matching `predicate`, returning its exact byte
/// span and in-scope namespace bindings. `Ok(None)` means no match.
fn scan<F>(xml: &str, predicate: &mut F) -> Result<Option<ElementSpan>>
where
    F: FnMut(&BytesStart) -> bool,
{
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    // Per-element namespace declarations, pushed per open element
    let mut ns_stack: Vec<Vec<(String, String)>> = Vec::new();
    let mut found_depth: Option<usize> = None;
    let mut start = 0usize;
    let mut namespaces: Option<BTreeMap<String, String>> = None;

    loop {
        let before = reader.buffer_position() as usize;
        match reader.read_event()? {
            Event::Start(e) => {
                ns_stack.push(declarations_of(&e)?);
                if found_depth.is_none() && predicate(&e) {
                    found_depth = Some(ns_stack.len());
                    start = before;
                    namespaces = Some(flatten(&ns_stack));
                }
            }
            Event::End(_) => {
                let closing_depth = ns_stack.len();
                ns_stack.pop();
                if found_depth == Some(closing_depth) {
                    return Ok(Some(ElementSpan {
                        start,
                        end: reader.buffer_position() as usize,
                        namespaces: namespaces.take().unwrap_or_default(),
                    }));
                }
            }
            Event::Empty(e) => {
                if found_depth.is_none() && predicate(&e) {
                    ns_stack.push(declarations_of(&e)?);
                    let namespaces = flatten(&ns_stack);
                    return Ok(Some(ElementSpan {
                        start: before,
                        end: reader.buffer_position() as usize,
                        namespaces,
                    }));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(None)
}

fn declarations_of(e: &BytesStart) -> Result<Vec<(String, String)>> {
    let mut declarations = Vec::new();
    for attr in e.attributes().with_checks(false) {
        let attr = attr?;
        let key = str::from_utf8(attr.key.as_ref())?;
        if key == "xmlns" {
            declarations.push((String::new(), attr.unescape_value()?.into_owned()));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            declarations.push((prefix.to_string(), attr.unescape_value()?.into_owned()));
        }
    }
    Ok(declarations)
}

fn flatten(ns_stack: &[Vec<(String, String)>]) -> BTreeMap<String, String> {
    let mut bindings = BTreeMap::new();
    for scope in ns_stack {
        for (prefix, uri) in scope {
            if uri.is_empty() {
                bindings.remove(prefix);
            } else {
                bindings.insert(prefix.clone(), uri.clone());
            }
        }
    }
    bindings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_is_verbatim() {
        let xml = "<a><b  attr=\"1\" >text</b></a>";
        let span = by_local_name(xml, "b").unwrap();
        assert_eq!(span.slice(xml), "<b  attr=\"1\" >text</b>");
    }

    #[test]
    fn by_id_matches_qualified_attribute() {
        let xml = r#"<root><Body wsu:Id="body-1">content</Body></root>"#;
        let span = by_id(xml, "body-1").unwrap();
        assert_eq!(span.slice(xml), r#"<Body wsu:Id="body-1">content</Body>"#);
    }

    #[test]
    fn missing_id_is_structural() {
        let err = by_id("<root/>", "nope").unwrap_err();
        assert!(matches!(err, Error::Structural(_)));
    }

    #[test]
    fn ancestor_namespaces_are_captured() {
        let xml = r#"<env xmlns:ds="http://ds.example" xmlns="http://default.example"><ds:Inner>x</ds:Inner></env>"#;
        let span = by_local_name(xml, "Inner").unwrap();
        assert_eq!(
            span.namespaces.get("ds").map(String::as_str),
            Some("http://ds.example")
        );
        assert_eq!(
            span.namespaces.get("").map(String::as_str),
            Some("http://default.example")
        );
    }

    #[test]
    fn empty_element_span() {
        let xml = r#"<root><leaf Id="x"/></root>"#;
        let span = by_id(xml, "x").unwrap();
        assert_eq!(span.slice(xml), r#"<leaf Id="x"/>"#);
    }

    #[test]
    fn text_content_is_collected() {
        let xml = "<root><Value>abc\ndef</Value></root>";
        assert_eq!(text_of(xml, "Value").unwrap(), "abc\ndef");
    }
}
