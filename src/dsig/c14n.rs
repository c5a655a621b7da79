use quick_xml::Reader;
use quick_xml::events::Event;
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::str;

use crate::dsig::{Error, Result};

/// Name of the synthetic wrapper element used to pin namespace bindings from
/// the subtree's original document context. The wrapper itself is never part
/// of the canonical output.
const CONTEXT_WRAPPER: &str = "c14n-namespace-context";

/// Produce the Exclusive XML Canonicalization byte form of a buffered
/// subtree.
///
/// `namespace_lookup` carries the prefix bindings that were in scope where
/// the subtree originally appeared; `inclusive_prefixes` lists prefixes that
/// must be declared in the output even when exclusive canonicalization would
/// elide them. Identical inputs always yield byte-identical output.
pub fn produce(
    xml: &str,
    with_comments: bool,
    inclusive_prefixes: &[String],
    namespace_lookup: &BTreeMap<String, String>,
) -> Result<Vec<u8>> {
    if namespace_lookup.is_empty() {
        // An inclusive prefix with no binding to resolve is skipped, so with
        // no context at all the prefix list cannot contribute declarations.
        return canonicalize(xml, with_comments, inclusive_prefixes, false);
    }

    let mut wrapper = String::with_capacity(xml.len() + 128);
    wrapper.push('<');
    wrapper.push_str(CONTEXT_WRAPPER);
    for (prefix, uri) in namespace_lookup {
        if uri.is_empty() {
            continue;
        }
        if prefix.is_empty() {
            wrapper.push_str(" xmlns=\"");
        } else {
            wrapper.push_str(" xmlns:");
            wrapper.push_str(prefix);
            wrapper.push_str("=\"");
        }
        wrapper.push_str(&escape_attr_value(uri.as_bytes())?);
        wrapper.push('"');
    }
    wrapper.push('>');
    wrapper.push_str(xml);
    wrapper.push_str("</");
    wrapper.push_str(CONTEXT_WRAPPER);
    wrapper.push('>');

    canonicalize(&wrapper, with_comments, inclusive_prefixes, true)
}

/// Canonicalize a subtree. With `skip_outermost` the outermost element is
/// processed for namespace scoping but excluded from the output.
fn canonicalize(
    xml: &str,
    with_comments: bool,
    inclusive_prefixes: &[String],
    skip_outermost: bool,
) -> Result<Vec<u8>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);
    reader.config_mut().expand_empty_elements = true;

    let mut out = Vec::with_capacity(xml.len());
    // Stack of in-scope namespace declarations
    let mut declared_stack: Vec<BTreeMap<String, String>> = vec![BTreeMap::new()];
    // Stack of declarations already rendered by an ancestor
    let mut rendered_stack: Vec<BTreeMap<String, String>> = vec![BTreeMap::new()];
    let mut depth = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let emit = !(skip_outermost && depth == 0);
                write_start_tag(
                    &mut out,
                    &e,
                    &mut declared_stack,
                    &mut rendered_stack,
                    inclusive_prefixes,
                    emit,
                )?;
                depth += 1;
            }
            Event::End(e) => {
                depth -= 1;
                if !(skip_outermost && depth == 0) {
                    out.extend_from_slice(b"</");
                    out.extend_from_slice(e.name().as_ref());
                    out.push(b'>');
                }
                declared_stack.pop();
                rendered_stack.pop();
            }
            Event::Text(e) => {
                let text = e.xml_content().map_err(|e| Error::Xml(e.to_string()))?;
                let normalized = normalize_line_endings(text.as_bytes());
                out.extend_from_slice(escape_text_value(&normalized)?.as_bytes());
            }
            Event::CData(e) => {
                // CDATA is normalized to text content
                let inner = e.into_inner();
                let normalized = normalize_line_endings(&inner);
                out.extend_from_slice(escape_text_value(&normalized)?.as_bytes());
            }
            Event::Comment(e) => {
                if with_comments {
                    out.extend_from_slice(b"<!--");
                    out.extend_from_slice(&normalize_line_endings(&e.into_inner()));
                    out.extend_from_slice(b"-->");
                }
            }
            Event::GeneralRef(e) => {
                let name = str::from_utf8(&e)?;
                out.extend_from_slice(resolve_reference(name)?.as_bytes());
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

/// Write one canonical start tag and push the namespace scopes it opens.
fn write_start_tag(
    out: &mut Vec<u8>,
    e: &quick_xml::events::BytesStart,
    declared_stack: &mut Vec<BTreeMap<String, String>>,
    rendered_stack: &mut Vec<BTreeMap<String, String>>,
    inclusive_prefixes: &[String],
    emit: bool,
) -> Result<()> {
    let parent_rendered = rendered_stack.last().cloned().unwrap_or_default();
    let mut declared = declared_stack.last().cloned().unwrap_or_default();

    // Split namespace declarations from regular attributes
    let mut attrs: Vec<(String, String)> = Vec::new();
    for attr in e.attributes().with_checks(false) {
        let attr = attr?;
        let key = str::from_utf8(attr.key.as_ref())?.to_string();
        let value = attr.unescape_value()?.into_owned();
        if key == "xmlns" {
            if value.is_empty() {
                declared.remove("");
            } else {
                declared.insert(String::new(), value);
            }
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            if value.is_empty() {
                declared.remove(prefix);
            } else {
                declared.insert(prefix.to_string(), value);
            }
        } else {
            attrs.push((key, value));
        }
    }

    // Visibly-utilized prefixes: the element's own, each qualified
    // attribute's, and any requested inclusive prefix that is in scope
    let name = str::from_utf8(e.name().as_ref())?.to_string();
    let mut utilized: BTreeSet<String> = BTreeSet::new();
    utilized.insert(prefix_of(&name).unwrap_or_default().to_string());
    for (key, _) in &attrs {
        // xml: is implicitly bound and never rendered
        if let Some(prefix) = prefix_of(key)
            && prefix != "xml"
        {
            utilized.insert(prefix.to_string());
        }
    }
    for prefix in inclusive_prefixes {
        if declared.contains_key(prefix.as_str()) {
            utilized.insert(prefix.clone());
        }
    }

    // Declarations to render on this element, in prefix order
    let mut render: Vec<(String, String)> = Vec::new();
    for prefix in &utilized {
        if prefix == "xml" {
            continue;
        }
        let Some(uri) = declared.get(prefix.as_str()) else {
            continue;
        };
        if parent_rendered.get(prefix.as_str()) != Some(uri) {
            render.push((prefix.clone(), uri.clone()));
        }
    }

    if emit {
        out.push(b'<');
        out.extend_from_slice(name.as_bytes());
        for (prefix, uri) in &render {
            if prefix.is_empty() {
                out.extend_from_slice(b" xmlns=\"");
            } else {
                out.extend_from_slice(b" xmlns:");
                out.extend_from_slice(prefix.as_bytes());
                out.extend_from_slice(b"=\"");
            }
            out.extend_from_slice(escape_attr_value(uri.as_bytes())?.as_bytes());
            out.push(b'"');
        }

        // Attributes sorted by (namespace URI, local name); unqualified
        // attributes have the empty URI and sort first
        let mut ordered: Vec<(String, String, &String, &String)> = Vec::new();
        for (key, value) in &attrs {
            let (uri, local) = match prefix_of(key) {
                Some("xml") => (crate::dsig::ns::XML.to_string(), local_of(key).to_string()),
                Some(prefix) => (
                    declared.get(prefix).cloned().unwrap_or_default(),
                    local_of(key).to_string(),
                ),
                None => (String::new(), key.clone()),
            };
            ordered.push((uri, local, key, value));
        }
        ordered.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        for (_, _, key, value) in &ordered {
            out.push(b' ');
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(b"=\"");
            out.extend_from_slice(escape_attr_value(value.as_bytes())?.as_bytes());
            out.push(b'"');
        }
        out.push(b'>');
    }

    declared_stack.push(declared);
    let mut rendered = parent_rendered;
    if emit {
        for (prefix, uri) in render {
            rendered.insert(prefix, uri);
        }
    }
    rendered_stack.push(rendered);
    Ok(())
}

fn prefix_of(name: &str) -> Option<&str> {
    name.split_once(':').map(|(prefix, _)| prefix)
}

fn local_of(name: &str) -> &str {
    name.split_once(':').map(|(_, local)| local).unwrap_or(name)
}

/// Resolve a general entity reference into canonical text form.
fn resolve_reference(name: &str) -> Result<String> {
    Ok(match name {
        "amp" => "&amp;".to_string(),
        "lt" => "&lt;".to_string(),
        "gt" => "&gt;".to_string(),
        "apos" => "'".to_string(),
        "quot" => "\"".to_string(),
        _ => {
            let Some(code) = parse_char_reference(name) else {
                return Err(Error::Xml(format!(
                    "unresolvable entity reference '&{name};'"
                )));
            };
            let Some(ch) = char::from_u32(code) else {
                return Err(Error::Xml(format!(
                    "invalid character reference '&{name};'"
                )));
            };
            escape_text_value(ch.to_string().as_bytes())?
        }
    })
}

fn parse_char_reference(name: &str) -> Option<u32> {
    let body = name.strip_prefix('#')?;
    if let Some(hex) = body.strip_prefix('x').or_else(|| body.strip_prefix('X')) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        body.parse().ok()
    }
}

/// Normalize line endings to LF as per C14N spec
fn normalize_line_endings(text: &[u8]) -> Cow<'_, [u8]> {
    if !text.contains(&b'\r') {
        return Cow::Borrowed(text);
    }

    let mut result = Vec::with_capacity(text.len());
    let mut i = 0;
    while i < text.len() {
        if text[i] == b'\r' {
            if i + 1 < text.len() && text[i + 1] == b'\n' {
                // CRLF -> LF
                result.push(b'\n');
                i += 2;
            } else {
                // CR -> LF
                result.push(b'\n');
                i += 1;
            }
        } else {
            result.push(text[i]);
            i += 1;
        }
    }
    Cow::Owned(result)
}

/// Escape attribute value per C14N rules.
fn escape_attr_value(v: &[u8]) -> Result<String> {
    let s = str::from_utf8(v)?;
    let mut out = String::with_capacity(s.len() + s.len() / 4);
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
    Ok(out)
}

/// Escape text node value per C14N rules.
fn escape_text_value(v: &[u8]) -> Result<String> {
    let s = str::from_utf8(v)?;
    let mut out = String::with_capacity(s.len() + s.len() / 4);
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
    Ok(out)
}
