//! Tolerant HTML fragment parser.
//!
//! Parses markup the way a browser parses `innerHTML` of a `div`: document
//! level `html`/`head`/`body` tags are dropped (their content is kept),
//! doctypes and comments are skipped, and malformed input never fails;
//! unmatched end tags are ignored and unclosed elements close at end of input.

use super::{Document, Element, NodeId};

/// Parse `html` into a new detached fragment inside `doc`.
pub fn parse_fragment(doc: &mut Document, html: &str) -> NodeId {
    let fragment = doc.create_fragment();
    let bytes = html.as_bytes();
    let mut stack = vec![fragment];
    let mut i = 0usize;

    while i < bytes.len() {
        if starts_with_at(bytes, i, b"<!--") {
            i = find_subslice(bytes, i + 4, b"-->").map_or(bytes.len(), |end| end + 3);
            continue;
        }

        if starts_with_at(bytes, i, b"<!") || starts_with_at(bytes, i, b"<?") {
            i = find_byte(bytes, i, b'>').map_or(bytes.len(), |end| end + 1);
            continue;
        }

        if starts_with_at(bytes, i, b"</") {
            match parse_end_tag(html, i) {
                Some((tag, next)) => {
                    i = next;
                    if is_document_tag(&tag) {
                        continue;
                    }
                    // Pop to the matching open element; ignore strays
                    if let Some(pos) = stack.iter().rposition(|node| doc.is_tag(*node, &tag)) {
                        stack.truncate(pos.max(1));
                    }
                }
                None => {
                    append_text(doc, &stack, &html[i..i + 2]);
                    i += 2;
                }
            }
            continue;
        }

        if bytes[i] == b'<' && bytes.get(i + 1).is_some_and(|b| b.is_ascii_alphabetic()) {
            let Some((element, self_closing, next)) = parse_start_tag(html, i) else {
                // Unclosed start tag swallows the rest of the input
                break;
            };
            i = next;

            if is_document_tag(&element.tag_name) {
                continue;
            }

            let tag = element.tag_name.clone();
            let parent = *stack.last().unwrap_or(&fragment);
            let node = doc.create_element_with(element);
            doc.append_child(parent, node);

            if is_raw_text_tag(&tag) && !self_closing {
                let close = find_end_tag_ci(bytes, i, tag.as_bytes()).unwrap_or(bytes.len());
                let body = &html[i..close];
                if !body.is_empty() {
                    let text = if tag == "script" || tag == "style" {
                        body.to_string()
                    } else {
                        decode_entities(body)
                    };
                    let text_node = doc.create_text(&text);
                    doc.append_child(node, text_node);
                }
                i = match parse_end_tag(html, close) {
                    Some((_, next)) => next,
                    None => bytes.len(),
                };
                continue;
            }

            if !self_closing && !is_void_tag(&tag) {
                stack.push(node);
            }
            continue;
        }

        let start = i;
        i += 1;
        while i < bytes.len() && bytes[i] != b'<' {
            i += 1;
        }
        append_text(doc, &stack, &decode_entities(&html[start..i]));
    }

    fragment
}

fn append_text(doc: &mut Document, stack: &[NodeId], text: &str) {
    if text.is_empty() {
        return;
    }
    let Some(parent) = stack.last().copied() else {
        return;
    };
    let node = doc.create_text(text);
    doc.append_child(parent, node);
}

fn parse_start_tag(html: &str, at: usize) -> Option<(Element, bool, usize)> {
    let bytes = html.as_bytes();
    let mut i = at + 1;

    let tag_start = i;
    while i < bytes.len() && is_tag_char(bytes[i]) {
        i += 1;
    }
    let mut element = Element::new(&html[tag_start..i]);
    let mut self_closing = false;

    loop {
        skip_ws(bytes, &mut i);
        if i >= bytes.len() {
            return None;
        }

        match bytes[i] {
            b'>' => {
                i += 1;
                break;
            }
            b'/' => {
                i += 1;
                if bytes.get(i) == Some(&b'>') {
                    self_closing = true;
                    i += 1;
                    break;
                }
                continue;
            }
            _ => {}
        }

        let name_start = i;
        while i < bytes.len()
            && !bytes[i].is_ascii_whitespace()
            && !matches!(bytes[i], b'=' | b'>' | b'/')
        {
            i += 1;
        }
        let name = &html[name_start..i];
        if name.is_empty() {
            // Lone '=' or similar junk
            i += 1;
            continue;
        }

        skip_ws(bytes, &mut i);
        let value = if bytes.get(i) == Some(&b'=') {
            i += 1;
            skip_ws(bytes, &mut i);
            parse_attr_value(html, &mut i)?
        } else {
            String::new()
        };

        // First occurrence wins, as in browsers
        if element.attr(name).is_none() {
            element.set_attr(name, &value);
        }
    }

    Some((element, self_closing, i))
}

fn parse_attr_value(html: &str, i: &mut usize) -> Option<String> {
    let bytes = html.as_bytes();
    if *i >= bytes.len() {
        return None;
    }

    if bytes[*i] == b'\'' || bytes[*i] == b'"' {
        let quote = bytes[*i];
        *i += 1;
        let start = *i;
        let end = find_byte(bytes, start, quote)?;
        *i = end + 1;
        return Some(decode_entities(&html[start..end]));
    }

    let start = *i;
    while *i < bytes.len() && !bytes[*i].is_ascii_whitespace() && bytes[*i] != b'>' {
        *i += 1;
    }
    Some(decode_entities(&html[start..*i]))
}

fn parse_end_tag(html: &str, at: usize) -> Option<(String, usize)> {
    let bytes = html.as_bytes();
    if !starts_with_at(bytes, at, b"</") {
        return None;
    }
    let mut i = at + 2;
    let tag_start = i;
    while i < bytes.len() && is_tag_char(bytes[i]) {
        i += 1;
    }
    if i == tag_start {
        return None;
    }
    let tag = html[tag_start..i].to_ascii_lowercase();
    let end = find_byte(bytes, i, b'>')?;
    Some((tag, end + 1))
}

/// Decode the character references child markup commonly uses.
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').filter(|end| *end <= 10).and_then(|end| {
            let entity = &tail[1..end];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" | "#39" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ if entity.starts_with("#x") || entity.starts_with("#X") => {
                    u32::from_str_radix(&entity[2..], 16).ok().and_then(char::from_u32)
                }
                _ if entity.starts_with('#') => {
                    entity[1..].parse::<u32>().ok().and_then(char::from_u32)
                }
                _ => None,
            };
            ch.map(|c| (c, end + 1))
        });
        match decoded {
            Some((ch, consumed)) => {
                out.push(ch);
                rest = &tail[consumed..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn is_document_tag(tag: &str) -> bool {
    matches!(tag, "html" | "head" | "body")
}

/// Elements whose content is not parsed as markup.
pub fn is_raw_text_tag(tag: &str) -> bool {
    matches!(tag, "script" | "style" | "textarea" | "title")
}

pub fn is_void_tag(tag: &str) -> bool {
    matches!(
        tag,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}

fn is_tag_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b':'
}

fn skip_ws(bytes: &[u8], i: &mut usize) {
    while *i < bytes.len() && bytes[*i].is_ascii_whitespace() {
        *i += 1;
    }
}

fn starts_with_at(bytes: &[u8], at: usize, needle: &[u8]) -> bool {
    bytes.len() >= at + needle.len() && &bytes[at..at + needle.len()] == needle
}

fn find_byte(bytes: &[u8], from: usize, needle: u8) -> Option<usize> {
    bytes[from.min(bytes.len())..]
        .iter()
        .position(|b| *b == needle)
        .map(|pos| from + pos)
}

fn find_subslice(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| from + pos)
}

/// Position of `</tag` (case-insensitive) at or after `from`.
fn find_end_tag_ci(bytes: &[u8], from: usize, tag: &[u8]) -> Option<usize> {
    let mut i = from;
    while let Some(lt) = find_subslice(bytes, i, b"</") {
        let name_start = lt + 2;
        let name_end = name_start + tag.len();
        if name_end <= bytes.len()
            && bytes[name_start..name_end].eq_ignore_ascii_case(tag)
            && bytes
                .get(name_end)
                .map_or(true, |b| b.is_ascii_whitespace() || *b == b'>' || *b == b'/')
        {
            return Some(lt);
        }
        i = lt + 2;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(html: &str) -> (Document, NodeId) {
        let mut doc = Document::new();
        let fragment = parse_fragment(&mut doc, html);
        (doc, fragment)
    }

    #[test]
    fn test_nested_elements_and_attributes() {
        let (doc, fragment) = parse(r#"<div id="app" class='a b'><span data-x=1>hi</span></div>"#);
        let div = doc.children(fragment)[0];
        assert_eq!(doc.tag_name(div), Some("div"));
        assert_eq!(doc.get_attribute(div, "id"), Some("app"));
        assert_eq!(doc.get_attribute(div, "class"), Some("a b"));
        let span = doc.children(div)[0];
        assert_eq!(doc.get_attribute(span, "data-x"), Some("1"));
        assert_eq!(doc.text_content(span), "hi");
    }

    #[test]
    fn test_drops_document_level_tags() {
        let (doc, fragment) = parse(
            "<!DOCTYPE html><html><head><title>t</title></head><body><p>x</p></body></html>",
        );
        let tags: Vec<_> = doc
            .element_children(fragment)
            .into_iter()
            .filter_map(|n| doc.tag_name(n).map(str::to_string))
            .collect();
        assert_eq!(tags, vec!["title", "p"]);
    }

    #[test]
    fn test_script_content_is_raw() {
        let (doc, fragment) = parse("<script>if (a < b) { x = '</div>'; }</script><p>after</p>");
        let script = doc.children(fragment)[0];
        assert_eq!(doc.text_content(script), "if (a < b) { x = '</div>'; }");
        assert_eq!(doc.tag_name(doc.children(fragment)[1]), Some("p"));
    }

    #[test]
    fn test_void_and_self_closing_elements() {
        let (doc, fragment) = parse(r#"<link rel="stylesheet" href="a.css"><br/><custom-el/><p>x</p>"#);
        let children = doc.element_children(fragment);
        assert_eq!(children.len(), 4);
        assert!(doc.children(children[0]).is_empty());
    }

    #[test]
    fn test_tolerates_malformed_markup() {
        let (doc, fragment) = parse("<div><p>one</span></div><!-- unclosed");
        assert_eq!(doc.inner_html(fragment), "<div><p>one</p></div>");

        let (doc, fragment) = parse("<div>open");
        assert_eq!(doc.inner_html(fragment), "<div>open</div>");

        let (doc, fragment) = parse("a <b");
        assert_eq!(doc.text_content(fragment), "a ");
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("a &amp; b &lt;c&gt; &#65;&#x42; &bogus;"), "a & b <c> AB &bogus;");
        assert_eq!(decode_entities("no entities"), "no entities");
    }

    #[test]
    fn test_renamed_regions_survive() {
        let (doc, fragment) = parse("<micro-app-head><style>a{}</style></micro-app-head><micro-app-body>x</micro-app-body>");
        let children = doc.element_children(fragment);
        assert_eq!(doc.tag_name(children[0]), Some("micro-app-head"));
        assert_eq!(doc.tag_name(children[1]), Some("micro-app-body"));
    }
}
