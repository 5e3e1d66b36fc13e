use super::PageCapture;
use scraper::{ElementRef, Html, Node, Selector};
use sha2::{Digest, Sha256};

/// Elements whose content never contributes to a state
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Hashes the top-level document and every frame document of a capture
pub(super) fn hash_capture(capture: &PageCapture, ignore: &[Selector]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(canonical_dom(&capture.dom, ignore).as_bytes());

    for frame in &capture.frames {
        hasher.update(b"\0frame:");
        hasher.update(frame.path.as_bytes());
        hasher.update(b"\0");
        hasher.update(canonical_dom(&frame.dom, ignore).as_bytes());
    }

    hasher.finalize().into()
}

/// Renders a document into the canonical text that DOM fingerprints hash
///
/// Element names, attributes in sorted order, and text with whitespace runs
/// collapsed are kept. Comments, scripts, styles and subtrees matching
/// `ignore` are dropped.
pub fn canonical_dom(html: &str, ignore: &[Selector]) -> String {
    let document = Html::parse_document(html);
    let mut output = String::with_capacity(html.len() / 2);
    walk(&document.root_element(), ignore, &mut output);
    output
}

fn walk(element: &ElementRef, ignore: &[Selector], output: &mut String) {
    let value = element.value();
    let name = value.name();

    let mut attrs: Vec<(&str, &str)> = value.attrs().collect();
    attrs.sort_unstable();

    output.push('<');
    output.push_str(name);
    for (key, val) in attrs {
        output.push(' ');
        output.push_str(key);
        output.push_str("=\"");
        output.push_str(val);
        output.push('"');
    }
    output.push('>');

    for child in element.children() {
        match child.value() {
            Node::Text(text) => push_collapsed(text, output),
            Node::Element(el) => {
                if SKIPPED_ELEMENTS.contains(&el.name()) {
                    continue;
                }
                if let Some(child_ref) = ElementRef::wrap(child) {
                    if ignore.iter().any(|sel| sel.matches(&child_ref)) {
                        continue;
                    }
                    walk(&child_ref, ignore, output);
                }
            }
            _ => {}
        }
    }

    output.push_str("</");
    output.push_str(name);
    output.push('>');
}

fn push_collapsed(text: &str, output: &mut String) {
    let mut words = text.split_whitespace().peekable();
    if words.peek().is_none() {
        return;
    }
    output.push('|');
    for (i, word) in words.enumerate() {
        if i > 0 {
            output.push(' ');
        }
        output.push_str(word);
    }
    output.push('|');
}
