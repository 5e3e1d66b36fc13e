use scraper::ElementRef;
use std::collections::HashMap;

/// Builds a CSS selector that matches exactly `element` in its document
///
/// An element with a document-unique `id` is addressed as `#id`. Otherwise
/// the path climbs through `tag:nth-of-type(n)` steps until it reaches an
/// ancestor with a unique id or the root element.
///
/// `id_counts` holds how often each id occurs in the document.
pub fn unique_selector(element: &ElementRef, id_counts: &HashMap<String, usize>) -> String {
    let mut steps = Vec::new();
    let mut current = Some(*element);

    while let Some(el) = current {
        if let Some(id) = unique_id(&el, id_counts) {
            steps.push(id);
            break;
        }

        let name = el.value().name();
        let parent = el.parent().and_then(ElementRef::wrap);
        if parent.is_none() {
            steps.push(name.to_string());
            break;
        }

        let position = el
            .prev_siblings()
            .filter_map(ElementRef::wrap)
            .filter(|sibling| sibling.value().name() == name)
            .count()
            + 1;
        steps.push(format!("{}:nth-of-type({})", name, position));
        current = parent;
    }

    steps.reverse();
    steps.join(" > ")
}

/// Counts id attributes in a document
pub(super) fn count_ids<'a>(elements: impl Iterator<Item = ElementRef<'a>>) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for element in elements {
        if let Some(id) = element.value().id() {
            *counts.entry(id.to_string()).or_insert(0) += 1;
        }
    }
    counts
}

fn unique_id(element: &ElementRef, id_counts: &HashMap<String, usize>) -> Option<String> {
    let id = element.value().id()?;
    if id_counts.get(id) != Some(&1) {
        return None;
    }

    let plain = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        && id.chars().next().is_some_and(|c| c.is_ascii_alphabetic());

    if plain {
        Some(format!("#{}", id))
    } else {
        Some(format!("[id=\"{}\"]", id.replace('\\', "\\\\").replace('"', "\\\"")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::{Html, Selector};

    fn selector_for(html: &str, target: &str) -> String {
        let document = Html::parse_document(html);
        let ids = count_ids(document.root_element().descendants().filter_map(ElementRef::wrap));
        let sel = Selector::parse(target).unwrap();
        let element = document.select(&sel).next().unwrap();
        unique_selector(&element, &ids)
    }

    fn assert_matches_only(html: &str, target: &str) {
        let css = selector_for(html, target);
        let document = Html::parse_document(html);
        let built = Selector::parse(&css).unwrap();
        let expected = Selector::parse(target).unwrap();

        let found: Vec<_> = document.select(&built).collect();
        assert_eq!(found.len(), 1, "selector {} matched {}", css, found.len());
        assert_eq!(found[0].id(), document.select(&expected).next().unwrap().id());
    }

    #[test]
    fn test_unique_id() {
        let html = "<body><button id=\"save\">Save</button></body>";
        assert_eq!(selector_for(html, "button"), "#save");
    }

    #[test]
    fn test_duplicate_id_falls_back_to_path() {
        let html = "<body><a id=\"x\">1</a><a id=\"x\">2</a></body>";
        let css = selector_for(html, "a:nth-of-type(2)");
        assert_eq!(css, "html > body:nth-of-type(1) > a:nth-of-type(2)");
    }

    #[test]
    fn test_path_stops_at_unique_ancestor() {
        let html = "<body><nav id=\"menu\"><ul><li><a>Home</a></li><li><a>About</a></li></ul></nav></body>";
        let css = selector_for(html, "li:nth-of-type(2) > a");
        assert_eq!(
            css,
            "#menu > ul:nth-of-type(1) > li:nth-of-type(2) > a:nth-of-type(1)"
        );
    }

    #[test]
    fn test_odd_ids_are_quoted() {
        let html = "<body><div id=\"1st:item\">x</div></body>";
        assert_eq!(selector_for(html, "div"), "[id=\"1st:item\"]");
    }

    #[test]
    fn test_selectors_match_exactly_one() {
        let html = r#"<body>
            <div><button>A</button><span></span><button>B</button></div>
            <div><button>C</button></div>
        </body>"#;
        assert_matches_only(html, "div:nth-of-type(1) > button:nth-of-type(2)");
        assert_matches_only(html, "div:nth-of-type(2) > button");
    }
}
