use super::selector::{count_ids, unique_selector};
use super::{Action, ActionCandidate, ActionKind};
use crate::config::CrawlRules;
use crate::fingerprint::PageCapture;
use crate::forms::FormField;
use crate::url::{CrawlScope, UrlScope};
use crate::ConfigError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use scraper::{ElementRef, Html, Selector};
use std::collections::{HashMap, HashSet};
use url::Url;

/// Elements clicked when `click-default-elements` is on
const DEFAULT_CLICKABLES: &str = "a, button, input[type=submit], input[type=button]";

/// Input types that are not filled
const UNFILLED_INPUT_TYPES: &[&str] = &[
    "submit", "button", "hidden", "image", "reset", "file",
];

/// Schemes whose anchors are never offered
const SKIPPED_HREF_SCHEMES: &[&str] = &["mailto:", "tel:", "data:", "sms:", "ftp:"];

/// Applies the click rules to captured pages
#[derive(Debug)]
pub struct CandidateExtractor {
    defaults: Option<Selector>,
    click: Vec<Selector>,
    dont_click: Vec<Selector>,
    dont_click_children_of: Vec<Selector>,
    form_controls: Selector,
    crawl_hidden_anchors: bool,
    crawl_frames: bool,
    random_order: bool,
    seed: u64,
    scope: CrawlScope,
}

impl CandidateExtractor {
    /// Compiles the click rules
    ///
    /// # Arguments
    ///
    /// * `rules` - Crawl rules from the configuration
    /// * `scope` - Hosts anchors may lead to
    ///
    /// # Returns
    ///
    /// * `Ok(CandidateExtractor)` - Ready extractor
    /// * `Err(ConfigError)` - A selector does not compile
    pub fn new(rules: &CrawlRules, scope: CrawlScope) -> Result<Self, ConfigError> {
        let defaults = if rules.click_default_elements {
            Some(compile(DEFAULT_CLICKABLES)?)
        } else {
            None
        };

        Ok(Self {
            defaults,
            click: compile_all(&rules.click)?,
            dont_click: compile_all(&rules.dont_click)?,
            dont_click_children_of: compile_all(&rules.dont_click_children_of)?,
            form_controls: compile("input, textarea, select")?,
            crawl_hidden_anchors: rules.crawl_hidden_anchors,
            crawl_frames: rules.crawl_frames,
            random_order: rules.click_elements_in_random_order,
            seed: rules.random_seed,
            scope,
        })
    }

    /// Returns true if frame documents should be captured and searched
    pub fn crawls_frames(&self) -> bool {
        self.crawl_frames
    }

    /// Enumerates the candidates of a captured state
    ///
    /// Candidates come in document order (top document first, then frames in
    /// capture order) unless random click order is configured, in which case
    /// they are shuffled with a generator seeded from `random-seed` and
    /// `state_key`. Actions whose signature is in `taken` are never returned.
    ///
    /// # Arguments
    ///
    /// * `capture` - The page the state was captured from
    /// * `state_key` - Distinguishes the shuffle of different states
    /// * `taken` - Signatures already taken from this state
    pub fn extract(
        &self,
        capture: &PageCapture,
        state_key: u64,
        taken: &HashSet<String>,
    ) -> Vec<ActionCandidate> {
        let page_url = Url::parse(&capture.url).ok();
        let mut seen: HashSet<String> = taken.clone();
        let mut candidates = Vec::new();

        self.extract_document(&capture.dom, None, page_url.as_ref(), &mut seen, &mut candidates);

        if self.crawl_frames {
            for frame in &capture.frames {
                self.extract_document(
                    &frame.dom,
                    Some(&frame.path),
                    page_url.as_ref(),
                    &mut seen,
                    &mut candidates,
                );
            }
        }

        if self.random_order {
            let mut rng = StdRng::seed_from_u64(self.seed ^ state_key.rotate_left(32));
            candidates.shuffle(&mut rng);
        }

        tracing::trace!(
            "Extracted {} candidates from {} ({} already taken)",
            candidates.len(),
            capture.url,
            taken.len()
        );

        candidates
    }

    fn extract_document(
        &self,
        html: &str,
        frame: Option<&str>,
        page_url: Option<&Url>,
        seen: &mut HashSet<String>,
        out: &mut Vec<ActionCandidate>,
    ) {
        let document = Html::parse_document(html);
        let elements: Vec<ElementRef> = document
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .collect();
        let ids = count_ids(elements.iter().copied());

        for element in elements {
            let default_clickable = self
                .defaults
                .as_ref()
                .is_some_and(|sel| sel.matches(&element));
            let extra_clickable = self.click.iter().any(|sel| sel.matches(&element));
            if !default_clickable && !extra_clickable {
                continue;
            }

            if self.is_excluded(&element) {
                continue;
            }

            let Some(candidate) =
                self.build_candidate(&element, frame, page_url, &ids, default_clickable)
            else {
                continue;
            };

            if seen.insert(candidate.signature()) {
                out.push(candidate);
            }
        }
    }

    fn is_excluded(&self, element: &ElementRef) -> bool {
        if self.dont_click.iter().any(|sel| sel.matches(element)) {
            return true;
        }

        element
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|ancestor| {
                self.dont_click_children_of
                    .iter()
                    .any(|sel| sel.matches(&ancestor))
            })
    }

    fn build_candidate(
        &self,
        element: &ElementRef,
        frame: Option<&str>,
        page_url: Option<&Url>,
        ids: &HashMap<String, usize>,
        default_clickable: bool,
    ) -> Option<ActionCandidate> {
        let tag = element.value().name().to_lowercase();
        let visible = !is_hidden(element);
        let is_anchor = tag == "a";

        let mut href = None;
        if is_anchor {
            if element.value().attr("download").is_some() {
                return None;
            }
            if let Some(raw) = element.value().attr("href") {
                let lowered = raw.trim().to_lowercase();
                if SKIPPED_HREF_SCHEMES.iter().any(|s| lowered.starts_with(s)) {
                    return None;
                }
                if let Some(base) = page_url {
                    match self.scope.classify_href(base, raw) {
                        (_, UrlScope::External) => return None,
                        (Some(url), UrlScope::InScope) => href = Some(url.to_string()),
                        // javascript: and fragment-only handlers stay clickable
                        _ => {}
                    }
                }
            }
        }

        let (kind, hidden_anchor) = match (visible, is_anchor) {
            (true, _) => (ActionKind::Click, false),
            (false, true) if self.crawl_hidden_anchors && href.is_some() => {
                (ActionKind::FollowHref, true)
            }
            (false, _) => return None,
        };

        Some(ActionCandidate {
            action: Action {
                kind,
                selector: unique_selector(element, ids),
                frame: frame.map(str::to_string),
                href,
                text: element_text(element),
                form_fields: self.form_fields(element, ids),
            },
            tag,
            visible,
            in_frame: frame.is_some(),
            default_clickable,
            hidden_anchor,
        })
    }

    /// Collects the fillable controls of the form enclosing `element`
    fn form_fields(&self, element: &ElementRef, ids: &HashMap<String, usize>) -> Vec<FormField> {
        let Some(form) = element
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|ancestor| ancestor.value().name() == "form")
        else {
            return Vec::new();
        };

        form.select(&self.form_controls)
            .filter_map(|control| {
                let value = control.value();
                let field_type = match value.name() {
                    "input" => value.attr("type").unwrap_or("text").to_lowercase(),
                    other => other.to_string(),
                };
                if UNFILLED_INPUT_TYPES.contains(&field_type.as_str())
                    || value.attr("disabled").is_some()
                    || value.attr("readonly").is_some()
                {
                    return None;
                }

                let options = if field_type == "select" {
                    control
                        .descendants()
                        .filter_map(ElementRef::wrap)
                        .filter(|o| o.value().name() == "option")
                        .map(|o| {
                            o.value()
                                .attr("value")
                                .map(str::to_string)
                                .unwrap_or_else(|| element_text(&o))
                        })
                        .collect()
                } else {
                    Vec::new()
                };

                Some(FormField {
                    selector: unique_selector(&control, ids),
                    name: value.attr("name").map(str::to_string),
                    id: value.id().map(str::to_string),
                    field_type,
                    options,
                })
            })
            .collect()
    }
}

/// Hidden if the element or an ancestor carries `hidden`, or an inline style
/// that removes it from rendering
fn is_hidden(element: &ElementRef) -> bool {
    std::iter::once(*element)
        .chain(element.ancestors().filter_map(ElementRef::wrap))
        .any(|el| {
            let value = el.value();
            if value.attr("hidden").is_some() {
                return true;
            }
            if value.name() == "input"
                && value
                    .attr("type")
                    .is_some_and(|t| t.eq_ignore_ascii_case("hidden"))
            {
                return true;
            }
            value.attr("style").is_some_and(|style| {
                let style: String = style
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .collect::<String>()
                    .to_lowercase();
                style.contains("display:none") || style.contains("visibility:hidden")
            })
        })
}

fn element_text(element: &ElementRef) -> String {
    let text = element.text().collect::<Vec<_>>().join(" ");
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        element
            .value()
            .attr("value")
            .or_else(|| element.value().attr("aria-label"))
            .or_else(|| element.value().attr("title"))
            .unwrap_or_default()
            .to_string()
    } else {
        collapsed
    }
}

fn compile(selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector)
        .map_err(|e| ConfigError::InvalidSelector(format!("'{}': {:?}", selector, e)))
}

fn compile_all(selectors: &[String]) -> Result<Vec<Selector>, ConfigError> {
    selectors.iter().map(|s| compile(s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::FrameCapture;

    const PAGE_URL: &str = "http://localhost:8085/index.html";

    fn create_test_rules() -> CrawlRules {
        CrawlRules::default()
    }

    fn extractor(rules: &CrawlRules) -> CandidateExtractor {
        let scope = CrawlScope::new(PAGE_URL, &[]).unwrap();
        CandidateExtractor::new(rules, scope).unwrap()
    }

    fn extract(rules: &CrawlRules, html: &str) -> Vec<ActionCandidate> {
        extractor(rules).extract(&PageCapture::from_dom(PAGE_URL, html), 0, &HashSet::new())
    }

    fn texts(candidates: &[ActionCandidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.action.text.as_str()).collect()
    }

    #[test]
    fn test_default_clickables_in_document_order() {
        let html = r#"<body>
            <a href="/a">First</a>
            <div>not clickable</div>
            <button>Second</button>
            <input type="submit" value="Third">
            <input type="button" value="Fourth">
            <input type="text" name="q">
        </body>"#;

        let candidates = extract(&create_test_rules(), html);
        assert_eq!(texts(&candidates), vec!["First", "Second", "Third", "Fourth"]);
        assert!(candidates.iter().all(|c| c.default_clickable));
    }

    #[test]
    fn test_extra_click_selectors() {
        let mut rules = create_test_rules();
        rules.click_default_elements = false;
        rules.click = vec!["div.card".to_string()];

        let html = r#"<body><a href="/x">Link</a><div class="card">Card</div></body>"#;
        let candidates = extract(&rules, html);

        assert_eq!(texts(&candidates), vec!["Card"]);
        assert!(!candidates[0].default_clickable);
    }

    #[test]
    fn test_dont_click_and_children_exclusions() {
        let mut rules = create_test_rules();
        rules.dont_click = vec!["#logout".to_string()];
        rules.dont_click_children_of = vec![".user-info".to_string()];

        let html = r#"<body>
            <button id="logout">Log out</button>
            <div class="user-info"><a href="/profile">Profile</a></div>
            <button class="user-info">Kept</button>
            <button>Other</button>
        </body>"#;

        let candidates = extract(&rules, html);
        assert_eq!(texts(&candidates), vec!["Kept", "Other"]);
    }

    #[test]
    fn test_hidden_anchor_rules() {
        let html = r#"<body>
            <a href="/visible">Shown</a>
            <div style="display: none"><a href="/secret">Secret</a></div>
            <button hidden>Hidden button</button>
        </body>"#;

        let candidates = extract(&create_test_rules(), html);
        assert_eq!(texts(&candidates), vec!["Shown"]);

        let mut rules = create_test_rules();
        rules.crawl_hidden_anchors = true;
        let candidates = extract(&rules, html);

        assert_eq!(texts(&candidates), vec!["Shown", "Secret"]);
        let secret = &candidates[1];
        assert_eq!(secret.action.kind, ActionKind::FollowHref);
        assert!(secret.hidden_anchor);
        assert!(!secret.visible);
        assert_eq!(
            secret.action.href.as_deref(),
            Some("http://localhost:8085/secret")
        );
    }

    #[test]
    fn test_skipped_anchors() {
        let html = r#"<body>
            <a href="mailto:team@example.com">Mail</a>
            <a href="tel:+15551234">Call</a>
            <a href="https://example.org/">External</a>
            <a href="/report.pdf" download>Download</a>
            <a href="javascript:void(0)">Script</a>
            <a href="detail.html">Detail</a>
        </body>"#;

        let candidates = extract(&create_test_rules(), html);
        assert_eq!(texts(&candidates), vec!["Script", "Detail"]);
        assert_eq!(candidates[0].action.href, None);
        assert_eq!(
            candidates[1].action.href.as_deref(),
            Some("http://localhost:8085/detail.html")
        );
    }

    #[test]
    fn test_taken_actions_not_offered() {
        let html = r#"<body><button id="a">A</button><button id="b">B</button></body>"#;
        let ex = extractor(&create_test_rules());
        let capture = PageCapture::from_dom(PAGE_URL, html);

        let all = ex.extract(&capture, 0, &HashSet::new());
        let taken: HashSet<String> = [all[0].signature()].into_iter().collect();
        let rest = ex.extract(&capture, 0, &taken);

        assert_eq!(texts(&rest), vec!["B"]);
    }

    #[test]
    fn test_frames() {
        let mut capture = PageCapture::from_dom(PAGE_URL, "<body><button>Top</button><iframe></iframe></body>");
        capture.frames.push(FrameCapture {
            path: "0".to_string(),
            dom: "<body><button>Inner</button></body>".to_string(),
        });

        let candidates = extractor(&create_test_rules()).extract(&capture, 0, &HashSet::new());
        assert_eq!(texts(&candidates), vec!["Top", "Inner"]);
        assert_eq!(candidates[1].action.frame.as_deref(), Some("0"));
        assert!(candidates[1].in_frame);

        let mut rules = create_test_rules();
        rules.crawl_frames = false;
        let candidates = extractor(&rules).extract(&capture, 0, &HashSet::new());
        assert_eq!(texts(&candidates), vec!["Top"]);
    }

    #[test]
    fn test_form_fields_attached() {
        let html = r#"<body><form id="signup">
            <input type="email" name="email">
            <input type="hidden" name="csrf" value="x">
            <input type="text" name="nick" disabled>
            <select name="plan"><option value="free">Free</option><option>Pro</option></select>
            <textarea id="bio"></textarea>
            <button type="submit">Join</button>
        </form><button>Outside</button></body>"#;

        let candidates = extract(&create_test_rules(), html);
        assert_eq!(texts(&candidates), vec!["Join", "Outside"]);

        let fields = &candidates[0].action.form_fields;
        let types: Vec<&str> = fields.iter().map(|f| f.field_type.as_str()).collect();
        assert_eq!(types, vec!["email", "select", "textarea"]);
        assert_eq!(fields[1].options, vec!["free".to_string(), "Pro".to_string()]);
        assert_eq!(fields[2].selector, "#bio");
        assert!(candidates[1].action.form_fields.is_empty());
    }

    #[test]
    fn test_random_order_is_seeded() {
        let html: String = (0..12)
            .map(|i| format!("<button id=\"b{}\">{}</button>", i, i))
            .collect();
        let mut rules = create_test_rules();
        rules.click_elements_in_random_order = true;
        rules.random_seed = 99;

        let ex = extractor(&rules);
        let capture = PageCapture::from_dom(PAGE_URL, format!("<body>{}</body>", html));
        let first = ex.extract(&capture, 3, &HashSet::new());
        let second = ex.extract(&capture, 3, &HashSet::new());

        assert_eq!(texts(&first), texts(&second));
        assert_eq!(first.len(), 12);
        let document_order: Vec<String> = (0..12).map(|i| i.to_string()).collect();
        assert_ne!(
            texts(&first),
            document_order.iter().map(String::as_str).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_invalid_rule_selector() {
        let mut rules = create_test_rules();
        rules.click = vec!["button[".to_string()];
        let scope = CrawlScope::new(PAGE_URL, &[]).unwrap();
        assert!(CandidateExtractor::new(&rules, scope).is_err());
    }
}
