//! Article body extraction.
//!
//! Bodies are pulled out of arbitrary markup by an ordered list of
//! [`ContentStrategy`] values tried until one produces enough text. Paywalled
//! pages short-circuit to a preview built from summary selectors, meta
//! descriptions or the first paragraph.

use crate::scrapers::selectors::{DEFAULT_META_DESCRIPTION, SelectorRegistry, SelectorSet, parse_list};
use crate::utils::{clean_text, first_sentences};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};

/// Elements that never hold article text.
const NOISE: &str = "script, style, noscript, nav, header, footer, aside, .ads, .ad-container, \
                     .banner, .comment, .social, .share-tools, .related, .related-articles, .sidebar, \
                     .newsletter-signup, .cookie-notice";

/// Paywall markers recognised on any site.
const GENERIC_PAYWALL: &str = ".paywall, .paywall-overlay, .subscriber-only, .premium-content, [data-paywall]";

const LONG_PARAGRAPH_CHARS: usize = 100;
const PREVIEW_SENTENCES: usize = 3;

/// One way of finding the body text in a parsed page.
pub trait ContentStrategy {
    fn name(&self) -> &str;

    /// Body text, or `None` when this strategy finds nothing.
    fn extract(&self, doc: &Html) -> Option<String>;
}

/// The first element matching any selector in the list, in list order.
pub struct FirstMatch {
    name: String,
    selectors: Vec<Selector>,
}

impl FirstMatch {
    pub fn new(name: &str, selectors: &str) -> Self {
        Self {
            name: name.to_string(),
            selectors: parse_list(selectors),
        }
    }
}

impl ContentStrategy for FirstMatch {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, doc: &Html) -> Option<String> {
        let el = self.selectors.iter().find_map(|sel| doc.select(sel).next())?;
        Some(container_text(el))
    }
}

/// Every paragraph longer than a threshold, in document order.
pub struct LongParagraphs {
    min_chars: usize,
}

impl ContentStrategy for LongParagraphs {
    fn name(&self) -> &str {
        "long-paragraphs"
    }

    fn extract(&self, doc: &Html) -> Option<String> {
        let p = Selector::parse("p").ok()?;
        let paragraphs: Vec<String> = doc
            .select(&p)
            .map(element_text)
            .filter(|t| t.chars().count() > self.min_chars)
            .collect();
        (!paragraphs.is_empty()).then(|| paragraphs.join("\n\n"))
    }
}

/// Paragraph text of a container, or all of its text when it has none.
fn container_text(el: ElementRef) -> String {
    let paragraphs: Vec<String> = match Selector::parse("p") {
        Ok(p) => el.select(&p).map(element_text).filter(|t| !t.is_empty()).collect(),
        Err(_) => Vec::new(),
    };
    if paragraphs.is_empty() {
        element_text(el)
    } else {
        paragraphs.join("\n\n")
    }
}

fn element_text(el: ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Strategies for a page on `domain`: the site's own content selectors when
/// registered, then the generic cascade.
pub fn strategies_for(set: Option<&SelectorSet>) -> Vec<Box<dyn ContentStrategy + Send + Sync>> {
    let mut list: Vec<Box<dyn ContentStrategy + Send + Sync>> = Vec::new();
    if let Some(content) = set.and_then(|s| s.content.as_deref()) {
        list.push(Box::new(FirstMatch::new("site", content)));
    }
    list.push(Box::new(FirstMatch::new("article", "article")));
    list.push(Box::new(FirstMatch::new(
        "content-class",
        ".content, .article-content, .entry-content, .post-content, .story-content",
    )));
    list.push(Box::new(FirstMatch::new(
        "content-id",
        "#content, #article, #main-content, #post-content",
    )));
    list.push(Box::new(FirstMatch::new(
        "body-class",
        ".body, .article-body, .entry-body, .story-body",
    )));
    list.push(Box::new(LongParagraphs {
        min_chars: LONG_PARAGRAPH_CHARS,
    }));
    list
}

/// What the content pass learned about one article page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedContent {
    pub content: String,
    /// Set for paywall previews only; full bodies are left to the summarizer.
    pub summary: Option<String>,
    pub is_paywalled: bool,
}

/// Extract the body (or a paywall preview) from an article page on `domain`.
#[instrument(level = "debug", skip(html, registry), fields(bytes = html.len()))]
pub fn extract_content(
    html: &str,
    domain: &str,
    registry: &SelectorRegistry,
    min_length: usize,
) -> ExtractedContent {
    let mut doc = Html::parse_document(html);
    let set = registry.lookup(domain);

    let paywalled = is_paywalled(&doc, set);
    strip_noise(&mut doc);

    if paywalled {
        let preview = preview(&doc, set);
        debug!(chars = preview.len(), "Paywall detected; keeping preview");
        return ExtractedContent {
            content: preview.clone(),
            summary: (!preview.is_empty()).then_some(preview),
            is_paywalled: true,
        };
    }

    let mut best = String::new();
    for strategy in strategies_for(set) {
        let Some(text) = strategy.extract(&doc) else {
            continue;
        };
        let text = clean_text(&text);
        let len = text.chars().count();
        debug!(strategy = strategy.name(), chars = len, "Content strategy tried");
        if len >= min_length {
            best = text;
            break;
        }
        if len > best.chars().count() {
            best = text;
        }
    }

    ExtractedContent {
        content: best,
        summary: None,
        is_paywalled: false,
    }
}

fn is_paywalled(doc: &Html, set: Option<&SelectorSet>) -> bool {
    let site = set
        .and_then(|s| s.paywall_indicator.as_deref())
        .map(parse_list)
        .unwrap_or_default();
    site.iter()
        .chain(parse_list(GENERIC_PAYWALL).iter())
        .any(|sel| doc.select(sel).next().is_some())
}

/// Detach every noise element from the tree.
fn strip_noise(doc: &mut Html) {
    let Ok(noise) = Selector::parse(NOISE) else {
        return;
    };
    let ids: Vec<_> = doc.select(&noise).map(|el| el.id()).collect();
    for id in ids {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.detach();
        }
    }
}

/// Teaser text: summary selectors, then meta description, then the opening
/// sentences of the first paragraph.
fn preview(doc: &Html, set: Option<&SelectorSet>) -> String {
    if let Some(list) = set.and_then(|s| s.summary.as_deref()) {
        for sel in parse_list(list) {
            let text: Vec<String> = doc.select(&sel).map(element_text).filter(|t| !t.is_empty()).collect();
            if !text.is_empty() {
                return clean_text(&text.join("\n"));
            }
        }
    }

    let meta = set
        .and_then(|s| s.meta_description.as_deref())
        .unwrap_or(DEFAULT_META_DESCRIPTION);
    for sel in parse_list(meta) {
        if let Some(content) = doc.select(&sel).find_map(|m| m.value().attr("content")) {
            let content = clean_text(content);
            if !content.is_empty() {
                return content;
            }
        }
    }

    Selector::parse("p")
        .ok()
        .and_then(|p| doc.select(&p).map(element_text).find(|t| !t.is_empty()))
        .map(|t| first_sentences(&clean_text(&t), PREVIEW_SENTENCES))
        .unwrap_or_default()
}
