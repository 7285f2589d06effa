//! Per-source selector sets.
//!
//! The generic cascades in [`links`](super::links) and
//! [`content`](super::content) work on any site. A few outlets are better
//! served by hand-picked selectors, and some need a paywall check. Those live
//! here as immutable [`SelectorSet`] values keyed by domain, looked up rather
//! than branched on. Lists are comma-separated CSS selectors tried in order.

use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

pub const DEFAULT_META_DESCRIPTION: &str =
    "meta[name='description'], meta[property='og:description']";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SelectorSet {
    /// Where a teaser or standfirst lives.
    pub summary: Option<String>,
    /// `<meta>` tags whose `content` describes the article.
    pub meta_description: Option<String>,
    /// Presence of any match means the article is paywalled.
    pub paywall_indicator: Option<String>,
    /// Containers holding the article body.
    pub content: Option<String>,
}

impl SelectorSet {
    fn new(
        summary: Option<&str>,
        paywall_indicator: Option<&str>,
        content: Option<&str>,
    ) -> Self {
        Self {
            summary: summary.map(String::from),
            meta_description: Some(DEFAULT_META_DESCRIPTION.to_string()),
            paywall_indicator: paywall_indicator.map(String::from),
            content: content.map(String::from),
        }
    }
}

/// Parse a comma-separated selector list, dropping entries that do not parse.
pub fn parse_list(list: &str) -> Vec<Selector> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match Selector::parse(s) {
            Ok(sel) => Some(sel),
            Err(e) => {
                debug!(selector = s, error = %e, "Ignoring unparseable selector");
                None
            }
        })
        .collect()
}

/// Domain → [`SelectorSet`] lookup.
#[derive(Debug, Clone)]
pub struct SelectorRegistry {
    sets: BTreeMap<String, SelectorSet>,
}

impl Default for SelectorRegistry {
    fn default() -> Self {
        Self::with_overrides(&BTreeMap::new())
    }
}

impl SelectorRegistry {
    /// Built-in entries, with `overrides` added or replacing by domain.
    pub fn with_overrides(overrides: &BTreeMap<String, SelectorSet>) -> Self {
        let mut sets = BTreeMap::new();
        sets.insert(
            "kitco.com".to_string(),
            SelectorSet::new(
                Some("div.lead, p.summary, .article-summary"),
                None,
                Some("div.article-body, div.article-content, div.content"),
            ),
        );
        sets.insert(
            "investing.com".to_string(),
            SelectorSet::new(
                Some(".articleText p:first-of-type, .article__summary"),
                None,
                Some(".articlePage, .WYSIWYG, #fullArticle"),
            ),
        );
        sets.insert(
            "finance.yahoo.com".to_string(),
            SelectorSet::new(Some(".caas-description"), None, Some(".caas-body, article")),
        );
        sets.insert(
            "marketwatch.com".to_string(),
            SelectorSet::new(
                Some(".article__summary, .summary, .paywall-desc"),
                Some(".paywall, .snippet-promotion"),
                Some(".article__body, .article-wrap, .column--primary"),
            ),
        );
        sets.insert(
            "cnbc.com".to_string(),
            SelectorSet::new(
                Some(".SummaryList-item, .summary"),
                None,
                Some(".ArticleBody-articleBody, .group, article"),
            ),
        );
        sets.insert(
            "wsj.com".to_string(),
            SelectorSet::new(
                Some(".article-summary, .paywall-desc, .wsj-summary, #article_slice p:first-of-type"),
                Some(".wsj-paywall, .paywall-overlay, .snippet-promotion"),
                None,
            ),
        );
        sets.insert(
            "ft.com".to_string(),
            SelectorSet::new(
                Some(".o-topper__standfirst, .article__standfirst"),
                Some(".barrier, .js-barrier, [data-barrier]"),
                None,
            ),
        );
        sets.insert(
            "bloomberg.com".to_string(),
            SelectorSet::new(
                Some(".abstract, .summary"),
                Some(".paywall, .fence-body, #paywall-banner"),
                None,
            ),
        );
        sets.insert(
            "federalreserve.gov".to_string(),
            SelectorSet::new(
                Some("#article p:first-of-type"),
                None,
                Some("#article .col-xs-12.col-sm-8, #article, #content"),
            ),
        );

        for (domain, set) in overrides {
            sets.insert(domain.to_lowercase(), set.clone());
        }
        Self { sets }
    }

    /// Selector set for `domain`, falling back through parent domains so
    /// `markets.wsj.com` finds the `wsj.com` entry.
    pub fn lookup(&self, domain: &str) -> Option<&SelectorSet> {
        let mut candidate = domain;
        loop {
            if let Some(set) = self.sets.get(candidate) {
                return Some(set);
            }
            let (_, parent) = candidate.split_once('.')?;
            if !parent.contains('.') {
                return None;
            }
            candidate = parent;
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sets.len()
    }
}
