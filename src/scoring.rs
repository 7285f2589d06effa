//! Relevance scoring for gold-market headlines.
//!
//! Two things live here:
//! - [`is_gold_related`]: the binary, title-only topical gate applied to every
//!   link before any further extraction work
//! - [`Scorer`]: the numeric score used both to rank candidates and as the
//!   admission floor before a record may enter the store
//!
//! Page links and feed entries are scored with different formulas (feeds carry
//! a description, links only a title) but both land on a comparable scale.
//! Every function here is pure and deterministic.

use std::collections::BTreeMap;

/// Unambiguous topic terms; one is enough to pass the gate.
pub const CORE_KEYWORDS: &[&str] = &["gold", "silver", "precious metal", "bullion", "xau"];

/// Context terms; too weak alone, indicative in pairs.
pub const SECONDARY_KEYWORDS: &[&str] = &[
    "price",
    "market",
    "invest",
    "troy ounce",
    "etf",
    "trading",
    "inflation",
    "central bank",
    "fed",
    "safe haven",
];

pub const PRICE_MOTION_KEYWORDS: &[&str] = &[
    "price", "rally", "surge", "plunge", "drop", "rise", "soar", "jump", "fall", "crash", "record",
    "high", "low",
];

/// Weighted terms for feed entries, matched over title and description.
pub const FEED_KEYWORD_WEIGHTS: &[(&str, f64)] = &[
    ("gold", 10.0),
    ("bullion", 8.0),
    ("precious metals", 8.0),
    ("xau", 7.0),
    ("gold price", 12.0),
    ("gold market", 10.0),
    ("central bank", 6.0),
    ("inflation", 5.0),
    ("safe haven", 8.0),
    ("silver", 6.0),
    ("platinum", 5.0),
    ("palladium", 5.0),
];

/// Title fragments that mark dealer adverts rather than news.
pub const ADVERT_TERMS: &[&str] = &[
    "buy gold",
    "shop",
    "store",
    "purchase",
    "order now",
    "advertisement",
];

const CORE_HIT: f64 = 5.0;
const LEADING_BONUS: f64 = 2.0;
const PRICE_HIT: f64 = 1.0;
const NEUTRAL_WEIGHT: f64 = 1.0;

/// Title-only topical gate.
///
/// Matches when any core keyword is present, or failing that when at least two
/// secondary keywords are.
pub fn is_gold_related(text: &str) -> bool {
    let text = text.to_lowercase();
    if CORE_KEYWORDS.iter().any(|kw| text.contains(kw)) {
        return true;
    }
    SECONDARY_KEYWORDS.iter().filter(|kw| text.contains(*kw)).count() >= 2
}

/// Whether a title looks like a dealer advert.
pub fn is_advert(title: &str) -> bool {
    let title = title.to_lowercase();
    ADVERT_TERMS.iter().any(|term| title.contains(term))
}

/// Keyword scorer with per-source trust weights.
#[derive(Debug, Clone)]
pub struct Scorer {
    source_weights: BTreeMap<String, f64>,
    feed_ceiling: f64,
}

impl Scorer {
    pub fn new(source_weights: BTreeMap<String, f64>, feed_ceiling: f64) -> Self {
        Self {
            source_weights,
            feed_ceiling,
        }
    }

    /// Trust weight for a source domain.
    ///
    /// Falls back through parent domains (`finance.yahoo.com` → `yahoo.com`)
    /// before settling on the neutral default.
    pub fn source_weight(&self, source: &str) -> f64 {
        let mut domain = source.trim_start_matches("www.");
        loop {
            if let Some(weight) = self.source_weights.get(domain) {
                return *weight;
            }
            match domain.split_once('.') {
                Some((_, rest)) if rest.contains('.') => domain = rest,
                _ => return NEUTRAL_WEIGHT,
            }
        }
    }

    /// Score a link scraped from a page: source trust plus title keywords.
    pub fn score_link(&self, title: &str, source: &str) -> f64 {
        let title = title.to_lowercase();
        let mut score = self.source_weight(source);

        for keyword in CORE_KEYWORDS {
            if title.contains(keyword) {
                score += CORE_HIT;
                if leads_with(&title, keyword) {
                    score += LEADING_BONUS;
                }
            }
        }
        for keyword in PRICE_MOTION_KEYWORDS {
            if title.contains(keyword) {
                score += PRICE_HIT;
            }
        }
        score
    }

    /// Score a feed or API entry from its title and description, capped.
    pub fn score_feed(&self, title: &str, description: &str) -> f64 {
        let text = format!("{} {}", title, description).to_lowercase();
        let sum: f64 = FEED_KEYWORD_WEIGHTS
            .iter()
            .filter(|(keyword, _)| text.contains(keyword))
            .map(|(_, weight)| weight)
            .sum();
        sum.min(self.feed_ceiling)
    }
}

/// True when `keyword` is the first word of `title`.
fn leads_with(title: &str, keyword: &str) -> bool {
    let title = title.trim_start_matches(|c: char| !c.is_alphanumeric());
    match title.strip_prefix(keyword) {
        Some(rest) => rest.chars().next().is_none_or(|c| !c.is_alphanumeric()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> Scorer {
        let weights = [("kitco.com", 10.0), ("yahoo.com", 7.0)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Scorer::new(weights, 20.0)
    }

    #[test]
    fn test_gate_core_keyword() {
        assert!(is_gold_related("Gold steadies ahead of Fed"));
        assert!(is_gold_related("XAU/USD outlook"));
        assert!(is_gold_related("Precious metals slide"));
    }

    #[test]
    fn test_gate_needs_two_secondary_keywords() {
        assert!(!is_gold_related("Stock market opens higher"));
        assert!(is_gold_related("Inflation data rattles market"));
        assert!(!is_gold_related("Weather forecast for the weekend"));
    }

    #[test]
    fn test_adverts() {
        assert!(is_advert("Buy Gold Coins Today"));
        assert!(is_advert("Order now: silver bars"));
        assert!(!is_advert("Gold rallies on Fed pause"));
    }

    #[test]
    fn test_source_weight_fallbacks() {
        let s = scorer();
        assert_eq!(s.source_weight("kitco.com"), 10.0);
        assert_eq!(s.source_weight("www.kitco.com"), 10.0);
        assert_eq!(s.source_weight("finance.yahoo.com"), 7.0);
        assert_eq!(s.source_weight("example.com"), 1.0);
        assert_eq!(s.source_weight("localhost"), 1.0);
    }

    #[test]
    fn test_score_link_components() {
        let s = scorer();
        // 1 (neutral) + 5 gold + 2 leading + record + high
        assert_eq!(
            s.score_link("Gold hits record high on safe-haven demand", "example.com"),
            10.0
        );
        // 10 (kitco) + 5 gold, not leading, no motion words
        assert_eq!(s.score_link("Why central banks keep buying gold", "kitco.com"), 15.0);
    }

    #[test]
    fn test_leading_bonus_needs_word_boundary() {
        assert!(leads_with("gold rallies", "gold"));
        assert!(leads_with("\"gold\" is back", "gold"));
        assert!(!leads_with("goldman sachs upgrades", "gold"));
        assert!(!leads_with("spot gold", "gold"));
    }

    #[test]
    fn test_score_link_monotonic_in_core_keyword() {
        let s = scorer();
        let titles = [
            "Silver rallies",
            "Markets wobble",
            "Bullion climbs as dollar weakens",
            "gold steady",
        ];
        for title in titles {
            let before = s.score_link(title, "example.com");
            let appended = s.score_link(&format!("{title} gold"), "example.com");
            let prepended = s.score_link(&format!("Gold {title}"), "example.com");
            assert!(appended >= before, "{title}");
            assert!(prepended >= before, "{title}");
        }
    }

    #[test]
    fn test_score_feed_capped() {
        let s = scorer();
        assert_eq!(s.score_feed("Gold price jumps", ""), 20.0);
        assert_eq!(s.score_feed("Platinum supply tightens", ""), 5.0);
        assert_eq!(s.score_feed("Tech stocks", "earnings season"), 0.0);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let s = scorer();
        let a = s.score_link("Gold surges to record", "kitco.com");
        let b = s.score_link("Gold surges to record", "kitco.com");
        assert_eq!(a, b);
        assert_eq!(s.score_feed("Gold", "bullion"), s.score_feed("Gold", "bullion"));
    }
}
