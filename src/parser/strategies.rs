//! Ordered selector strategies.
//!
//! Listing markup drifts over time, so entry selection and every field lookup
//! is a list of selectors tried in priority order. Supporting a new markup
//! variant means appending to the relevant list.

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

use super::normalize::clean_text;

fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

/// One way of recognizing venue entries on a page.
pub struct EntryStrategy {
    pub name: &'static str,
    selector: Selector,
}

impl EntryStrategy {
    fn new(name: &'static str, css: &str) -> Self {
        Self { name, selector: sel(css) }
    }
}

/// Entry strategies, most specific first.
pub static ENTRY_STRATEGIES: Lazy<Vec<EntryStrategy>> = Lazy::new(|| {
    vec![
        EntryStrategy::new("card-listing", ".venue-list-item.card-listing"),
        EntryStrategy::new("venue-list-item", "div.venue-list-item"),
        EntryStrategy::new("data-attributes", "[data-id][data-type]"),
    ]
});

/// Entries matched by the first strategy that finds any; the strategy name is
/// returned alongside so callers can log which markup variant was seen.
pub fn select_entries(document: &Html) -> Option<(&'static str, Vec<ElementRef<'_>>)> {
    ENTRY_STRATEGIES.iter().find_map(|strategy| {
        let entries: Vec<_> = document.select(&strategy.selector).collect();
        if entries.is_empty() {
            None
        } else {
            Some((strategy.name, entries))
        }
    })
}

/// Selectors for one field, tried in order until one yields a value.
pub struct FieldChain {
    selectors: Vec<Selector>,
}

impl FieldChain {
    fn new(css: &[&str]) -> Self {
        Self { selectors: css.iter().map(|c| sel(c)).collect() }
    }

    /// Cleaned text of the first matching, non-blank element.
    pub fn text(&self, entry: &ElementRef<'_>) -> Option<String> {
        self.selectors.iter().find_map(|selector| {
            entry
                .select(selector)
                .find_map(|el| clean_text(&el.text().collect::<String>()))
        })
    }

    /// Attribute of the first matching element that carries it.
    pub fn attr(&self, entry: &ElementRef<'_>, name: &str) -> Option<String> {
        self.selectors.iter().find_map(|selector| {
            entry
                .select(selector)
                .find_map(|el| el.value().attr(name))
                .and_then(clean_text)
        })
    }

    /// Cleaned text of every match across all selectors, first occurrence kept.
    pub fn all_texts(&self, entry: &ElementRef<'_>) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for selector in &self.selectors {
            for el in entry.select(selector) {
                if let Some(text) = clean_text(&el.text().collect::<String>()) {
                    if !out.contains(&text) {
                        out.push(text);
                    }
                }
            }
        }
        out
    }
}

/// First non-blank value among the entry's own attributes.
pub fn own_attr(entry: &ElementRef<'_>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| entry.value().attr(name).and_then(clean_text))
}

pub const ID_ATTRS: &[&str] = &["data-id", "data-venue-id"];
pub const CATEGORY_ATTRS: &[&str] = &["data-type", "data-category"];

pub static NAME: Lazy<FieldChain> = Lazy::new(|| {
    FieldChain::new(&[
        r#"[data-analytics="listing-card-title"]"#,
        "a.venue-list-item-name-link",
        "h3.venue-name",
        ".venue-name",
    ])
});

pub static CATEGORY: Lazy<FieldChain> =
    Lazy::new(|| FieldChain::new(&[".venue-category", ".venue-type", ".category-label"]));

pub static ADDRESS: Lazy<FieldChain> =
    Lazy::new(|| FieldChain::new(&[".venue-address", "div.venue-list-item-address"]));

pub static RATING: Lazy<FieldChain> =
    Lazy::new(|| FieldChain::new(&[".venue-rating", "div.venue-list-item-rating"]));

pub static REVIEW_COUNT: Lazy<FieldChain> = Lazy::new(|| {
    FieldChain::new(&[
        "span.review-count",
        "span.venue-list-item-review-count",
        ".venue-reviews",
    ])
});

pub static MAP_LINK: Lazy<FieldChain> =
    Lazy::new(|| FieldChain::new(&[r#"a[href*="google.com/maps"]"#, r#"a[href*="maps.google."]"#]));

pub static REVIEW_LINK: Lazy<FieldChain> =
    Lazy::new(|| FieldChain::new(&[r#"a[href*="/reviews/"]"#]));

pub static PHONE_LINK: Lazy<FieldChain> = Lazy::new(|| FieldChain::new(&[r#"a[href^="tel:"]"#]));

pub static PHONE_TEXT: Lazy<FieldChain> = Lazy::new(|| FieldChain::new(&["span.venue-phone"]));

pub static WEBSITE: Lazy<FieldChain> =
    Lazy::new(|| FieldChain::new(&["a.venue-website", "a.venue-list-item-website"]));

pub static PRICE: Lazy<FieldChain> = Lazy::new(|| {
    FieldChain::new(&[".venue-price", "span.price-range", "span.venue-list-item-price"])
});

pub static HOURS: Lazy<FieldChain> = Lazy::new(|| FieldChain::new(&[".venue-hours-text"]));

pub static TAGS: Lazy<FieldChain> = Lazy::new(|| {
    FieldChain::new(&[
        ".venue-cuisine",
        ".venue-features .feature-tag",
        "span.venue-list-item-cuisine",
        "span.cuisine-tag",
        "span.venue-feature",
        "span.venue-list-item-feature",
    ])
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_strategy_wins_for_the_whole_page() {
        let doc = Html::parse_fragment(
            r#"<div class="venue-list-item card-listing" data-id="1"></div>
               <div class="venue-list-item" data-id="2"></div>"#,
        );
        let (name, entries) = select_entries(&doc).unwrap();
        assert_eq!(name, "card-listing");
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn falls_back_to_looser_markers() {
        let doc = Html::parse_fragment(r#"<div class="venue-list-item" data-id="2"></div>"#);
        assert_eq!(select_entries(&doc).unwrap().0, "venue-list-item");

        let doc = Html::parse_fragment(r#"<li data-id="3" data-type="vegan">x</li>"#);
        assert_eq!(select_entries(&doc).unwrap().0, "data-attributes");

        let doc = Html::parse_fragment("<p>No results</p>");
        assert!(select_entries(&doc).is_none());
    }

    #[test]
    fn field_chain_skips_blank_matches() {
        let doc = Html::parse_fragment(
            r#"<div class="venue-list-item"><a class="venue-list-item-name-link">  </a>
               <h3 class="venue-name">Loving Hut</h3></div>"#,
        );
        let (_, entries) = select_entries(&doc).unwrap();
        assert_eq!(NAME.text(&entries[0]), Some("Loving Hut".to_string()));
    }
}
