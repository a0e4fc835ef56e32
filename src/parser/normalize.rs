//! Field-level normalizers: pure functions from scraped text to typed values.

use crate::types::{Category, Coordinates, Rating};
use once_cell::sync::Lazy;
use regex::Regex;

static MAP_QUERY_COORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[?&]q=([+-]?\d+(?:\.\d+)?)(?:,|%2C)\s*([+-]?\d+(?:\.\d+)?)").expect("valid regex")
});
static MAP_AT_COORDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@([+-]?\d+(?:\.\d+)?),([+-]?\d+(?:\.\d+)?)").expect("valid regex"));
static DECIMAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("valid regex"));
static INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d[\d,]*").expect("valid regex"));

/// Coordinates embedded in an external map link.
///
/// Patterns are tried in order (`?q=lat,lng`, then `@lat,lng`) and the first
/// match decides; an out-of-range pair yields `None` rather than a clamped
/// value.
pub fn coordinates_from_map_link(href: &str) -> Option<Coordinates> {
    let caps = [&*MAP_QUERY_COORDS, &*MAP_AT_COORDS]
        .iter()
        .find_map(|re| re.captures(href))?;
    let lat: f64 = caps.get(1)?.as_str().parse().ok()?;
    let lng: f64 = caps.get(2)?.as_str().parse().ok()?;
    Coordinates::new(lat, lng).ok()
}

/// First decimal number in the rating text; `None` when absent or out of range.
pub fn rating_from_text(text: &str) -> Option<Rating> {
    let value: f64 = DECIMAL.find(text)?.as_str().parse().ok()?;
    Rating::new(value).ok()
}

/// First integer in the text, thousands separators allowed (`"1,204 reviews"`).
pub fn count_from_text(text: &str) -> Option<u32> {
    let digits: String = INTEGER
        .find(text)?
        .as_str()
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn is_vegan(t: &str) -> bool {
    t.contains("vegan") && !t.contains("friendly")
}

fn is_vegetarian(t: &str) -> bool {
    t.contains("vegetarian")
}

fn is_veg_friendly(t: &str) -> bool {
    t.contains("friendly") || t.contains("veg-options") || t.contains("veg options")
}

// Evaluated in order; the first rule that matches decides.
const CATEGORY_RULES: &[(fn(&str) -> bool, Category)] = &[
    (is_vegan, Category::Vegan),
    (is_vegetarian, Category::Vegetarian),
    (is_veg_friendly, Category::VegFriendly),
];

/// Map free category text onto the closed category set.
pub fn category_from_text(text: &str) -> Category {
    let lowered = text.to_lowercase();
    CATEGORY_RULES
        .iter()
        .find(|(matches, _)| matches(&lowered))
        .map(|(_, category)| *category)
        .unwrap_or(Category::Unknown)
}

/// Collapse runs of whitespace and trim; `None` for blank text.
pub fn clean_text(raw: &str) -> Option<String> {
    let joined = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

/// `data-*` flag attributes use "1"/"true" for set.
pub fn flag_from_attr(value: Option<&str>) -> bool {
    matches!(value.map(str::trim), Some("1") | Some("true"))
}
