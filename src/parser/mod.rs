//! Venue extraction: one page's HTML fragment in, validated records out.
//!
//! Extraction is a pure function of its input. Every field is looked up
//! independently and a missing optional field is simply `None`; only an entry
//! without an identifier or a name is dropped.

pub mod normalize;
pub mod strategies;

use crate::types::{RecordError, VenueRecord};
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

use normalize::{category_from_text, coordinates_from_map_link, count_from_text, flag_from_attr, rating_from_text};
use strategies as s;

/// Where a page came from; stamped onto every record extracted from it.
#[derive(Debug, Clone)]
pub struct PageContext {
    pub location_path: String,
    pub page_number: u32,
    pub extracted_at: DateTime<Utc>,
}

impl PageContext {
    pub fn new(location_path: impl Into<String>, page_number: u32) -> Self {
        Self {
            location_path: location_path.into(),
            page_number,
            extracted_at: Utc::now(),
        }
    }
}

/// Records from one page plus bookkeeping about what was dropped.
#[derive(Debug, Clone, Default)]
pub struct PageExtraction {
    pub records: Vec<VenueRecord>,
    /// Entries matched by the winning strategy.
    pub entries_matched: usize,
    /// Entries dropped for lacking an identifier or a name.
    pub discarded: usize,
    /// Entries repeating an identifier already seen on this page.
    pub duplicates: usize,
    pub strategy: Option<&'static str>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ExtractError {
    #[error("page had {entries} venue entries but none produced a valid record ({discarded} discarded)")]
    PageExhausted { entries: usize, discarded: usize },
}

/// Stateless extractor; cheap to construct and share.
#[derive(Debug, Clone, Copy, Default)]
pub struct Extractor;

impl Extractor {
    pub fn new() -> Self {
        Self
    }

    /// Number of venue entries on a page, without extracting them.
    pub fn count_entries(&self, html: &str) -> usize {
        let document = Html::parse_fragment(html);
        s::select_entries(&document)
            .map(|(_, entries)| entries.len())
            .unwrap_or(0)
    }

    pub fn extract(&self, html: &str, ctx: &PageContext) -> Result<PageExtraction, ExtractError> {
        let document = Html::parse_fragment(html);
        let Some((strategy, entries)) = s::select_entries(&document) else {
            debug!(page = ctx.page_number, "no venue entries matched any strategy");
            return Ok(PageExtraction::default());
        };

        let mut out = PageExtraction {
            entries_matched: entries.len(),
            strategy: Some(strategy),
            ..PageExtraction::default()
        };
        let mut seen: HashSet<String> = HashSet::new();

        for entry in &entries {
            match extract_entry(entry, ctx) {
                Ok(record) => {
                    if seen.insert(record.source_id.clone()) {
                        out.records.push(record);
                    } else {
                        out.duplicates += 1;
                    }
                }
                Err(reason) => {
                    debug!(page = ctx.page_number, %reason, "discarding venue entry");
                    out.discarded += 1;
                }
            }
        }

        debug!(
            page = ctx.page_number,
            strategy,
            matched = out.entries_matched,
            kept = out.records.len(),
            discarded = out.discarded,
            duplicates = out.duplicates,
            "extracted page"
        );

        if out.records.is_empty() {
            warn!(
                page = ctx.page_number,
                strategy,
                entries = out.entries_matched,
                "every venue entry on the page was unusable"
            );
            return Err(ExtractError::PageExhausted {
                entries: out.entries_matched,
                discarded: out.discarded,
            });
        }
        Ok(out)
    }
}

fn extract_entry(entry: &ElementRef<'_>, ctx: &PageContext) -> Result<VenueRecord, RecordError> {
    let el = entry.value();

    let category_text = s::own_attr(entry, s::CATEGORY_ATTRS).or_else(|| s::CATEGORY.text(entry));
    let category = category_text
        .as_deref()
        .map(category_from_text)
        .unwrap_or(crate::types::Category::Unknown);

    let coordinates = s::MAP_LINK
        .attr(entry, "href")
        .and_then(|href| coordinates_from_map_link(&href));

    let phone = s::PHONE_LINK
        .attr(entry, "href")
        .map(|href| href.trim_start_matches("tel:").to_string())
        .or_else(|| s::PHONE_TEXT.text(entry));

    VenueRecord::builder(ctx.location_path.clone(), ctx.page_number)
        .source_id(s::own_attr(entry, s::ID_ATTRS))
        .name(s::NAME.text(entry))
        .category(category)
        .address(s::ADDRESS.text(entry))
        .coordinates(coordinates)
        .rating(s::RATING.text(entry).and_then(|t| rating_from_text(&t)))
        .review_count(s::REVIEW_COUNT.text(entry).and_then(|t| count_from_text(&t)))
        .tags(s::TAGS.all_texts(entry))
        .price_range(s::PRICE.text(entry))
        .flags(
            flag_from_attr(el.attr("data-new")),
            flag_from_attr(el.attr("data-top")),
            flag_from_attr(el.attr("data-partner")),
        )
        .url(s::REVIEW_LINK.attr(entry, "href"))
        .phone(phone)
        .website(s::WEBSITE.attr(entry, "href"))
        .hours_status(s::HOURS.text(entry))
        .extracted_at(ctx.extracted_at)
        .build()
}
