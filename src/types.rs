use crate::constants::{
    COORDINATE_PRECISION, ENDPOINT_PATH_DELIMITER, HIGH_PRIORITY_MIN_ENTRIES, MAX_RATING,
    MEDIUM_PRIORITY_MIN_ENTRIES, PATH_SEPARATOR,
};
use crate::error::{Result, ScraperError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Scheduling tier derived from the number of listings a location has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityTier {
    High,
    Medium,
    Low,
}

impl PriorityTier {
    pub fn from_entry_count(entries: u32) -> Self {
        if entries >= HIGH_PRIORITY_MIN_ENTRIES {
            PriorityTier::High
        } else if entries >= MEDIUM_PRIORITY_MIN_ENTRIES {
            PriorityTier::Medium
        } else {
            PriorityTier::Low
        }
    }

    /// Sort key, lower runs first.
    pub fn rank(&self) -> i64 {
        match self {
            PriorityTier::High => 0,
            PriorityTier::Medium => 1,
            PriorityTier::Low => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityTier::High => "high",
            PriorityTier::Medium => "medium",
            PriorityTier::Low => "low",
        }
    }
}

impl FromStr for PriorityTier {
    type Err = ScraperError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "high" => Ok(PriorityTier::High),
            "medium" => Ok(PriorityTier::Medium),
            "low" => Ok(PriorityTier::Low),
            other => Err(ScraperError::InvalidState(format!("unknown priority tier '{other}'"))),
        }
    }
}

/// A crawlable geographic unit, keyed by its hierarchical path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub region: String,
    pub path: String,
    pub url: String,
    pub expected_entries: u32,
    pub priority: PriorityTier,
}

/// Discovery output row, the input shape for bulk queue loads.
#[derive(Debug, Clone, Deserialize)]
pub struct LocationSeed {
    pub name: String,
    #[serde(default)]
    pub region: String,
    pub path: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub entries: u32,
}

impl Location {
    pub fn new(
        name: impl Into<String>,
        region: impl Into<String>,
        path: impl Into<String>,
        url: impl Into<String>,
        expected_entries: u32,
    ) -> Result<Self> {
        let path = normalize_path(&path.into())?;
        Ok(Self {
            name: name.into().trim().to_string(),
            region: region.into().trim().to_string(),
            path,
            url: url.into().trim().to_string(),
            expected_entries,
            priority: PriorityTier::from_entry_count(expected_entries),
        })
    }
}

impl TryFrom<LocationSeed> for Location {
    type Error = ScraperError;

    fn try_from(seed: LocationSeed) -> Result<Self> {
        Location::new(seed.name, seed.region, seed.path, seed.url, seed.entries)
    }
}

/// Trim surrounding separators and reject paths the endpoint cannot address.
pub fn normalize_path(raw: &str) -> Result<String> {
    let invalid = |reason: &str| ScraperError::InvalidLocation {
        path: raw.to_string(),
        reason: reason.to_string(),
    };
    let trimmed = raw.trim().trim_matches(PATH_SEPARATOR);
    if trimmed.is_empty() {
        return Err(invalid("path is empty"));
    }
    if trimmed.contains(ENDPOINT_PATH_DELIMITER) {
        return Err(invalid("path contains the reserved '|' delimiter"));
    }
    if trimmed.split(PATH_SEPARATOR).any(|segment| segment.trim().is_empty()) {
        return Err(invalid("path has an empty segment"));
    }
    Ok(trimmed.to_string())
}

/// Lifecycle state of a queue row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkState {
    Ready,
    Pending,
    Running,
    Completed,
    Error,
    Skip,
}

impl WorkState {
    pub const ALL: [WorkState; 6] = [
        WorkState::Ready,
        WorkState::Pending,
        WorkState::Running,
        WorkState::Completed,
        WorkState::Error,
        WorkState::Skip,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkState::Ready => "ready",
            WorkState::Pending => "pending",
            WorkState::Running => "running",
            WorkState::Completed => "completed",
            WorkState::Error => "error",
            WorkState::Skip => "skip",
        }
    }
}

impl fmt::Display for WorkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkState {
    type Err = ScraperError;

    fn from_str(s: &str) -> Result<Self> {
        WorkState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| ScraperError::InvalidState(format!("unknown work state '{s}'")))
    }
}

/// One queue row bound to a location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkItem {
    pub location: Location,
    pub state: WorkState,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub last_result_count: Option<u32>,
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn path(&self) -> &str {
        &self.location.path
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "vegan")]
    Vegan,
    #[serde(rename = "vegetarian")]
    Vegetarian,
    #[serde(rename = "veg-friendly")]
    VegFriendly,
    #[serde(rename = "unknown")]
    Unknown,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Vegan => "vegan",
            Category::Vegetarian => "vegetarian",
            Category::VegFriendly => "veg-friendly",
            Category::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("venue has no source identifier")]
    MissingIdentifier,
    #[error("venue has no name")]
    MissingName,
    #[error("coordinates out of range: {lat},{lng}")]
    CoordinatesOutOfRange { lat: f64, lng: f64 },
    #[error("rating out of range: {0}")]
    RatingOutOfRange(f64),
}

/// Latitude/longitude pair, range-checked and rounded on construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> std::result::Result<Self, RecordError> {
        let in_range = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        if !in_range {
            return Err(RecordError::CoordinatesOutOfRange { lat: latitude, lng: longitude });
        }
        Ok(Self {
            latitude: round_to_precision(latitude),
            longitude: round_to_precision(longitude),
        })
    }
}

fn round_to_precision(value: f64) -> f64 {
    let factor = 10f64.powi(COORDINATE_PRECISION);
    (value * factor).round() / factor
}

/// Star rating bounded to 0..=5.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rating(f64);

impl Rating {
    pub fn new(value: f64) -> std::result::Result<Self, RecordError> {
        if value.is_finite() && (0.0..=MAX_RATING).contains(&value) {
            Ok(Self(value))
        } else {
            Err(RecordError::RatingOutOfRange(value))
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

/// One extracted, validated venue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VenueRecord {
    pub source_id: String,
    pub name: String,
    pub category: Category,
    pub address: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub rating: Option<Rating>,
    pub review_count: Option<u32>,
    pub tags: Vec<String>,
    pub price_range: Option<String>,
    pub is_new: bool,
    pub is_top_rated: bool,
    pub is_partner: bool,
    pub url: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub hours_status: Option<String>,
    pub location_path: String,
    pub page_number: u32,
    pub extracted_at: DateTime<Utc>,
}

impl VenueRecord {
    pub fn builder(location_path: impl Into<String>, page_number: u32) -> VenueRecordBuilder {
        VenueRecordBuilder::new(location_path, page_number)
    }
}

/// Collects fields for a `VenueRecord`; `build` enforces the record invariants.
#[derive(Debug, Clone)]
pub struct VenueRecordBuilder {
    source_id: Option<String>,
    name: Option<String>,
    category: Category,
    address: Option<String>,
    coordinates: Option<Coordinates>,
    rating: Option<Rating>,
    review_count: Option<u32>,
    tags: Vec<String>,
    price_range: Option<String>,
    is_new: bool,
    is_top_rated: bool,
    is_partner: bool,
    url: Option<String>,
    phone: Option<String>,
    website: Option<String>,
    hours_status: Option<String>,
    location_path: String,
    page_number: u32,
    extracted_at: Option<DateTime<Utc>>,
}

impl VenueRecordBuilder {
    pub fn new(location_path: impl Into<String>, page_number: u32) -> Self {
        Self {
            source_id: None,
            name: None,
            category: Category::Unknown,
            address: None,
            coordinates: None,
            rating: None,
            review_count: None,
            tags: Vec::new(),
            price_range: None,
            is_new: false,
            is_top_rated: false,
            is_partner: false,
            url: None,
            phone: None,
            website: None,
            hours_status: None,
            location_path: location_path.into(),
            page_number,
            extracted_at: None,
        }
    }

    pub fn source_id(mut self, id: Option<String>) -> Self {
        self.source_id = id;
        self
    }

    pub fn name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn address(mut self, address: Option<String>) -> Self {
        self.address = address;
        self
    }

    pub fn coordinates(mut self, coordinates: Option<Coordinates>) -> Self {
        self.coordinates = coordinates;
        self
    }

    pub fn rating(mut self, rating: Option<Rating>) -> Self {
        self.rating = rating;
        self
    }

    pub fn review_count(mut self, count: Option<u32>) -> Self {
        self.review_count = count;
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn price_range(mut self, price: Option<String>) -> Self {
        self.price_range = price;
        self
    }

    pub fn flags(mut self, is_new: bool, is_top_rated: bool, is_partner: bool) -> Self {
        self.is_new = is_new;
        self.is_top_rated = is_top_rated;
        self.is_partner = is_partner;
        self
    }

    pub fn url(mut self, url: Option<String>) -> Self {
        self.url = url;
        self
    }

    pub fn phone(mut self, phone: Option<String>) -> Self {
        self.phone = phone;
        self
    }

    pub fn website(mut self, website: Option<String>) -> Self {
        self.website = website;
        self
    }

    pub fn hours_status(mut self, hours: Option<String>) -> Self {
        self.hours_status = hours;
        self
    }

    pub fn extracted_at(mut self, at: DateTime<Utc>) -> Self {
        self.extracted_at = Some(at);
        self
    }

    pub fn build(self) -> std::result::Result<VenueRecord, RecordError> {
        let source_id = non_empty(self.source_id).ok_or(RecordError::MissingIdentifier)?;
        let name = non_empty(self.name).ok_or(RecordError::MissingName)?;

        Ok(VenueRecord {
            source_id,
            name,
            category: self.category,
            address: non_empty(self.address),
            coordinates: self.coordinates,
            rating: self.rating,
            review_count: self.review_count,
            tags: self.tags,
            price_range: non_empty(self.price_range),
            is_new: self.is_new,
            is_top_rated: self.is_top_rated,
            is_partner: self.is_partner,
            url: non_empty(self.url),
            phone: non_empty(self.phone),
            website: non_empty(self.website),
            hours_status: non_empty(self.hours_status),
            location_path: self.location_path,
            page_number: self.page_number,
            extracted_at: self.extracted_at.unwrap_or_else(Utc::now),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// One fetched page of a location's listing, before extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResult {
    pub page_number: u32,
    pub html: String,
    /// `Some` when the envelope carried a pagination object.
    pub has_next: Option<bool>,
    /// Venue entries matched on the page.
    pub entry_count: usize,
}
