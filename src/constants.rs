/// Data endpoint and wire-format constants shared across the crawler.

/// Path of the venue listing data endpoint, relative to the site base URL.
pub const VENUES_ENDPOINT_PATH: &str = "/ajax/views/city/venues";

/// Separator used in location paths (`north_america/usa/texas/dallas`).
pub const PATH_SEPARATOR: char = '/';

/// Delimiter the data endpoint expects in place of `PATH_SEPARATOR`.
pub const ENDPOINT_PATH_DELIMITER: char = '|';

/// Query parameter carrying the page number for pages beyond the first.
pub const PAGE_QUERY_PARAM: &str = "page";

/// Decimal places kept for latitude/longitude.
pub const COORDINATE_PRECISION: i32 = 6;

pub const MAX_RATING: f64 = 5.0;

/// Entry-count cut-offs for the priority tiers.
pub const HIGH_PRIORITY_MIN_ENTRIES: u32 = 500;
pub const MEDIUM_PRIORITY_MIN_ENTRIES: u32 = 100;

pub const SERVICE_NAME: &str = "veg-crawler";
