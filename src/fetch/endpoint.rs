use crate::constants::{ENDPOINT_PATH_DELIMITER, PAGE_QUERY_PARAM, PATH_SEPARATOR, VENUES_ENDPOINT_PATH};

/// Data endpoint URL for one page of a location's listing.
///
/// The endpoint addresses locations with `|` in place of `/`, percent-encoded
/// as a single path segment. Page 1 carries no page parameter.
pub fn endpoint_url(base_url: &str, location_path: &str, page: u32) -> String {
    let delimited = location_path.replace(PATH_SEPARATOR, &ENDPOINT_PATH_DELIMITER.to_string());
    let mut url = format!(
        "{}{}/{}",
        base_url.trim_end_matches('/'),
        VENUES_ENDPOINT_PATH,
        urlencoding::encode(&delimited)
    );
    if page > 1 {
        url.push_str(&format!("?{PAGE_QUERY_PARAM}={page}"));
    }
    url
}

/// Location path addressed by a listing URL, e.g.
/// `https://www.happycow.net/north_america/usa/texas/dallas/` gives
/// `north_america/usa/texas/dallas`. A value without a scheme is taken as a
/// path already; a URL on another site gives `None`.
pub fn location_path_from_url(base_url: &str, url: &str) -> Option<String> {
    let url = url.trim();
    let base = base_url.trim_end_matches('/');
    let rest = match url.strip_prefix(base) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ if url.contains("://") => return None,
        _ => url,
    };
    let rest = rest.split(['?', '#']).next().unwrap_or_default();
    let decoded = urlencoding::decode(rest).ok()?;
    let path = decoded.replace(ENDPOINT_PATH_DELIMITER, &PATH_SEPARATOR.to_string());
    let path = path.trim_matches(PATH_SEPARATOR);
    (!path.is_empty()).then(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_page_has_no_page_parameter() {
        assert_eq!(
            endpoint_url("https://www.happycow.net", "north_america/usa/texas/dallas", 1),
            "https://www.happycow.net/ajax/views/city/venues/north_america%7Cusa%7Ctexas%7Cdallas"
        );
    }

    #[test]
    fn later_pages_carry_page_number() {
        assert_eq!(
            endpoint_url("https://www.happycow.net/", "europe/germany/berlin", 3),
            "https://www.happycow.net/ajax/views/city/venues/europe%7Cgermany%7Cberlin?page=3"
        );
    }

    #[test]
    fn non_ascii_segments_are_encoded() {
        let url = endpoint_url("http://localhost", "europe/germany/münchen", 1);
        assert!(url.ends_with("europe%7Cgermany%7Cm%C3%BCnchen"));
    }

    #[test]
    fn listing_urls_map_back_to_location_paths() {
        let base = "https://www.happycow.net";
        assert_eq!(
            location_path_from_url(base, "https://www.happycow.net/north_america/usa/texas/dallas/").as_deref(),
            Some("north_america/usa/texas/dallas")
        );
        assert_eq!(
            location_path_from_url(base, "https://www.happycow.net/europe/germany/berlin?filter=vegan").as_deref(),
            Some("europe/germany/berlin")
        );
        assert_eq!(
            location_path_from_url(base, "north_america%7Cusa%7Ctexas%7Cwaco").as_deref(),
            Some("north_america/usa/texas/waco")
        );
    }

    #[test]
    fn foreign_or_bare_urls_give_no_path() {
        let base = "https://www.happycow.net";
        assert_eq!(location_path_from_url(base, "https://example.org/europe/germany"), None);
        assert_eq!(location_path_from_url(base, "https://www.happycow.network/a/b"), None);
        assert_eq!(location_path_from_url(base, "https://www.happycow.net/"), None);
    }
}
