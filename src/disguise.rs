//! Request disguise: browser-like headers and human-looking pauses between
//! page requests, so crawl traffic resembles an ordinary visitor paging
//! through a listing.

use crate::config::DisguiseConfig;
use rand::seq::SliceRandom;
use rand::Rng;
use std::time::Duration;

/// Header/delay profile injected into the fetch engine.
pub trait DisguisePolicy: Send + Sync {
    /// Headers for one data-endpoint request.
    fn headers(&self) -> Vec<(String, String)>;

    /// Pause to observe before the next page request.
    fn delay(&self) -> Duration;
}

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0",
];

// The listing page issues these itself when it loads results over XHR.
const BASE_HEADERS: &[(&str, &str)] = &[
    ("Accept", "application/json, text/javascript, */*; q=0.01"),
    ("Accept-Language", "en-US,en;q=0.9"),
    ("X-Requested-With", "XMLHttpRequest"),
    ("Connection", "keep-alive"),
    ("Sec-Fetch-Dest", "empty"),
    ("Sec-Fetch-Mode", "cors"),
    ("Sec-Fetch-Site", "same-origin"),
    ("DNT", "1"),
];

const REFERERS: &[&str] = &[
    "https://www.google.com/",
    "https://www.google.com/search?q=vegan+restaurants",
    "https://www.facebook.com/",
];

/// Randomized desktop-browser profile.
#[derive(Debug, Clone)]
pub struct BrowserDisguise {
    config: DisguiseConfig,
    /// Listing page of the site, used as the referer most of the time.
    site_referer: String,
}

impl BrowserDisguise {
    pub fn new(config: DisguiseConfig, base_url: &str) -> Self {
        Self {
            config,
            site_referer: format!("{}/", base_url.trim_end_matches('/')),
        }
    }
}

impl DisguisePolicy for BrowserDisguise {
    fn headers(&self) -> Vec<(String, String)> {
        let mut rng = rand::thread_rng();
        let mut headers: Vec<(String, String)> = BASE_HEADERS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let agent = USER_AGENTS.choose(&mut rng).copied().unwrap_or(USER_AGENTS[0]);
        headers.push(("User-Agent".to_string(), agent.to_string()));

        if rng.gen_bool(self.config.referer_probability) {
            // Mostly the site itself; occasionally an outside page.
            let referer = if rng.gen_bool(0.8) {
                self.site_referer.clone()
            } else {
                REFERERS.choose(&mut rng).copied().unwrap_or(REFERERS[0]).to_string()
            };
            headers.push(("Referer".to_string(), referer));
        }
        headers
    }

    fn delay(&self) -> Duration {
        let mut rng = rand::thread_rng();
        let cfg = &self.config;
        let mut millis = rng.gen_range(cfg.min_delay_ms..=cfg.max_delay_ms);
        if rng.gen_bool(cfg.long_pause_probability) {
            millis += rng.gen_range(cfg.long_pause_min_ms..=cfg.long_pause_max_ms);
        }
        Duration::from_millis(millis)
    }
}

/// Fixed headers and a constant pause; used for tooling and tests.
#[derive(Debug, Clone, Default)]
pub struct FixedDisguise {
    pub headers: Vec<(String, String)>,
    pub delay: Duration,
}

impl DisguisePolicy for FixedDisguise {
    fn headers(&self) -> Vec<(String, String)> {
        self.headers.clone()
    }

    fn delay(&self) -> Duration {
        self.delay
    }
}
