use crate::error::{Result, ScraperError};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Default location of the config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub crawler: CrawlerConfig,
    pub disguise: DisguiseConfig,
    pub rate_limit: RateLimitConfig,
    pub queue: QueueConfig,
    pub workers: WorkersConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    pub base_url: String,
    pub max_pages: u32,
    /// A page with at least this many entries may have a successor.
    pub full_page_threshold: usize,
    pub request_timeout_secs: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.happycow.net".to_string(),
            max_pages: 20,
            full_page_threshold: 10,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DisguiseConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Chance of an extra "reading the page" pause on top of the base delay.
    pub long_pause_probability: f64,
    pub long_pause_min_ms: u64,
    pub long_pause_max_ms: u64,
    pub referer_probability: f64,
}

impl Default for DisguiseConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 3_000,
            max_delay_ms: 8_000,
            long_pause_probability: 0.1,
            long_pause_min_ms: 5_000,
            long_pause_max_ms: 15_000,
            referer_probability: 0.7,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Shared across all workers of one process. `None` disables the bucket.
    pub requests_per_min: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub database_path: String,
    pub max_retries: u32,
    /// Lease on a `running` item; runs refresh it with heartbeats, and only
    /// items silent for longer are released at worker startup.
    pub stale_after_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            database_path: "data/crawl_queue.db".to_string(),
            max_retries: 3,
            stale_after_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub count: usize,
    pub poll_interval_ms: u64,
    pub auto_requeue: bool,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: 2,
            poll_interval_ms: 5_000,
            auto_requeue: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

impl Config {
    /// Load `config.toml` (or `VEG_CRAWLER_CONFIG`), then apply env overrides.
    /// A missing file is not an error; every field has a default.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("VEG_CRAWLER_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = if Path::new(&config_path).exists() {
            Self::from_file(&config_path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(config_path: &str) -> Result<Self> {
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            ScraperError::Config(format!("Failed to read config file '{}': {}", config_path, e))
        })?;
        Self::from_toml_str(&config_content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| ScraperError::Config(format!("PORT is not a valid port: {port}")))?;
        }
        if let Ok(db) = std::env::var("VEG_CRAWLER_DB") {
            if !db.trim().is_empty() {
                self.queue.database_path = db;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.crawler.max_pages == 0 {
            return Err(ScraperError::Config("crawler.max_pages must be at least 1".into()));
        }
        if self.crawler.full_page_threshold == 0 {
            return Err(ScraperError::Config(
                "crawler.full_page_threshold must be at least 1".into(),
            ));
        }
        if self.disguise.min_delay_ms > self.disguise.max_delay_ms {
            return Err(ScraperError::Config(
                "disguise.min_delay_ms must not exceed disguise.max_delay_ms".into(),
            ));
        }
        if self.disguise.long_pause_min_ms > self.disguise.long_pause_max_ms {
            return Err(ScraperError::Config(
                "disguise.long_pause_min_ms must not exceed disguise.long_pause_max_ms".into(),
            ));
        }
        for (name, p) in [
            ("long_pause_probability", self.disguise.long_pause_probability),
            ("referer_probability", self.disguise.referer_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(ScraperError::Config(format!("disguise.{name} must be within 0..=1")));
            }
        }
        if self.queue.stale_after_secs == 0 {
            return Err(ScraperError::Config("queue.stale_after_secs must be at least 1".into()));
        }
        if self.workers.count == 0 {
            return Err(ScraperError::Config("workers.count must be at least 1".into()));
        }
        Ok(())
    }
}
