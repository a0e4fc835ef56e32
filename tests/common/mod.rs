#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use veg_crawler::app::ports::{HttpClientPort, HttpGetResult, Unlimited};
use veg_crawler::config::CrawlerConfig;
use veg_crawler::disguise::FixedDisguise;
use veg_crawler::fetch::endpoint::endpoint_url;
use veg_crawler::fetch::FetchEngine;
use veg_crawler::pipeline::Coordinator;
use veg_crawler::queue::{CrawlQueue, SqliteQueueStore};
use veg_crawler::storage::SqliteRecordSink;
use veg_crawler::types::Location;

pub const BASE_URL: &str = "http://listing.test";

/// Fake endpoint: canned responses per URL, replayed in order.
#[derive(Default)]
pub struct FakeSite {
    routes: Mutex<HashMap<String, VecDeque<Result<HttpGetResult, String>>>>,
    hits: Mutex<Vec<String>>,
}

impl FakeSite {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn page(&self, path: &str, page: u32, response: Result<HttpGetResult, String>) {
        let url = endpoint_url(BASE_URL, path, page);
        self.routes.lock().unwrap().entry(url).or_default().push_back(response);
    }

    pub fn hits(&self) -> Vec<String> {
        self.hits.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClientPort for FakeSite {
    async fn get(&self, url: &str, _headers: &[(String, String)]) -> Result<HttpGetResult, String> {
        self.hits.lock().unwrap().push(url.to_string());
        self.routes
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|q| q.pop_front())
            .unwrap_or(Ok(HttpGetResult { status: 404, bytes: vec![], content_type: "text/html".into() }))
    }
}

pub fn json_response(body: Value) -> Result<HttpGetResult, String> {
    Ok(HttpGetResult {
        status: 200,
        bytes: body.to_string().into_bytes(),
        content_type: "application/json".into(),
    })
}

pub fn envelope(html: &str) -> Result<HttpGetResult, String> {
    json_response(json!({"success": true, "data": {"data": html}}))
}

pub fn card(id: &str, name: &str) -> String {
    format!(
        r#"<div class="venue-list-item card-listing" data-id="{id}" data-type="vegan">
             <h2 data-analytics="listing-card-title">{name}</h2>
             <a href="https://www.google.com/maps?q=32.7767,-96.7970">Map</a>
           </div>"#
    )
}

pub fn cards(prefix: &str, n: usize) -> String {
    (0..n).map(|i| card(&format!("{prefix}{i}"), &format!("Venue {prefix}{i}"))).collect()
}

pub fn crawler_config() -> CrawlerConfig {
    CrawlerConfig {
        base_url: BASE_URL.to_string(),
        max_pages: 5,
        full_page_threshold: 10,
        request_timeout_secs: 5,
    }
}

pub fn location(path: &str, entries: u32) -> Location {
    let name = path.rsplit('/').next().unwrap_or(path);
    Location::new(name, "Test Region", path, format!("{BASE_URL}/{path}"), entries).unwrap()
}

/// Queue, record sink and coordinator over one temporary database.
pub struct Harness {
    pub dir: TempDir,
    pub queue: CrawlQueue,
    pub sink: Arc<SqliteRecordSink>,
    pub site: Arc<FakeSite>,
}

impl Harness {
    pub fn new(max_retries: u32) -> Self {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("crawl.db");
        let queue = CrawlQueue::new(Arc::new(SqliteQueueStore::open(&db).unwrap()), max_retries);
        let sink = Arc::new(SqliteRecordSink::open(&db).unwrap());
        Self { dir, queue, sink, site: FakeSite::new() }
    }

    pub fn fetcher(&self) -> FetchEngine {
        FetchEngine::new(
            self.site.clone(),
            Arc::new(Unlimited),
            Arc::new(FixedDisguise::default()),
            &crawler_config(),
        )
    }

    pub fn coordinator(&self) -> Coordinator {
        Coordinator::new(self.queue.clone(), self.fetcher(), self.sink.clone())
    }

    pub async fn seed(&self, paths: &[&str]) {
        let locations: Vec<Location> = paths.iter().map(|p| location(p, 120)).collect();
        self.queue.upsert_locations(&locations).await.unwrap();
    }
}
