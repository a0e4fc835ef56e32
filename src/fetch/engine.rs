use crate::app::ports::{HttpClientPort, RateLimiterPort};
use crate::config::CrawlerConfig;
use crate::disguise::DisguisePolicy;
use crate::fetch::endpoint::endpoint_url;
use crate::fetch::envelope::AjaxEnvelope;
use crate::metrics::CrawlMetrics;
use crate::parser::Extractor;
use crate::types::PageResult;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// How a fetch sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    /// Last page reached or page limit hit.
    Completed,
    /// A page came back valid but without venue entries.
    Exhausted,
    /// A page could not be fetched or decoded; no later page was attempted.
    Failed,
    /// The cancellation token fired between pages.
    Cancelled,
}

/// Pages fetched in order, plus the terminal status.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub pages: Vec<PageResult>,
    pub status: FetchStatus,
    pub error: Option<String>,
}

impl FetchOutcome {
    fn end(pages: Vec<PageResult>, status: FetchStatus, error: Option<String>) -> Self {
        Self { pages, status, error }
    }
}

/// Walks a location's listing page by page through the data endpoint.
pub struct FetchEngine {
    http: Arc<dyn HttpClientPort>,
    limiter: Arc<dyn RateLimiterPort>,
    disguise: Arc<dyn DisguisePolicy>,
    extractor: Extractor,
    base_url: String,
    max_pages: u32,
    full_page_threshold: usize,
}

impl FetchEngine {
    pub fn new(
        http: Arc<dyn HttpClientPort>,
        limiter: Arc<dyn RateLimiterPort>,
        disguise: Arc<dyn DisguisePolicy>,
        config: &CrawlerConfig,
    ) -> Self {
        Self {
            http,
            limiter,
            disguise,
            extractor: Extractor::new(),
            base_url: config.base_url.clone(),
            max_pages: config.max_pages,
            full_page_threshold: config.full_page_threshold,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[instrument(skip(self, cancel), fields(max_pages = self.max_pages))]
    pub async fn fetch_all(&self, location_path: &str, cancel: &CancellationToken) -> FetchOutcome {
        let mut pages: Vec<PageResult> = Vec::new();

        for page_number in 1..=self.max_pages {
            if cancel.is_cancelled() {
                return FetchOutcome::end(pages, FetchStatus::Cancelled, Some(format!("before page {page_number}")));
            }

            if page_number > 1 {
                let delay = self.disguise.delay();
                debug!(page = page_number, delay_ms = delay.as_millis() as u64, "pausing before next page");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return FetchOutcome::end(pages, FetchStatus::Cancelled, Some(format!("while waiting for page {page_number}")));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return FetchOutcome::end(pages, FetchStatus::Cancelled, Some(format!("while rate limited before page {page_number}")));
                }
                _ = self.limiter.acquire() => {}
            }

            let page = match self.fetch_page(location_path, page_number).await {
                Ok(page) => page,
                Err(e) => {
                    CrawlMetrics::record_page_failure();
                    warn!(page = page_number, error = %e, "page fetch failed");
                    return FetchOutcome::end(pages, FetchStatus::Failed, Some(format!("page {page_number}: {e}")));
                }
            };
            CrawlMetrics::record_page_fetched();

            if page.entry_count == 0 {
                info!(page = page_number, "page has no venue entries, listing exhausted");
                return FetchOutcome::end(pages, FetchStatus::Exhausted, None);
            }

            let last = !self.has_successor(&page);
            debug!(page = page_number, entries = page.entry_count, has_next = ?page.has_next, last, "fetched page");
            pages.push(page);
            if last {
                return FetchOutcome::end(pages, FetchStatus::Completed, None);
            }
        }

        info!(max_pages = self.max_pages, "page limit reached");
        FetchOutcome::end(pages, FetchStatus::Completed, None)
    }

    /// An explicit `paginated.next` token wins; without one a full page is
    /// assumed to have a successor.
    fn has_successor(&self, page: &PageResult) -> bool {
        match page.has_next {
            Some(next) => next,
            None => page.entry_count >= self.full_page_threshold,
        }
    }

    async fn fetch_page(&self, location_path: &str, page_number: u32) -> Result<PageResult, String> {
        let url = endpoint_url(&self.base_url, location_path, page_number);
        let headers = self.disguise.headers();
        let resp = self.http.get(&url, &headers).await?;
        if !resp.is_success() {
            return Err(format!("HTTP {} from {}", resp.status, url));
        }
        let envelope = AjaxEnvelope::parse(&resp.bytes).map_err(|e| e.to_string())?;
        let entry_count = if envelope.html.trim().is_empty() {
            0
        } else {
            self.extractor.count_entries(&envelope.html)
        };
        Ok(PageResult {
            page_number,
            html: envelope.html,
            has_next: envelope.has_next,
            entry_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::{HttpGetResult, Unlimited};
    use crate::disguise::FixedDisguise;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays canned responses in order and records requested URLs.
    struct ScriptedHttp {
        responses: Mutex<Vec<std::result::Result<HttpGetResult, String>>>,
        urls: Mutex<Vec<String>>,
    }

    impl ScriptedHttp {
        fn new(responses: Vec<std::result::Result<HttpGetResult, String>>) -> Arc<Self> {
            let mut responses = responses;
            responses.reverse();
            Arc::new(Self { responses: Mutex::new(responses), urls: Mutex::new(Vec::new()) })
        }

        fn urls(&self) -> Vec<String> {
            self.urls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpClientPort for ScriptedHttp {
        async fn get(&self, url: &str, _headers: &[(String, String)]) -> std::result::Result<HttpGetResult, String> {
            self.urls.lock().unwrap().push(url.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err("no scripted response left".to_string()))
        }
    }

    fn ok(body: Value) -> std::result::Result<HttpGetResult, String> {
        Ok(HttpGetResult { status: 200, bytes: body.to_string().into_bytes(), content_type: "application/json".into() })
    }

    fn entries(n: usize) -> String {
        (0..n)
            .map(|i| format!(r#"<div class="venue-list-item card-listing" data-id="{i}"><h2 data-analytics="listing-card-title">V{i}</h2></div>"#))
            .collect()
    }

    fn page(n: usize) -> std::result::Result<HttpGetResult, String> {
        ok(json!({"success": true, "data": {"data": entries(n)}}))
    }

    fn engine(http: Arc<ScriptedHttp>, max_pages: u32, threshold: usize) -> FetchEngine {
        let config = CrawlerConfig {
            base_url: "http://test.local".into(),
            max_pages,
            full_page_threshold: threshold,
            request_timeout_secs: 5,
        };
        FetchEngine::new(http, Arc::new(Unlimited), Arc::new(FixedDisguise::default()), &config)
    }

    #[tokio::test]
    async fn short_page_is_the_last_page() {
        let http = ScriptedHttp::new(vec![page(10), page(9)]);
        let out = engine(http.clone(), 20, 10).fetch_all("a/b", &CancellationToken::new()).await;
        assert_eq!(out.status, FetchStatus::Completed);
        assert_eq!(out.pages.len(), 2);
        assert_eq!(
            http.urls(),
            vec![
                "http://test.local/ajax/views/city/venues/a%7Cb".to_string(),
                "http://test.local/ajax/views/city/venues/a%7Cb?page=2".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn next_token_overrides_entry_count() {
        let http = ScriptedHttp::new(vec![
            ok(json!({"success": true, "data": {"data": entries(3), "paginated": {"next": 2}}})),
            ok(json!({"success": true, "data": {"data": entries(12), "paginated": {"next": null}}})),
        ]);
        let out = engine(http.clone(), 20, 10).fetch_all("a/b", &CancellationToken::new()).await;
        assert_eq!(out.status, FetchStatus::Completed);
        assert_eq!(out.pages.len(), 2);
        assert_eq!(http.urls().len(), 2);
    }

    #[tokio::test]
    async fn empty_page_exhausts_listing() {
        let http = ScriptedHttp::new(vec![page(10), ok(json!({"success": true, "data": {"data": ""}}))]);
        let out = engine(http, 20, 10).fetch_all("a/b", &CancellationToken::new()).await;
        assert_eq!(out.status, FetchStatus::Exhausted);
        assert_eq!(out.pages.len(), 1);
        assert!(out.error.is_none());
    }

    #[tokio::test]
    async fn failure_keeps_earlier_pages_and_stops() {
        let http = ScriptedHttp::new(vec![page(10), ok(json!({"success": false})), page(10)]);
        let out = engine(http.clone(), 20, 10).fetch_all("a/b", &CancellationToken::new()).await;
        assert_eq!(out.status, FetchStatus::Failed);
        assert_eq!(out.pages.len(), 1);
        assert!(out.error.unwrap().starts_with("page 2"));
        assert_eq!(http.urls().len(), 2);
    }

    #[tokio::test]
    async fn http_error_and_transport_error_fail() {
        let http = ScriptedHttp::new(vec![Ok(HttpGetResult { status: 503, bytes: vec![], content_type: "text/html".into() })]);
        let out = engine(http, 20, 10).fetch_all("a/b", &CancellationToken::new()).await;
        assert_eq!(out.status, FetchStatus::Failed);
        assert!(out.error.unwrap().contains("HTTP 503"));

        let http = ScriptedHttp::new(vec![Err("request timed out".into())]);
        let out = engine(http, 20, 10).fetch_all("a/b", &CancellationToken::new()).await;
        assert_eq!(out.status, FetchStatus::Failed);
        assert!(out.pages.is_empty());
    }

    #[tokio::test]
    async fn page_limit_ends_with_completed() {
        let http = ScriptedHttp::new(vec![page(10), page(10), page(10)]);
        let out = engine(http.clone(), 2, 10).fetch_all("a/b", &CancellationToken::new()).await;
        assert_eq!(out.status, FetchStatus::Completed);
        assert_eq!(out.pages.len(), 2);
        assert_eq!(http.urls().len(), 2);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_inter_page_delay() {
        let http = ScriptedHttp::new(vec![page(10), page(10)]);
        let config = CrawlerConfig { base_url: "http://test.local".into(), ..CrawlerConfig::default() };
        let disguise = FixedDisguise { headers: vec![], delay: Duration::from_secs(60) };
        let engine = FetchEngine::new(http.clone(), Arc::new(Unlimited), Arc::new(disguise), &config);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let out = tokio::time::timeout(Duration::from_secs(5), engine.fetch_all("a/b", &cancel))
            .await
            .expect("cancellation should cut the delay short");
        assert_eq!(out.status, FetchStatus::Cancelled);
        assert_eq!(out.pages.len(), 1);
        assert_eq!(http.urls().len(), 1);
    }
}
