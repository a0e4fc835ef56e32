use async_trait::async_trait;

/// Outbound HTTP seam for the fetch engine; `Err` carries a transport-level
/// failure (connect error, timeout) as text.
#[async_trait]
pub trait HttpClientPort: Send + Sync {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpGetResult, String>;
}

#[derive(Clone, Debug)]
pub struct HttpGetResult {
    pub status: u16,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl HttpGetResult {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait RateLimiterPort: Send + Sync {
    async fn acquire(&self);
}

/// No-op limiter for single requests and tests.
pub struct Unlimited;

#[async_trait]
impl RateLimiterPort for Unlimited {
    async fn acquire(&self) {}
}
