use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Requests-per-minute token bucket shared by every worker in the process.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    requests_per_min: Option<u64>,
    // token bucket modeled by the current tokens and the time of last refill
    tokens: Mutex<(f64, Instant)>,
}

impl RateLimiter {
    pub fn new(requests_per_min: Option<u64>) -> Self {
        let capacity = requests_per_min.unwrap_or(0) as f64;
        Self {
            inner: Arc::new(Inner {
                requests_per_min,
                tokens: Mutex::new((capacity, Instant::now())),
            }),
        }
    }

    /// Wait until one request may be issued.
    pub async fn acquire(&self) {
        match self.inner.requests_per_min {
            Some(rpm) if rpm > 0 => self.consume_token(rpm as f64, 60.0).await,
            _ => {}
        }
    }

    async fn consume_token(&self, capacity: f64, period_secs: f64) {
        loop {
            let mut guard = self.inner.tokens.lock().await;
            let (ref mut tokens, ref mut last) = *guard;
            let now = Instant::now();
            let elapsed = now.duration_since(*last).as_secs_f64();
            let refill_rate = capacity / period_secs; // tokens per second
            *tokens = (*tokens + elapsed * refill_rate).min(capacity);
            *last = now;
            if *tokens >= 1.0 {
                *tokens -= 1.0;
                break;
            }
            let secs = (1.0 - *tokens) / refill_rate;
            drop(guard);
            tokio::time::sleep(Duration::from_secs_f64(secs.max(0.001))).await;
        }
    }
}
