use crate::constants::SERVICE_NAME;
use crate::error::ScraperError;
use crate::fetch::endpoint::location_path_from_url;
use crate::pipeline::{Coordinator, RunReport};
use crate::queue::{AdminAction, CrawlQueue};
use crate::storage::RecordSink;
use crate::types::{normalize_path, Location, LocationSeed, WorkItem, WorkState};
use axum::{
    body::Bytes,
    extract::Query,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Extension, Router,
};
use hyper::Server;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub queue: CrawlQueue,
    pub sink: Arc<dyn RecordSink>,
    /// Cancelled on shutdown; in-flight runs end and record `error`.
    pub shutdown: CancellationToken,
}

/// Trigger body. The orchestrator sends `{url, full_path, city, state}`;
/// `path` or `full_path` wins, otherwise the path comes from `url`.
#[derive(Debug, Default, Deserialize)]
pub struct ScrapeRequest {
    #[serde(default, alias = "full_path")]
    pub path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

impl ScrapeRequest {
    /// What the caller asked for, for reports on rejected requests.
    fn label(&self) -> String {
        self.path.clone().or_else(|| self.url.clone()).unwrap_or_default()
    }

    fn location_path(&self, base_url: &str) -> Result<String, String> {
        if let Some(path) = self.path.as_deref().filter(|p| !p.trim().is_empty()) {
            return normalize_path(path).map_err(|e| e.to_string());
        }
        let url = self
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| "missing path, full_path or url".to_string())?;
        let path = location_path_from_url(base_url, url)
            .ok_or_else(|| format!("could not derive a location path from url '{url}'"))?;
        normalize_path(&path).map_err(|e| e.to_string())
    }
}

#[derive(Debug, Deserialize)]
pub struct QueueListParams {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub path: String,
    pub action: String,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    path: String,
    action: String,
    applied: bool,
    state: Option<WorkState>,
}

/// Queue row plus how many records are stored for its location.
#[derive(Debug, Serialize)]
struct QueueEntry {
    #[serde(flatten)]
    item: WorkItem,
    stored_records: usize,
}

#[derive(Debug, Serialize)]
struct RejectedSeed {
    path: String,
    error: String,
}

#[derive(Debug, Serialize)]
struct LoadResponse {
    inserted: usize,
    updated: usize,
    rejected: Vec<RejectedSeed>,
}

/// JSON error body with a status code derived from the error kind.
struct ApiError(ScraperError);

impl From<ScraperError> for ApiError {
    fn from(e: ScraperError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ScraperError::UnknownLocation(_) => StatusCode::NOT_FOUND,
            ScraperError::InvalidLocation { .. } | ScraperError::InvalidState(_) | ScraperError::Json(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %self.0, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Trigger a crawl of one location. Always 200; failures are in the report.
async fn scrape(Extension(state): Extension<AppState>, body: Bytes) -> Json<RunReport> {
    let request: ScrapeRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return Json(RunReport::rejected("", format!("invalid request body: {e}"))),
    };
    let path = match request.location_path(state.coordinator.base_url()) {
        Ok(path) => path,
        Err(e) => return Json(RunReport::rejected(request.label(), e)),
    };
    info!(
        path = %path,
        city = request.city.as_deref().unwrap_or(""),
        state = request.state.as_deref().unwrap_or(""),
        "scrape requested"
    );
    Json(state.coordinator.trigger(&path, &state.shutdown).await)
}

async fn list_queue(
    Extension(state): Extension<AppState>,
    Query(params): Query<QueueListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = match params.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => Some(s.parse::<WorkState>()?),
        None => None,
    };
    let items = state.queue.list(filter).await?;
    let mut entries = Vec::with_capacity(items.len());
    for item in items {
        let stored_records = state.sink.count_for_location(item.path()).await?;
        entries.push(QueueEntry { item, stored_records });
    }
    Ok(Json(entries))
}

async fn set_status(
    Extension(state): Extension<AppState>,
    Json(req): Json<StatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let action: AdminAction = req.action.parse()?;
    let path = normalize_path(&req.path)?;
    let applied = state.queue.set_status(&path, action).await?;
    let current = state.queue.get(&path).await?.map(|item| item.state);
    Ok(Json(StatusResponse { path, action: req.action, applied, state: current }))
}

async fn load_locations(
    Extension(state): Extension<AppState>,
    Json(seeds): Json<Vec<LocationSeed>>,
) -> Result<impl IntoResponse, ApiError> {
    let mut locations: Vec<Location> = Vec::with_capacity(seeds.len());
    let mut rejected = Vec::new();
    for seed in seeds {
        let path = seed.path.clone();
        match Location::try_from(seed) {
            Ok(location) => locations.push(location),
            Err(e) => rejected.push(RejectedSeed { path, error: e.to_string() }),
        }
    }
    let summary = state.queue.upsert_locations(&locations).await?;
    Ok(Json(LoadResponse { inserted: summary.inserted, updated: summary.updated, rejected }))
}

async fn queue_stats(Extension(state): Extension<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.queue.stats().await?))
}

async fn requeue_failed(Extension(state): Extension<AppState>) -> Result<impl IntoResponse, ApiError> {
    let requeued = state.queue.requeue_failed().await?;
    Ok(Json(serde_json::json!({ "requeued": requeued })))
}

async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::metrics::render(),
    )
}

/// Create the HTTP server with all routes
pub fn create_server(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/scrape", post(scrape))
        .route("/queue", get(list_queue))
        .route("/queue/status", post(set_status))
        .route("/queue/locations", post(load_locations))
        .route("/queue/stats", get(queue_stats))
        .route("/queue/requeue", post(requeue_failed))
        .route("/metrics", get(metrics))
        .layer(Extension(state))
        .layer(ServiceBuilder::new().layer(cors))
}

/// Start the HTTP server on the specified port. Cancelling `state.shutdown`
/// stops accepting connections and waits for in-flight runs to record their
/// cancellation.
pub async fn start_server(state: AppState, port: u16) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = create_server(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    println!("🚀 HTTP server running on http://localhost:{port}");
    println!("💚 Health check: http://localhost:{port}/health");
    println!("🕷️  Trigger:      POST http://localhost:{port}/scrape");

    Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("HTTP server stopped");
    Ok(())
}
