mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use veg_crawler::server::{create_server, AppState};

fn app(h: &Harness) -> axum::Router {
    app_with_shutdown(h, CancellationToken::new())
}

fn app_with_shutdown(h: &Harness, shutdown: CancellationToken) -> axum::Router {
    create_server(AppState {
        coordinator: Arc::new(h.coordinator()),
        queue: h.queue.clone(),
        sink: h.sink.clone(),
        shutdown,
    })
}

async fn call(app: axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn health_reports_service_identity() {
    let h = Harness::new(3);
    let (status, body) = call(app(&h), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "veg-crawler");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn scrape_returns_a_run_report() {
    let h = Harness::new(3);
    h.seed(&["na/usa/tx/dallas"]).await;
    h.site.page("na/usa/tx/dallas", 1, envelope(&cards("d", 4)));

    let (status, body) = call(app(&h), "POST", "/scrape", Some(json!({"path": "/na/usa/tx/dallas/"}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["record_count"], 4);
    assert_eq!(body["terminal_state"], "completed");
    assert_eq!(body["item_state"], "completed");

    let (_, body) = call(app(&h), "GET", "/queue", None).await;
    assert_eq!(body[0]["location"]["path"], "na/usa/tx/dallas");
    assert_eq!(body[0]["stored_records"], 4);
}

#[tokio::test]
async fn scrape_accepts_the_orchestrator_body() {
    let h = Harness::new(3);
    h.seed(&["na/usa/tx/austin", "na/usa/tx/waco"]).await;
    h.site.page("na/usa/tx/austin", 1, envelope(&cards("a", 2)));
    h.site.page("na/usa/tx/waco", 1, envelope(&cards("w", 3)));

    let by_url = json!({"url": format!("{BASE_URL}/na/usa/tx/austin/"), "city": "Austin", "state": "Texas"});
    let (status, body) = call(app(&h), "POST", "/scrape", Some(by_url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true, "{body}");
    assert_eq!(body["location_path"], "na/usa/tx/austin");
    assert_eq!(body["record_count"], 2);

    let by_full_path = json!({"url": "ignored", "full_path": "na/usa/tx/waco", "city": "Waco", "state": "Texas"});
    let (_, body) = call(app(&h), "POST", "/scrape", Some(by_full_path)).await;
    assert_eq!(body["success"], true, "{body}");
    assert_eq!(body["location_path"], "na/usa/tx/waco");

    let foreign = json!({"url": "https://elsewhere.example/na/usa/tx/austin"});
    let (status, body) = call(app(&h), "POST", "/scrape", Some(foreign)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn scrape_during_shutdown_leaves_the_item_in_error() {
    let h = Harness::new(3);
    h.seed(&["na/usa/tx/dallas"]).await;
    h.site.page("na/usa/tx/dallas", 1, envelope(&cards("d", 4)));
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let (status, body) =
        call(app_with_shutdown(&h, shutdown), "POST", "/scrape", Some(json!({"path": "na/usa/tx/dallas"}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["terminal_state"], "cancelled");
    assert_eq!(body["item_state"], "error");
    assert!(body["error"].as_str().unwrap().starts_with("cancelled"));
    assert!(h.site.hits().is_empty());
}

#[tokio::test]
async fn scrape_failures_still_answer_200() {
    let h = Harness::new(3);
    let (status, body) = call(app(&h), "POST", "/scrape", Some(json!({"path": "a||b"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert!(body["error"].is_string());

    let (status, body) = call(app(&h), "POST", "/scrape", Some(json!({"nope": 1}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn queue_admin_round_trip() {
    let h = Harness::new(3);
    let seeds = json!([
        {"name": "Dallas", "region": "Texas", "path": "na/usa/tx/dallas", "url": "https://x/dallas", "entries": 640},
        {"name": "Waco", "region": "Texas", "path": "na/usa/tx/waco", "entries": 12},
        {"name": "Broken", "path": ""}
    ]);
    let (status, body) = call(app(&h), "POST", "/queue/locations", Some(seeds)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["inserted"], 2);
    assert_eq!(body["rejected"].as_array().unwrap().len(), 1);

    let (status, body) = call(
        app(&h),
        "POST",
        "/queue/status",
        Some(json!({"path": "na/usa/tx/waco", "action": "pending"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], true);
    assert_eq!(body["state"], "pending");

    let (_, body) = call(app(&h), "GET", "/queue?status=pending", None).await;
    let items = body.as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["location"]["path"], "na/usa/tx/waco");

    let (_, body) = call(app(&h), "GET", "/queue", None).await;
    assert_eq!(body[0]["location"]["priority"], "high");

    let (_, body) = call(app(&h), "GET", "/queue/stats", None).await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["by_state"]["ready"], 1);

    let (_, body) = call(app(&h), "POST", "/queue/requeue", None).await;
    assert_eq!(body["requeued"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn queue_admin_rejects_bad_input() {
    let h = Harness::new(3);
    let (status, _) = call(app(&h), "GET", "/queue?status=sleeping", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(app(&h), "POST", "/queue/status", Some(json!({"path": "a/b", "action": "delete"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(app(&h), "POST", "/queue/status", Some(json!({"path": "a/b", "action": "skip"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
