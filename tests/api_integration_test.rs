/// Integration tests for the HTTP serving layer

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use civic_priority::{
    api::{build_router, AppState},
    ml::{ArtifactStore, PredictionService},
};
use common::trained_root;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

fn app(store: ArtifactStore, model_name: &str) -> Router {
    let service = PredictionService::new(store, model_name, "High");
    build_router(AppState::new(Arc::new(service)))
}

async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(body.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn test_health_reports_model() {
    let dir = TempDir::new().unwrap();
    let (status, body) = send(app(ArtifactStore::new(dir.path()), "xgb_model"), "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["model"], "xgb_model");
}

#[tokio::test]
async fn test_predict_single_issue() {
    let (_dir, store, _summary) = trained_root();

    let (status, body) = send(
        app(store, "random_forest"),
        "POST",
        "/predict",
        Some(json!({
            "short_description": "gas leak near school",
            "category": "Safety",
            "location": "Downtown",
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["model_used"], "random_forest");
    assert!(["Low", "Medium", "High"].contains(&body["prediction"].as_str().unwrap()));
    assert_eq!(body["class_probabilities"].as_object().unwrap().len(), 3);
}

#[tokio::test]
async fn test_predict_batch_preserves_order() {
    let (_dir, store, _summary) = trained_root();

    let (status, body) = send(
        app(store, "logistic_regression"),
        "POST",
        "/predict/batch",
        Some(json!([
            {"short_description": "gas leak near school", "category": "Safety", "location": "Downtown"},
            {"short_description": "graffiti on park bench", "category": "Parks", "location": "Residential"},
        ])),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let outcomes = body.as_array().unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0]["prediction"], "High");
    assert_eq!(outcomes[1]["prediction"], "Low");
}

#[tokio::test]
async fn test_rank_puts_high_first() {
    let (_dir, store, _summary) = trained_root();

    let (status, body) = send(
        app(store, "random_forest"),
        "POST",
        "/rank",
        Some(json!([
            {"short_description": "overgrown grass verge", "category": "Parks", "location": "Northside"},
            {"short_description": "bridge crack collapse risk", "category": "Safety", "location": "Central"},
            {"short_description": "traffic signal blinking", "category": "Traffic", "location": "Eastside", "reporter": "anon"},
        ])),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let ranked = body.as_array().unwrap();
    assert_eq!(ranked.len(), 3);
    assert_eq!(ranked[0]["input"]["category"], "Safety");
    assert!(ranked[2]["input"].get("reporter").is_none());

    let high: Vec<f64> = ranked
        .iter()
        .map(|r| r["class_probabilities"]["High"].as_f64().unwrap_or(0.0))
        .collect();
    assert!(high.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test]
async fn test_missing_field_is_bad_request() {
    let (_dir, store, _summary) = trained_root();

    let (status, body) = send(
        app(store, "random_forest"),
        "POST",
        "/predict",
        Some(json!({"short_description": "pothole", "category": "Roads"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "MISSING_COLUMN");
}

#[tokio::test]
async fn test_empty_batch_is_bad_request() {
    let (_dir, store, _summary) = trained_root();

    let (status, body) = send(app(store, "random_forest"), "POST", "/rank", Some(json!([]))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_untrained_root_is_service_unavailable() {
    let dir = TempDir::new().unwrap();

    let (status, body) = send(
        app(ArtifactStore::new(dir.path()), "random_forest"),
        "POST",
        "/predict",
        Some(json!({
            "short_description": "pothole",
            "category": "Roads",
            "location": "Suburb",
        })),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "ARTIFACT_NOT_FOUND");
}

#[tokio::test]
async fn test_health_reports_degraded_decoder() {
    let (_dir, store, _summary) = trained_root();
    std::fs::remove_file(store.layout().label_encoder_path()).unwrap();

    let service = Arc::new(PredictionService::new(store, "random_forest", "High"));
    service.warm_up().unwrap();
    let router = build_router(AppState::new(service));

    let (status, body) = send(router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["loaded"], true);
    assert_eq!(body["degraded"], true);
}
