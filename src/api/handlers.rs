use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::ml::{HealthResponse, PredictionOutcome, PredictionService, RankedPrediction};
use crate::models::InputRecord;
use axum::{extract::State, Json};
use std::sync::Arc;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    Ok(Json(state.service.health()))
}

/// Predict the priority of one issue
pub async fn predict(
    State(state): State<AppState>,
    Json(request): Json<InputRecord>,
) -> Result<Json<PredictionOutcome>> {
    let outcome = run_blocking(state.service, move |service| service.predict_one(&request)).await?;
    Ok(Json(outcome))
}

/// Predict a list of issues, one outcome per input in order
pub async fn predict_batch(
    State(state): State<AppState>,
    Json(request): Json<Vec<InputRecord>>,
) -> Result<Json<Vec<PredictionOutcome>>> {
    let outcomes =
        run_blocking(state.service, move |service| service.predict_batch(&request)).await?;
    Ok(Json(outcomes))
}

/// Predict a list of issues ordered by high-priority probability
pub async fn rank(
    State(state): State<AppState>,
    Json(request): Json<Vec<InputRecord>>,
) -> Result<Json<Vec<RankedPrediction>>> {
    let ranked = run_blocking(state.service, move |service| {
        service.rank_by_high_priority(&request)
    })
    .await?;
    Ok(Json(ranked))
}

/// Model scoring is CPU-bound; keep it off the async workers
async fn run_blocking<T, F>(service: Arc<PredictionService>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&PredictionService) -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&service))
        .await
        .map_err(|e| AppError::Internal(format!("Prediction task failed: {}", e)))?
}
