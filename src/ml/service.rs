use crate::error::{AppError, Result};
use crate::ml::artifacts::ArtifactStore;
use crate::ml::inference::{rank_by_high_priority, BoundModel, InferenceEngine};
use crate::ml::models::PredictionOutcome;
use crate::models::{InputRecord, IssueRecord};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// One ranked entry: the canonical input plus its outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPrediction {
    pub input: IssueRecord,

    #[serde(flatten)]
    pub outcome: PredictionOutcome,
}

/// Service liveness and the configured model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,

    /// Whether the model has been loaded yet
    pub loaded: bool,

    /// Whether labels are decoded with the fallback table
    pub degraded: bool,
}

/// Prediction service for the serving boundary.
///
/// The model is loaded at most once, on first use or by [`PredictionService::warm_up`],
/// and shared read-only afterwards.
pub struct PredictionService {
    engine: InferenceEngine,
    model_name: String,
    high_priority_label: String,
    model: OnceCell<Arc<BoundModel>>,
}

impl PredictionService {
    /// Create a service that lazily loads `model_name` from `store`
    pub fn new(
        store: ArtifactStore,
        model_name: impl Into<String>,
        high_priority_label: impl Into<String>,
    ) -> Self {
        Self {
            engine: InferenceEngine::new(store),
            model_name: model_name.into(),
            high_priority_label: high_priority_label.into(),
            model: OnceCell::new(),
        }
    }

    /// Create a service around an already-bound model
    pub fn with_model(
        store: ArtifactStore,
        model: BoundModel,
        high_priority_label: impl Into<String>,
    ) -> Self {
        let service = Self::new(store, model.model_name(), high_priority_label);
        // a fresh cell is always empty
        let _ = service.model.set(Arc::new(model));
        service
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn high_priority_label(&self) -> &str {
        &self.high_priority_label
    }

    /// The bound model, loading it on first call
    pub fn model(&self) -> Result<Arc<BoundModel>> {
        self.model
            .get_or_try_init(|| {
                info!(model = %self.model_name, "Loading model");
                self.engine.load(&self.model_name).map(Arc::new)
            })
            .cloned()
    }

    /// Load the model now so that the first request does not pay for it
    pub fn warm_up(&self) -> Result<()> {
        let model = self.model()?;
        for warning in model.warnings() {
            tracing::warn!(model = %self.model_name, "{}", warning);
        }
        Ok(())
    }

    pub fn predict_one(&self, input: &InputRecord) -> Result<PredictionOutcome> {
        let model = self.model()?;
        model
            .predict(std::slice::from_ref(input))?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Internal("Model returned no prediction".to_string()))
    }

    pub fn predict_batch(&self, inputs: &[InputRecord]) -> Result<Vec<PredictionOutcome>> {
        if inputs.is_empty() {
            return Err(AppError::Validation(
                "Batch must contain at least one issue".to_string(),
            ));
        }

        let model = self.model()?;
        let outcomes = model.predict(inputs)?;
        debug!(count = outcomes.len(), "Batch prediction completed");
        Ok(outcomes)
    }

    /// Predict a batch and order it by the high-priority class probability
    pub fn rank_by_high_priority(&self, inputs: &[InputRecord]) -> Result<Vec<RankedPrediction>> {
        if inputs.is_empty() {
            return Err(AppError::Validation(
                "Batch must contain at least one issue".to_string(),
            ));
        }

        let records = inputs
            .iter()
            .map(IssueRecord::from_fields)
            .collect::<Result<Vec<_>>>()?;
        let model = self.model()?;
        let outcomes = model.predict_records(&records)?;

        let ranked = rank_by_high_priority(
            records.into_iter().zip(outcomes).collect(),
            &self.high_priority_label,
        );

        Ok(ranked
            .into_iter()
            .map(|(input, outcome)| RankedPrediction { input, outcome })
            .collect())
    }

    pub fn health(&self) -> HealthResponse {
        let bound = self.model.get();
        HealthResponse {
            status: "ok".to_string(),
            model: self.model_name.clone(),
            loaded: bound.is_some(),
            degraded: bound.is_some_and(|m| m.decoder().is_fallback()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn input(value: serde_json::Value) -> InputRecord {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_missing_model_is_artifact_not_found() {
        let dir = TempDir::new().unwrap();
        let service = PredictionService::new(ArtifactStore::new(dir.path()), "random_forest", "High");

        let request = input(json!({
            "short_description": "Pothole",
            "category": "Roads",
            "location": "Downtown",
        }));
        assert!(matches!(
            service.predict_one(&request),
            Err(AppError::ArtifactNotFound { .. })
        ));
        assert!(service.warm_up().is_err());
    }

    #[test]
    fn test_health_before_load() {
        let dir = TempDir::new().unwrap();
        let service = PredictionService::new(ArtifactStore::new(dir.path()), "xgb_model", "High");

        let health = service.health();
        assert_eq!(health.status, "ok");
        assert_eq!(health.model, "xgb_model");
        assert!(!health.loaded);
        assert!(!health.degraded);
    }

    #[test]
    fn test_empty_batch_rejected() {
        let dir = TempDir::new().unwrap();
        let service = PredictionService::new(ArtifactStore::new(dir.path()), "random_forest", "High");

        assert!(matches!(service.predict_batch(&[]), Err(AppError::Validation(_))));
        assert!(matches!(
            service.rank_by_high_priority(&[]),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_ranked_prediction_serializes_flat() {
        let ranked = RankedPrediction {
            input: IssueRecord::new("Gas leak", "Safety", "Downtown"),
            outcome: PredictionOutcome::new("High".to_string(), 0.8, "random_forest".to_string()),
        };

        let value = serde_json::to_value(&ranked).unwrap();
        assert_eq!(value["prediction"], "High");
        assert_eq!(value["input"]["category"], "Safety");
        assert!(value["input"].get("admin_priority").is_none());
    }
}
