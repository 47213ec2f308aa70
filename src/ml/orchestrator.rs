//! End-to-end training run.
//!
//! A run moves through `Ingested → Validated → Transformed → Trained →
//! Persisted → Complete`. Any failing step aborts the run with the upstream
//! error unchanged.

use crate::error::{AppError, Result};
use crate::ml::artifacts::ArtifactStore;
use crate::ml::features::FeatureTransformer;
use crate::ml::ingestion::{load_csv, stratified_split, write_raw_csv, write_records_csv};
use crate::ml::models::{RunSummary, TrainingConfig, TrainingDataset};
use crate::ml::trainer::ModelTrainer;
use crate::ml::validation::SchemaValidator;
use crate::models::TRAINING_COLUMNS;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Stage reached by a training run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Ingested,
    Validated,
    Transformed,
    Trained,
    Persisted,
    Complete,
}

impl Stage {
    /// Stage a run must be in before entering this one
    pub fn predecessor(&self) -> Option<Stage> {
        match self {
            Stage::Ingested => None,
            Stage::Validated => Some(Stage::Ingested),
            Stage::Transformed => Some(Stage::Validated),
            Stage::Trained => Some(Stage::Transformed),
            Stage::Persisted => Some(Stage::Trained),
            Stage::Complete => Some(Stage::Persisted),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Ingested => write!(f, "ingested"),
            Stage::Validated => write!(f, "validated"),
            Stage::Transformed => write!(f, "transformed"),
            Stage::Trained => write!(f, "trained"),
            Stage::Persisted => write!(f, "persisted"),
            Stage::Complete => write!(f, "complete"),
        }
    }
}

/// A recorded stage change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTransition {
    pub from: Option<Stage>,
    pub to: Stage,
    pub timestamp: DateTime<Utc>,
}

/// Stage bookkeeping for one run; a fresh run has no stage yet
#[derive(Debug, Clone, Default)]
pub struct RunProgress {
    stage: Option<Stage>,
    transitions: Vec<StageTransition>,
}

impl RunProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> Option<Stage> {
        self.stage
    }

    pub fn transitions(&self) -> &[StageTransition] {
        &self.transitions
    }

    /// Move to `next`, which must directly follow the current stage
    pub fn advance(&mut self, next: Stage) -> Result<()> {
        if next.predecessor() != self.stage {
            let from = self
                .stage
                .map_or_else(|| "start".to_string(), |s| s.to_string());
            return Err(AppError::InvalidStateTransition(format!(
                "Cannot move training run from {} to {}",
                from, next
            )));
        }

        self.transitions.push(StageTransition {
            from: self.stage,
            to: next,
            timestamp: Utc::now(),
        });
        self.stage = Some(next);
        info!(stage = %next, "Training run advanced");
        Ok(())
    }
}

/// Sequences ingestion, validation, transformation, training and persistence
#[derive(Debug, Clone)]
pub struct TrainingOrchestrator {
    config: TrainingConfig,
    store: ArtifactStore,
}

impl TrainingOrchestrator {
    pub fn new(config: TrainingConfig, store: ArtifactStore) -> Self {
        Self { config, store }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Run the whole pipeline on a raw CSV dataset
    #[instrument(skip(self))]
    pub fn run(&self, raw_dataset_path: &Path) -> Result<RunSummary> {
        self.config.validate()?;

        let run_id = Uuid::new_v4();
        let layout = self.store.layout();
        let mut progress = RunProgress::new();
        info!(%run_id, root = %layout.root().display(), "Training run started");

        // Ingestion
        let raw = load_csv(raw_dataset_path)?;
        write_raw_csv(&raw, &layout.raw_csv_path())?;
        progress.advance(Stage::Ingested)?;

        // Validation
        let validator = SchemaValidator::new(self.config.expected_priorities.iter().cloned());
        let validated = validator.validate(&raw)?;
        progress.advance(Stage::Validated)?;

        // Transformation
        let (train_records, test_records) = stratified_split(
            &validated.records,
            self.config.test_size,
            self.config.random_state,
        )?;
        write_records_csv(&train_records, &layout.train_csv_path())?;
        write_records_csv(&test_records, &layout.test_csv_path())?;

        let transformer = FeatureTransformer::new(self.config.features.clone());
        let (space, mapping) = transformer.fit(&train_records)?;
        let train = TrainingDataset::from_records(&space, &mapping, &train_records)?;
        let test = TrainingDataset::from_records(&space, &mapping, &test_records)?;
        info!(
            train_shape = ?train.features.dim(),
            test_shape = ?test.features.dim(),
            classes = ?mapping.classes(),
            "Features transformed"
        );
        progress.advance(Stage::Transformed)?;

        // Training
        let outcome = ModelTrainer::new(self.config.clone())
            .train_candidates(&space, &mapping, &train, &test)?;
        progress.advance(Stage::Trained)?;

        // Persistence
        ModelTrainer::persist_candidates(&self.store, &outcome)?;
        FeatureTransformer::persist(&self.store, &space, &mapping)?;
        progress.advance(Stage::Persisted)?;

        let columns = TRAINING_COLUMNS.len();
        let summary = RunSummary {
            run_id,
            timestamp: Utc::now(),
            raw_dataset_path: raw_dataset_path.display().to_string(),
            best_model_name: outcome.best_model_name.clone(),
            per_model_accuracy: outcome.accuracies.clone(),
            failed_candidates: outcome.failures.clone(),
            evaluations: outcome.evaluations.clone(),
            raw_shape: raw.shape(),
            validated_shape: validated.shape(),
            train_shape: (train_records.len(), columns),
            test_shape: (test_records.len(), columns),
            feature_shape: train.features.dim(),
            label_shape: train.labels.len(),
        };
        self.store.save_run_summary(&summary)?;
        progress.advance(Stage::Complete)?;

        info!(
            %run_id,
            best_model = %summary.best_model_name,
            accuracy = summary.best_accuracy(),
            "Training run complete"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stages_advance_in_order() {
        let mut progress = RunProgress::new();
        for stage in [
            Stage::Ingested,
            Stage::Validated,
            Stage::Transformed,
            Stage::Trained,
            Stage::Persisted,
            Stage::Complete,
        ] {
            progress.advance(stage).unwrap();
        }

        assert_eq!(progress.stage(), Some(Stage::Complete));
        assert!(progress.stage().unwrap().is_terminal());
        assert_eq!(progress.transitions().len(), 6);
        assert_eq!(progress.transitions()[0].from, None);
    }

    #[test]
    fn test_skipping_a_stage_rejected() {
        let mut progress = RunProgress::new();
        progress.advance(Stage::Ingested).unwrap();

        match progress.advance(Stage::Trained) {
            Err(AppError::InvalidStateTransition(msg)) => {
                assert!(msg.contains("ingested"));
                assert!(msg.contains("trained"));
            }
            other => panic!("expected InvalidStateTransition, got {:?}", other),
        }
        assert_eq!(progress.stage(), Some(Stage::Ingested));
    }

    #[test]
    fn test_run_must_start_at_ingested() {
        let mut progress = RunProgress::new();
        assert!(progress.advance(Stage::Validated).is_err());
        assert!(progress.advance(Stage::Ingested).is_ok());
        assert!(progress.advance(Stage::Ingested).is_err());
    }

    #[test]
    fn test_invalid_config_rejected_before_reading() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = TrainingConfig::default();
        config.test_size = 0.0;

        let orchestrator = TrainingOrchestrator::new(config, ArtifactStore::new(dir.path()));
        assert!(matches!(
            orchestrator.run(&dir.path().join("missing.csv")),
            Err(AppError::Validation(_))
        ));
    }
}
