use crate::error::{AppError, Result};
use crate::ml::artifacts::ArtifactStore;
use crate::ml::classifier::{FittedClassifier, TrainedPipeline};
use crate::ml::features::{FeatureSpace, LabelMapping};
use crate::ml::metrics::ClassificationReport;
use crate::ml::models::{EvaluationResult, ModelType, TrainingConfig, TrainingDataset};
use crate::ml::weighting::sample_weights;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info, warn};

/// Every fitted candidate of a run and the one selected
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub best_model_name: String,

    /// Fitted pipelines in candidate order
    pub pipelines: Vec<TrainedPipeline>,

    /// Held-out accuracy per fitted candidate
    pub accuracies: BTreeMap<String, f64>,

    pub evaluations: Vec<EvaluationResult>,

    /// Candidates that failed to fit, with the error message
    pub failures: BTreeMap<String, String>,
}

impl TrainingOutcome {
    pub fn best_pipeline(&self) -> Option<&TrainedPipeline> {
        self.pipeline(&self.best_model_name)
    }

    pub fn pipeline(&self, model_name: &str) -> Option<&TrainedPipeline> {
        self.pipelines.iter().find(|p| p.model_name() == model_name)
    }

    pub fn best_accuracy(&self) -> f64 {
        self.accuracies
            .get(&self.best_model_name)
            .copied()
            .unwrap_or(0.0)
    }
}

/// Trains, evaluates and selects among the candidate classifiers
#[derive(Debug, Clone)]
pub struct ModelTrainer {
    config: TrainingConfig,
    candidates: Vec<ModelType>,
}

impl ModelTrainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            candidates: ModelType::candidates(),
        }
    }

    /// Restrict training to a subset, kept in enumeration order
    pub fn with_candidates(mut self, candidates: impl IntoIterator<Item = ModelType>) -> Self {
        let chosen: Vec<ModelType> = candidates.into_iter().collect();
        self.candidates = ModelType::candidates()
            .into_iter()
            .filter(|c| chosen.contains(c))
            .collect();
        self
    }

    pub fn candidates(&self) -> &[ModelType] {
        &self.candidates
    }

    /// Fit every candidate on `train`, score it on `test` and pick the best.
    ///
    /// A candidate that fails to fit is logged and excluded. Selection is by
    /// strictly highest test accuracy; ties keep the earlier candidate.
    pub fn train_candidates(
        &self,
        space: &FeatureSpace,
        mapping: &LabelMapping,
        train: &TrainingDataset,
        test: &TrainingDataset,
    ) -> Result<TrainingOutcome> {
        info!(
            candidates = self.candidates.len(),
            train_samples = train.n_samples,
            test_samples = test.n_samples,
            n_features = train.n_features,
            "Starting model training"
        );

        let mut pipelines = Vec::new();
        let mut accuracies = BTreeMap::new();
        let mut evaluations = Vec::new();
        let mut failures = BTreeMap::new();
        let mut best: Option<(String, f64)> = None;

        for &model_type in &self.candidates {
            let name = model_type.artifact_name().to_string();
            info!(model = %name, "Training {}", model_type);

            let start = Instant::now();
            let pipeline = match self.fit_candidate(model_type, space, train) {
                Ok(pipeline) => pipeline,
                Err(e) => {
                    error!(model = %name, error = %e, "Candidate failed to fit");
                    failures.insert(name, e.to_string());
                    continue;
                }
            };

            let predicted = match pipeline.predict_features(&test.features) {
                Ok(predicted) => predicted,
                Err(e) => {
                    error!(model = %name, error = %e, "Candidate failed to predict");
                    failures.insert(name, e.to_string());
                    continue;
                }
            };

            let report = ClassificationReport::compute(&test.labels, &predicted, mapping.classes());
            let accuracy = report.accuracy;

            info!(
                model = %name,
                accuracy,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "{} Accuracy: {:.4}",
                model_type,
                accuracy
            );
            info!(model = %name, "\n{}", report);

            if best.as_ref().map_or(true, |(_, score)| accuracy > *score) {
                best = Some((name.clone(), accuracy));
            }

            accuracies.insert(name.clone(), accuracy);
            evaluations.push(EvaluationResult {
                model_name: name,
                accuracy,
                report,
            });
            pipelines.push(pipeline);
        }

        let Some((best_model_name, best_accuracy)) = best else {
            return Err(AppError::Training(format!(
                "All {} candidates failed to train: {:?}",
                self.candidates.len(),
                failures
            )));
        };

        if !failures.is_empty() {
            warn!(failed = ?failures.keys().collect::<Vec<_>>(), "Some candidates were excluded");
        }
        info!(
            best_model = %best_model_name,
            accuracy = best_accuracy,
            "Best model selected"
        );

        Ok(TrainingOutcome {
            best_model_name,
            pipelines,
            accuracies,
            evaluations,
            failures,
        })
    }

    fn fit_candidate(
        &self,
        model_type: ModelType,
        space: &FeatureSpace,
        train: &TrainingDataset,
    ) -> Result<TrainedPipeline> {
        let weighting = model_type.weighting();
        let weights = weighting
            .requires_sample_weights()
            .then(|| sample_weights(&train.labels));

        let mut classifier = FittedClassifier::new(model_type, &self.config);
        classifier
            .as_classifier_mut()
            .fit(&train.features, &train.labels, weights.as_deref())?;

        TrainedPipeline::new(space.clone(), classifier)
    }

    /// Persist every fitted pipeline under `models/`.
    ///
    /// Pipelines left by an earlier run for candidates that failed this time
    /// are deleted, so every model on disk matches the current label encoder.
    pub fn persist_candidates(
        store: &ArtifactStore,
        outcome: &TrainingOutcome,
    ) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::with_capacity(outcome.pipelines.len());
        for pipeline in &outcome.pipelines {
            let path = store.layout().model_path(pipeline.model_name());
            store.save(&path, pipeline)?;
            info!(model = pipeline.model_name(), path = %path.display(), "Pipeline saved");
            paths.push(path);
        }

        for name in outcome.failures.keys() {
            let stale = store.layout().model_path(name);
            if store.remove(&stale)? {
                warn!(model = %name, path = %stale.display(), "Removed stale pipeline from an earlier run");
            }
        }
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::features::FeatureTransformer;
    use crate::ml::models::FeatureConfig;
    use crate::models::IssueRecord;
    use tempfile::TempDir;

    fn record(desc: &str, category: &str, location: &str, priority: &str) -> IssueRecord {
        IssueRecord::new(desc, category, location).with_priority(priority)
    }

    fn records() -> Vec<IssueRecord> {
        let mut out = Vec::new();
        for i in 0..6 {
            out.push(record(
                &format!("gas leak explosion danger {}", i),
                "Safety",
                "Downtown",
                "High",
            ));
            out.push(record(
                &format!("pothole road damage {}", i),
                "Roads",
                "Suburb",
                "Medium",
            ));
            out.push(record(
                &format!("graffiti park bench paint {}", i),
                "Parks",
                "Residential",
                "Low",
            ));
        }
        out
    }

    fn small_config() -> TrainingConfig {
        let mut config = TrainingConfig::default();
        config.random_forest.n_estimators = 10;
        config.gradient_boosting.n_estimators = 10;
        config
    }

    fn datasets(
        train: &[IssueRecord],
        test: &[IssueRecord],
    ) -> (FeatureSpace, LabelMapping, TrainingDataset, TrainingDataset) {
        let transformer = FeatureTransformer::new(FeatureConfig::default());
        let (space, mapping) = transformer.fit(train).unwrap();
        let train_ds = TrainingDataset::from_records(&space, &mapping, train).unwrap();
        let test_ds = TrainingDataset::from_records(&space, &mapping, test).unwrap();
        (space, mapping, train_ds, test_ds)
    }

    #[test]
    fn test_selects_highest_accuracy() {
        let data = records();
        let (space, mapping, train, test) = datasets(&data[..12], &data[12..]);

        let outcome = ModelTrainer::new(small_config())
            .train_candidates(&space, &mapping, &train, &test)
            .unwrap();

        assert_eq!(outcome.pipelines.len(), 3);
        assert!(outcome.failures.is_empty());

        let max = outcome
            .accuracies
            .values()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(outcome.best_accuracy(), max);

        // ties resolve to the earliest candidate
        let first_best = ModelType::candidates()
            .into_iter()
            .map(|m| m.artifact_name().to_string())
            .find(|name| outcome.accuracies[name] == max)
            .unwrap();
        assert_eq!(outcome.best_model_name, first_best);
        assert!(outcome.best_pipeline().is_some());
    }

    #[test]
    fn test_all_candidates_failing_is_training_error() {
        let data: Vec<IssueRecord> = records()
            .into_iter()
            .filter(|r| r.admin_priority.as_deref() == Some("High"))
            .collect();
        let (space, mapping, train, test) = datasets(&data[..4], &data[4..]);

        match ModelTrainer::new(small_config()).train_candidates(&space, &mapping, &train, &test) {
            Err(AppError::Training(msg)) => assert!(msg.contains("All 3 candidates failed")),
            other => panic!("expected Training error, got {:?}", other.map(|o| o.best_model_name)),
        }
    }

    #[test]
    fn test_candidate_subset_keeps_enumeration_order() {
        let trainer = ModelTrainer::new(small_config())
            .with_candidates([ModelType::LogisticRegression, ModelType::RandomForest]);
        assert_eq!(
            trainer.candidates(),
            &[ModelType::RandomForest, ModelType::LogisticRegression]
        );
    }

    #[test]
    fn test_failed_candidate_is_excluded() {
        let data = records();
        let (space, mapping, train, test) = datasets(&data[..12], &data[12..]);

        let mut config = small_config();
        config.random_forest.n_estimators = 0;

        let outcome = ModelTrainer::new(config)
            .train_candidates(&space, &mapping, &train, &test)
            .unwrap();

        assert!(outcome.failures.contains_key("random_forest"));
        assert_eq!(outcome.pipelines.len(), 2);
        assert!(outcome.pipeline("random_forest").is_none());
        assert!(!outcome.accuracies.contains_key("random_forest"));
        assert!(["xgb_model", "logistic_regression"].contains(&outcome.best_model_name.as_str()));

        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let paths = ModelTrainer::persist_candidates(&store, &outcome).unwrap();

        assert_eq!(paths.len(), 2);
        assert!(!store.layout().model_path("random_forest").exists());
        assert!(store.layout().model_path("xgb_model").is_file());
    }

    #[test]
    fn test_persist_removes_stale_failed_candidate() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let data = records();
        let (space, mapping, train, test) = datasets(&data[..12], &data[12..]);

        let full = ModelTrainer::new(small_config())
            .train_candidates(&space, &mapping, &train, &test)
            .unwrap();
        ModelTrainer::persist_candidates(&store, &full).unwrap();
        assert!(store.layout().model_path("random_forest").is_file());

        let mut config = small_config();
        config.random_forest.n_estimators = 0;
        let partial = ModelTrainer::new(config)
            .train_candidates(&space, &mapping, &train, &test)
            .unwrap();
        ModelTrainer::persist_candidates(&store, &partial).unwrap();

        assert!(!store.layout().model_path("random_forest").exists());
        assert!(store.layout().model_path("logistic_regression").is_file());
    }

    #[test]
    fn test_persist_every_candidate() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let data = records();
        let (space, mapping, train, test) = datasets(&data[..12], &data[12..]);

        let outcome = ModelTrainer::new(small_config())
            .train_candidates(&space, &mapping, &train, &test)
            .unwrap();
        let paths = ModelTrainer::persist_candidates(&store, &outcome).unwrap();

        assert_eq!(paths.len(), 3);
        for name in ["random_forest", "xgb_model", "logistic_regression"] {
            let path = store.layout().model_path(name);
            assert!(path.is_file(), "missing {}", path.display());
            let loaded: TrainedPipeline = store.load(&path).unwrap();
            assert_eq!(loaded.model_name(), name);
        }
    }
}
