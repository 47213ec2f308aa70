/// Machine learning pipeline for civic issue priority classification
///
/// This module provides:
/// - Dataset ingestion, schema validation and stratified splitting
/// - TF-IDF and one-hot feature extraction with a persisted label mapping
/// - Candidate classifiers (random forest, gradient boosting, logistic regression)
/// - Training, evaluation and best-model selection
/// - Artifact persistence and inference against a named trained pipeline

pub mod artifacts;
pub mod classifier;
pub mod features;
pub mod inference;
pub mod ingestion;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod service;
pub mod trainer;
pub mod tree;
pub mod validation;
pub mod weighting;

pub use artifacts::{ArtifactLayout, ArtifactStore};
pub use classifier::{
    Classifier, FittedClassifier, GradientBoostingClassifier, LogisticRegressionClassifier,
    RandomForestClassifier, TrainedPipeline,
};
pub use features::{FeatureSpace, FeatureTransformer, LabelMapping, TextPreprocessor};
pub use inference::{
    rank_by_high_priority, BoundModel, InferenceEngine, InferenceWarning, LabelDecoder,
    FALLBACK_LABELS,
};
pub use metrics::{ClassMetrics, ClassificationReport};
pub use models::{
    ClassWeight, EvaluationResult, FeatureConfig, ModelType, PredictionOutcome, RunSummary,
    SampleWeighting, TrainingConfig, TrainingDataset,
};
pub use orchestrator::{RunProgress, Stage, TrainingOrchestrator};
pub use service::{HealthResponse, PredictionService, RankedPrediction};
pub use trainer::{ModelTrainer, TrainingOutcome};
pub use validation::{SchemaValidator, ValidatedDataset};
