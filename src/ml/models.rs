use crate::error::{AppError, Result};
use crate::ml::features::{FeatureSpace, LabelMapping};
use crate::ml::metrics::ClassificationReport;
use crate::models::IssueRecord;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{AsRefStr, EnumIter, EnumString, IntoEnumIterator};
use validator::Validate;

/// Priority tiers accepted by default
pub const DEFAULT_PRIORITY_DOMAIN: [&str; 3] = ["Low", "Medium", "High"];

/// Training run configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TrainingConfig {
    /// Fraction of validated rows held out for evaluation
    #[serde(default = "default_test_size")]
    #[validate(range(min = 0.01, max = 0.99))]
    pub test_size: f64,

    /// Seed for every random draw in a run
    #[serde(default = "default_random_state")]
    pub random_state: u64,

    /// Allowed values of the label column
    #[serde(default = "default_priorities")]
    #[validate(length(min = 1))]
    pub expected_priorities: Vec<String>,

    /// Feature extraction configuration
    #[serde(default)]
    #[validate(nested)]
    pub features: FeatureConfig,

    #[serde(default)]
    #[validate(nested)]
    pub random_forest: RandomForestConfig,

    #[serde(default)]
    #[validate(nested)]
    pub gradient_boosting: GradientBoostingConfig,

    #[serde(default)]
    #[validate(nested)]
    pub logistic_regression: LogisticRegressionConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_size: default_test_size(),
            random_state: default_random_state(),
            expected_priorities: default_priorities(),
            features: FeatureConfig::default(),
            random_forest: RandomForestConfig::default(),
            gradient_boosting: GradientBoostingConfig::default(),
            logistic_regression: LogisticRegressionConfig::default(),
        }
    }
}

/// Feature extraction configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct FeatureConfig {
    /// Maximum vocabulary size for text features
    #[serde(default = "default_max_vocab_size")]
    #[validate(range(min = 1))]
    pub max_vocab_size: usize,

    /// Minimum document frequency for terms
    #[serde(default = "default_min_doc_freq")]
    #[validate(range(min = 1))]
    pub min_doc_freq: usize,

    /// Use TF-IDF weighting (raw counts otherwise)
    #[serde(default = "default_true")]
    pub use_tfidf: bool,

    /// Drop English stop words before counting
    #[serde(default = "default_true")]
    pub remove_stop_words: bool,

    /// N-gram range (min, max)
    #[serde(default = "default_ngram_range")]
    pub ngram_range: (usize, usize),
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            max_vocab_size: default_max_vocab_size(),
            min_doc_freq: default_min_doc_freq(),
            use_tfidf: true,
            remove_stop_words: true,
            ngram_range: default_ngram_range(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RandomForestConfig {
    #[serde(default = "default_forest_size")]
    #[validate(range(min = 1))]
    pub n_estimators: usize,

    /// Unlimited when absent
    #[serde(default)]
    pub max_depth: Option<usize>,

    #[serde(default = "default_min_samples_split")]
    #[validate(range(min = 2))]
    pub min_samples_split: usize,
}

impl Default for RandomForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: default_forest_size(),
            max_depth: None,
            min_samples_split: default_min_samples_split(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GradientBoostingConfig {
    #[serde(default = "default_boosting_rounds")]
    #[validate(range(min = 1))]
    pub n_estimators: usize,

    #[serde(default = "default_boosting_learning_rate")]
    #[validate(range(min = 0.001, max = 1.0))]
    pub learning_rate: f64,

    #[serde(default = "default_boosting_depth")]
    #[validate(range(min = 1))]
    pub max_depth: usize,

    /// L2 regularisation on leaf values
    #[serde(default = "default_reg_lambda")]
    #[validate(range(min = 0.0))]
    pub reg_lambda: f64,

    /// Minimum hessian mass in a child
    #[serde(default = "default_min_child_weight")]
    #[validate(range(min = 0.0))]
    pub min_child_weight: f64,
}

impl Default for GradientBoostingConfig {
    fn default() -> Self {
        Self {
            n_estimators: default_boosting_rounds(),
            learning_rate: default_boosting_learning_rate(),
            max_depth: default_boosting_depth(),
            reg_lambda: default_reg_lambda(),
            min_child_weight: default_min_child_weight(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LogisticRegressionConfig {
    #[serde(default = "default_max_iter")]
    #[validate(range(min = 1))]
    pub max_iter: usize,

    /// Inverse regularisation strength
    #[serde(default = "default_inverse_regularization")]
    #[validate(range(min = 0.0001))]
    pub c: f64,

    #[serde(default = "default_lr_learning_rate")]
    #[validate(range(min = 0.0001, max = 10.0))]
    pub learning_rate: f64,

    /// Stop once the gradient norm falls below this
    #[serde(default = "default_tolerance")]
    pub tol: f64,
}

impl Default for LogisticRegressionConfig {
    fn default() -> Self {
        Self {
            max_iter: default_max_iter(),
            c: default_inverse_regularization(),
            learning_rate: default_lr_learning_rate(),
            tol: default_tolerance(),
        }
    }
}

/// Candidate classifier families, in selection order.
///
/// The serialized form is the artifact file stem under `models/`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// Bagged decision trees
    #[strum(serialize = "random_forest")]
    RandomForest,

    /// Gradient boosted trees
    #[serde(rename = "xgb_model")]
    #[strum(serialize = "xgb_model")]
    GradientBoosting,

    /// Multinomial logistic regression
    #[strum(serialize = "logistic_regression")]
    LogisticRegression,
}

impl ModelType {
    /// Artifact name used to persist and load this candidate
    pub fn artifact_name(&self) -> &str {
        self.as_ref()
    }

    /// Resolve a model from its artifact name
    pub fn from_artifact_name(name: &str) -> Option<Self> {
        name.parse().ok()
    }

    /// All candidates in fixed enumeration order
    pub fn candidates() -> Vec<ModelType> {
        ModelType::iter().collect()
    }

    /// How this family handles class imbalance
    pub fn weighting(&self) -> SampleWeighting {
        match self {
            ModelType::RandomForest => SampleWeighting::BuiltIn(ClassWeight::BalancedSubsample),
            ModelType::GradientBoosting => SampleWeighting::InverseFrequency,
            ModelType::LogisticRegression => SampleWeighting::BuiltIn(ClassWeight::Balanced),
        }
    }
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelType::RandomForest => write!(f, "Random Forest"),
            ModelType::GradientBoosting => write!(f, "Gradient Boosting"),
            ModelType::LogisticRegression => write!(f, "Logistic Regression"),
        }
    }
}

/// Built-in class weighting modes a classifier can apply to itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClassWeight {
    #[default]
    None,
    /// Inverse class frequency over the whole training target
    Balanced,
    /// Inverse class frequency recomputed per bootstrap sample
    BalancedSubsample,
}

/// Weighting strategy a candidate accepts at fit time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleWeighting {
    /// The classifier weights classes itself
    BuiltIn(ClassWeight),
    /// The trainer passes explicit per-row inverse-frequency weights
    InverseFrequency,
}

impl SampleWeighting {
    pub fn requires_sample_weights(&self) -> bool {
        matches!(self, SampleWeighting::InverseFrequency)
    }

    /// Class weighting the classifier should apply internally
    pub fn class_weight(&self) -> ClassWeight {
        match self {
            SampleWeighting::BuiltIn(mode) => *mode,
            SampleWeighting::InverseFrequency => ClassWeight::None,
        }
    }
}

/// Encoded feature matrix plus label ids for one split
#[derive(Debug, Clone)]
pub struct TrainingDataset {
    /// Feature matrix (n_samples × n_features)
    pub features: Array2<f64>,

    /// Encoded labels
    pub labels: Vec<usize>,

    pub n_samples: usize,
    pub n_features: usize,
}

impl TrainingDataset {
    /// Transform labeled records through a fitted feature space and label mapping
    pub fn from_records(
        space: &FeatureSpace,
        mapping: &LabelMapping,
        records: &[IssueRecord],
    ) -> Result<Self> {
        let labels = records
            .iter()
            .map(|record| {
                let label = record.admin_priority.as_deref().ok_or_else(|| {
                    AppError::Validation("Training record has no admin_priority".to_string())
                })?;
                mapping.encode(label)
            })
            .collect::<Result<Vec<usize>>>()?;

        let features = space.transform(records);
        let (n_samples, n_features) = features.dim();

        Ok(Self {
            features,
            labels,
            n_samples,
            n_features,
        })
    }
}

/// Prediction for one issue record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionOutcome {
    /// Predicted priority label
    pub prediction: String,

    /// Confidence score (0.0 - 1.0), the largest class probability
    pub confidence: f64,

    /// Probability for every class the classifier knows, keyed by label
    pub class_probabilities: BTreeMap<String, f64>,

    /// Artifact name of the model that produced this outcome
    pub model_used: String,
}

impl PredictionOutcome {
    pub fn new(prediction: String, confidence: f64, model_used: String) -> Self {
        Self {
            prediction,
            confidence,
            class_probabilities: BTreeMap::new(),
            model_used,
        }
    }

    pub fn with_probabilities(mut self, probabilities: BTreeMap<String, f64>) -> Self {
        self.class_probabilities = probabilities;
        self
    }

    /// Probability mass on `label`, 0.0 when the class is unknown
    pub fn probability_of(&self, label: &str) -> f64 {
        self.class_probabilities.get(label).copied().unwrap_or(0.0)
    }
}

/// Held-out evaluation of one candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub model_name: String,
    pub accuracy: f64,
    pub report: ClassificationReport,
}

/// Metadata recorded for a completed training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: uuid::Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub raw_dataset_path: String,
    pub best_model_name: String,
    pub per_model_accuracy: BTreeMap<String, f64>,

    /// Candidates that failed to fit, with the error message
    pub failed_candidates: BTreeMap<String, String>,

    pub evaluations: Vec<EvaluationResult>,

    /// Dataset shapes as (rows, columns)
    pub raw_shape: (usize, usize),
    pub validated_shape: (usize, usize),
    pub train_shape: (usize, usize),
    pub test_shape: (usize, usize),
    pub feature_shape: (usize, usize),
    pub label_shape: usize,
}

impl RunSummary {
    /// Accuracy of the selected model
    pub fn best_accuracy(&self) -> f64 {
        self.per_model_accuracy
            .get(&self.best_model_name)
            .copied()
            .unwrap_or(0.0)
    }
}

fn default_test_size() -> f64 {
    0.2
}

fn default_random_state() -> u64 {
    42
}

fn default_priorities() -> Vec<String> {
    DEFAULT_PRIORITY_DOMAIN.iter().map(|p| p.to_string()).collect()
}

fn default_max_vocab_size() -> usize {
    500
}

fn default_min_doc_freq() -> usize {
    1
}

fn default_ngram_range() -> (usize, usize) {
    (1, 1)
}

fn default_true() -> bool {
    true
}

fn default_forest_size() -> usize {
    200
}

fn default_min_samples_split() -> usize {
    2
}

fn default_boosting_rounds() -> usize {
    100
}

fn default_boosting_learning_rate() -> f64 {
    0.3
}

fn default_boosting_depth() -> usize {
    6
}

fn default_reg_lambda() -> f64 {
    1.0
}

fn default_min_child_weight() -> f64 {
    1.0
}

fn default_max_iter() -> usize {
    1000
}

fn default_inverse_regularization() -> f64 {
    1.0
}

fn default_lr_learning_rate() -> f64 {
    0.5
}

fn default_tolerance() -> f64 {
    1e-4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_training_config_default() {
        let config = TrainingConfig::default();
        assert_eq!(config.test_size, 0.2);
        assert_eq!(config.random_state, 42);
        assert_eq!(config.features.max_vocab_size, 500);
        assert_eq!(config.random_forest.n_estimators, 200);
        assert_eq!(config.expected_priorities, vec!["Low", "Medium", "High"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_training_config_rejects_bad_values() {
        let mut config = TrainingConfig::default();
        config.test_size = 1.5;
        assert!(config.validate().is_err());

        let mut config = TrainingConfig::default();
        config.random_forest.n_estimators = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_model_type_artifact_names() {
        assert_eq!(ModelType::RandomForest.artifact_name(), "random_forest");
        assert_eq!(ModelType::GradientBoosting.artifact_name(), "xgb_model");
        assert_eq!(ModelType::LogisticRegression.artifact_name(), "logistic_regression");
        assert_eq!(
            ModelType::from_artifact_name("xgb_model"),
            Some(ModelType::GradientBoosting)
        );
        assert_eq!(ModelType::from_artifact_name("svm"), None);
    }

    #[test]
    fn test_candidate_order() {
        assert_eq!(
            ModelType::candidates(),
            vec![
                ModelType::RandomForest,
                ModelType::GradientBoosting,
                ModelType::LogisticRegression
            ]
        );
    }

    #[test]
    fn test_model_type_weighting() {
        assert!(ModelType::GradientBoosting.weighting().requires_sample_weights());
        assert!(!ModelType::RandomForest.weighting().requires_sample_weights());
        assert_eq!(
            ModelType::RandomForest.weighting().class_weight(),
            ClassWeight::BalancedSubsample
        );
        assert_eq!(
            ModelType::LogisticRegression.weighting().class_weight(),
            ClassWeight::Balanced
        );
        assert_eq!(
            ModelType::GradientBoosting.weighting().class_weight(),
            ClassWeight::None
        );
    }

    #[test]
    fn test_model_type_display() {
        assert_eq!(ModelType::LogisticRegression.to_string(), "Logistic Regression");
        assert_eq!(ModelType::RandomForest.to_string(), "Random Forest");
    }

    #[test]
    fn test_prediction_outcome_probability_of() {
        let outcome = PredictionOutcome::new("Low".to_string(), 0.7, "random_forest".to_string())
            .with_probabilities(
                vec![("Low".to_string(), 0.7), ("Medium".to_string(), 0.3)]
                    .into_iter()
                    .collect(),
            );

        assert_eq!(outcome.probability_of("Low"), 0.7);
        assert_eq!(outcome.probability_of("High"), 0.0);
    }
}
