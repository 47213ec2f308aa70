use crate::error::{AppError, Result};
use crate::ml::features::FeatureSpace;
use crate::ml::models::{
    ClassWeight, GradientBoostingConfig, LogisticRegressionConfig, ModelType, RandomForestConfig,
    TrainingConfig,
};
use crate::ml::tree::{self, DecisionTree, GiniObjective, GradientObjective, TreeParams};
use crate::ml::weighting::{bootstrap_class_weights, compute_class_weights};
use crate::models::IssueRecord;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Trait for classifiers
pub trait Classifier: Send + Sync {
    /// Fit on encoded labels, optionally with explicit per-row weights
    fn fit(
        &mut self,
        features: &Array2<f64>,
        labels: &[usize],
        sample_weights: Option<&[f64]>,
    ) -> Result<()>;

    /// Class probabilities; columns follow [`Classifier::class_ids`]
    fn predict_proba(&self, features: &Array2<f64>) -> Result<Array2<f64>>;

    /// Predicted class ids (first maximum wins on ties)
    fn predict(&self, features: &Array2<f64>) -> Result<Vec<usize>> {
        let proba = self.predict_proba(features)?;
        let class_ids = self.class_ids();
        Ok(proba
            .rows()
            .into_iter()
            .map(|row| class_ids[argmax(row)])
            .collect())
    }

    /// Class ids seen during fit, ascending
    fn class_ids(&self) -> &[usize];

    /// Get model type
    fn model_type(&self) -> ModelType;

    /// Check if model is trained
    fn is_trained(&self) -> bool;
}

/// Index of the first maximum
pub fn argmax(row: ArrayView1<f64>) -> usize {
    let mut best = 0;
    for (idx, value) in row.iter().enumerate() {
        if *value > row[best] {
            best = idx;
        }
    }
    best
}

/// Row-wise softmax, stabilised by the row maximum
fn softmax_rows(scores: &mut Array2<f64>) {
    for mut row in scores.rows_mut() {
        let max = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
}

/// Distinct classes of the target and each row's column position.
///
/// Rejects a target with fewer than two classes or mismatched weights.
fn index_classes(
    features: &Array2<f64>,
    labels: &[usize],
    sample_weights: Option<&[f64]>,
) -> Result<(Vec<usize>, Vec<usize>)> {
    if features.nrows() != labels.len() {
        return Err(AppError::Training(format!(
            "Feature rows ({}) and labels ({}) differ in length",
            features.nrows(),
            labels.len()
        )));
    }
    if let Some(weights) = sample_weights {
        if weights.len() != labels.len() {
            return Err(AppError::Training(format!(
                "Expected {} sample weights, got {}",
                labels.len(),
                weights.len()
            )));
        }
    }

    let mut class_ids = labels.to_vec();
    class_ids.sort_unstable();
    class_ids.dedup();

    if class_ids.len() < 2 {
        return Err(AppError::Training(format!(
            "Training target needs at least two classes, found {}",
            class_ids.len()
        )));
    }

    let positions = labels
        .iter()
        .map(|label| class_ids.binary_search(label).unwrap_or(0))
        .collect();

    Ok((class_ids, positions))
}

fn check_trained(trained: bool, n_features: usize, features: &Array2<f64>) -> Result<()> {
    if !trained {
        return Err(AppError::Internal("Model not trained".to_string()));
    }
    if features.ncols() != n_features {
        return Err(AppError::Validation(format!(
            "Expected {} features, got {}",
            n_features,
            features.ncols()
        )));
    }
    Ok(())
}

/// Per-row weights combining explicit weights with whole-target class weighting
fn base_weights(positions: &[usize], sample_weights: Option<&[f64]>, mode: ClassWeight) -> Vec<f64> {
    let class_weights: BTreeMap<usize, f64> = match mode {
        ClassWeight::Balanced => compute_class_weights(positions),
        ClassWeight::None | ClassWeight::BalancedSubsample => BTreeMap::new(),
    };

    positions
        .iter()
        .enumerate()
        .map(|(i, pos)| {
            let explicit = sample_weights.map_or(1.0, |w| w[i]);
            explicit * class_weights.get(pos).copied().unwrap_or(1.0)
        })
        .collect()
}

/// Multinomial logistic regression fitted by full-batch gradient descent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegressionClassifier {
    config: LogisticRegressionConfig,
    class_weight: ClassWeight,

    /// Coefficients (n_features × n_classes)
    weights: Option<Array2<f64>>,

    /// Intercepts (n_classes)
    bias: Option<Array1<f64>>,

    class_ids: Vec<usize>,
    n_features: usize,

    /// Iterations actually run
    n_iter: usize,
    trained: bool,
}

impl LogisticRegressionClassifier {
    pub fn new(config: LogisticRegressionConfig, class_weight: ClassWeight) -> Self {
        Self {
            config,
            class_weight,
            weights: None,
            bias: None,
            class_ids: Vec::new(),
            n_features: 0,
            n_iter: 0,
            trained: false,
        }
    }

    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    fn scores(&self, features: &Array2<f64>) -> Result<Array2<f64>> {
        match (&self.weights, &self.bias) {
            (Some(weights), Some(bias)) => Ok(features.dot(weights) + bias),
            _ => Err(AppError::Internal("Model not trained".to_string())),
        }
    }
}

impl Classifier for LogisticRegressionClassifier {
    fn fit(
        &mut self,
        features: &Array2<f64>,
        labels: &[usize],
        sample_weights: Option<&[f64]>,
    ) -> Result<()> {
        let (class_ids, positions) = index_classes(features, labels, sample_weights)?;
        let (n_samples, n_features) = features.dim();
        let n_classes = class_ids.len();

        let row_weights = Array1::from(base_weights(&positions, sample_weights, self.class_weight));
        let mut targets = Array2::<f64>::zeros((n_samples, n_classes));
        for (i, &pos) in positions.iter().enumerate() {
            targets[[i, pos]] = 1.0;
        }

        let n = n_samples as f64;
        let penalty = 1.0 / (self.config.c * n);
        let mut weights = Array2::<f64>::zeros((n_features, n_classes));
        let mut bias = Array1::<f64>::zeros(n_classes);
        let mut n_iter = 0;

        for _ in 0..self.config.max_iter {
            n_iter += 1;

            let mut proba = features.dot(&weights) + &bias;
            softmax_rows(&mut proba);

            let residual = (proba - &targets) * &row_weights.view().insert_axis(Axis(1));
            let grad_w = features.t().dot(&residual) / n + &weights * penalty;
            let grad_b = residual.sum_axis(Axis(0)) / n;

            let grad_norm = (grad_w.iter().map(|g| g * g).sum::<f64>()
                + grad_b.iter().map(|g| g * g).sum::<f64>())
            .sqrt();

            weights.scaled_add(-self.config.learning_rate, &grad_w);
            bias.scaled_add(-self.config.learning_rate, &grad_b);

            if grad_norm < self.config.tol {
                break;
            }
        }

        debug!(n_iter, n_samples, n_features, "Logistic regression fitted");

        self.weights = Some(weights);
        self.bias = Some(bias);
        self.class_ids = class_ids;
        self.n_features = n_features;
        self.n_iter = n_iter;
        self.trained = true;
        Ok(())
    }

    fn predict_proba(&self, features: &Array2<f64>) -> Result<Array2<f64>> {
        check_trained(self.trained, self.n_features, features)?;
        let mut proba = self.scores(features)?;
        softmax_rows(&mut proba);
        Ok(proba)
    }

    fn class_ids(&self) -> &[usize] {
        &self.class_ids
    }

    fn model_type(&self) -> ModelType {
        ModelType::LogisticRegression
    }

    fn is_trained(&self) -> bool {
        self.trained
    }
}

/// Bagged Gini trees with per-split feature subsampling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForestClassifier {
    config: RandomForestConfig,
    class_weight: ClassWeight,
    random_state: u64,

    /// Each leaf holds a class distribution over `class_ids`
    trees: Vec<DecisionTree<Vec<f64>>>,

    class_ids: Vec<usize>,
    n_features: usize,
    trained: bool,
}

impl RandomForestClassifier {
    pub fn new(config: RandomForestConfig, class_weight: ClassWeight, random_state: u64) -> Self {
        Self {
            config,
            class_weight,
            random_state,
            trees: Vec::new(),
            class_ids: Vec::new(),
            n_features: 0,
            trained: false,
        }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Classifier for RandomForestClassifier {
    fn fit(
        &mut self,
        features: &Array2<f64>,
        labels: &[usize],
        sample_weights: Option<&[f64]>,
    ) -> Result<()> {
        if self.config.n_estimators == 0 {
            return Err(AppError::Training(
                "Random forest needs at least one tree".to_string(),
            ));
        }

        let (class_ids, positions) = index_classes(features, labels, sample_weights)?;
        let (n_samples, n_features) = features.dim();
        let n_classes = class_ids.len();

        let base = base_weights(&positions, sample_weights, self.class_weight);
        let params = TreeParams {
            max_depth: self.config.max_depth,
            min_samples_split: self.config.min_samples_split,
            max_features: Some(((n_features as f64).sqrt() as usize).max(1)),
        };

        let mut rng = StdRng::seed_from_u64(self.random_state);
        let mut trees = Vec::with_capacity(self.config.n_estimators);

        for _ in 0..self.config.n_estimators {
            // Bootstrap draw stored as per-row counts
            let mut counts = vec![0usize; n_samples];
            for _ in 0..n_samples {
                counts[rng.gen_range(0..n_samples)] += 1;
            }

            let subsample_weights = match self.class_weight {
                ClassWeight::BalancedSubsample => bootstrap_class_weights(&positions, &counts),
                ClassWeight::None | ClassWeight::Balanced => BTreeMap::new(),
            };

            let weights: Vec<f64> = (0..n_samples)
                .map(|i| {
                    let class_weight = subsample_weights
                        .get(&positions[i])
                        .copied()
                        .unwrap_or(1.0);
                    counts[i] as f64 * base[i] * class_weight
                })
                .collect();
            let samples: Vec<usize> = (0..n_samples).filter(|&i| counts[i] > 0).collect();

            let objective = GiniObjective::new(&positions, &weights, n_classes);
            trees.push(tree::grow(
                features.view(),
                samples,
                &objective,
                &params,
                &mut rng,
            ));
        }

        debug!(
            n_trees = trees.len(),
            n_samples,
            n_features,
            "Random forest fitted"
        );

        self.trees = trees;
        self.class_ids = class_ids;
        self.n_features = n_features;
        self.trained = true;
        Ok(())
    }

    fn predict_proba(&self, features: &Array2<f64>) -> Result<Array2<f64>> {
        check_trained(self.trained, self.n_features, features)?;

        let n_classes = self.class_ids.len();
        let mut proba = Array2::<f64>::zeros((features.nrows(), n_classes));
        for (row, mut out) in features.rows().into_iter().zip(proba.rows_mut()) {
            for tree in &self.trees {
                for (slot, p) in out.iter_mut().zip(tree.leaf(row)) {
                    *slot += p;
                }
            }
        }

        proba /= self.trees.len() as f64;
        Ok(proba)
    }

    fn class_ids(&self) -> &[usize] {
        &self.class_ids
    }

    fn model_type(&self) -> ModelType {
        ModelType::RandomForest
    }

    fn is_trained(&self) -> bool {
        self.trained
    }
}

/// Softmax gradient boosting with Newton leaf values.
///
/// Each round grows one regression tree per class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostingClassifier {
    config: GradientBoostingConfig,
    random_state: u64,

    /// `rounds[r][k]` is the tree for class position `k` in round `r`
    rounds: Vec<Vec<DecisionTree<f64>>>,

    class_ids: Vec<usize>,
    n_features: usize,
    trained: bool,
}

impl GradientBoostingClassifier {
    pub fn new(config: GradientBoostingConfig, random_state: u64) -> Self {
        Self {
            config,
            random_state,
            rounds: Vec::new(),
            class_ids: Vec::new(),
            n_features: 0,
            trained: false,
        }
    }

    fn margins(&self, features: &Array2<f64>) -> Array2<f64> {
        let mut scores = Array2::<f64>::zeros((features.nrows(), self.class_ids.len()));
        for (row, mut out) in features.rows().into_iter().zip(scores.rows_mut()) {
            for round in &self.rounds {
                for (slot, tree) in out.iter_mut().zip(round) {
                    *slot += self.config.learning_rate * tree.leaf(row);
                }
            }
        }
        scores
    }
}

impl Classifier for GradientBoostingClassifier {
    fn fit(
        &mut self,
        features: &Array2<f64>,
        labels: &[usize],
        sample_weights: Option<&[f64]>,
    ) -> Result<()> {
        if self.config.n_estimators == 0 {
            return Err(AppError::Training(
                "Gradient boosting needs at least one round".to_string(),
            ));
        }

        let (class_ids, positions) = index_classes(features, labels, sample_weights)?;
        let (n_samples, n_features) = features.dim();
        let n_classes = class_ids.len();

        let weights = base_weights(&positions, sample_weights, ClassWeight::None);
        let params = TreeParams {
            max_depth: Some(self.config.max_depth),
            min_samples_split: 2,
            max_features: None,
        };

        let mut rng = StdRng::seed_from_u64(self.random_state);
        let mut margins = Array2::<f64>::zeros((n_samples, n_classes));
        let mut rounds = Vec::with_capacity(self.config.n_estimators);
        let samples: Vec<usize> = (0..n_samples).collect();

        for _ in 0..self.config.n_estimators {
            let mut proba = margins.clone();
            softmax_rows(&mut proba);

            let mut round = Vec::with_capacity(n_classes);
            for k in 0..n_classes {
                let mut gradients = Vec::with_capacity(n_samples);
                let mut hessians = Vec::with_capacity(n_samples);
                for i in 0..n_samples {
                    let p = proba[[i, k]];
                    let y = if positions[i] == k { 1.0 } else { 0.0 };
                    gradients.push((p - y) * weights[i]);
                    hessians.push((2.0 * p * (1.0 - p)).max(1e-16) * weights[i]);
                }

                let objective = GradientObjective::new(
                    &gradients,
                    &hessians,
                    self.config.reg_lambda,
                    self.config.min_child_weight,
                );
                round.push(tree::grow(
                    features.view(),
                    samples.clone(),
                    &objective,
                    &params,
                    &mut rng,
                ));
            }

            for (row, mut out) in features.rows().into_iter().zip(margins.rows_mut()) {
                for (slot, tree) in out.iter_mut().zip(&round) {
                    *slot += self.config.learning_rate * tree.leaf(row);
                }
            }
            rounds.push(round);
        }

        debug!(
            n_rounds = rounds.len(),
            n_samples,
            n_features,
            "Gradient boosting fitted"
        );

        self.rounds = rounds;
        self.class_ids = class_ids;
        self.n_features = n_features;
        self.trained = true;
        Ok(())
    }

    fn predict_proba(&self, features: &Array2<f64>) -> Result<Array2<f64>> {
        check_trained(self.trained, self.n_features, features)?;
        let mut proba = self.margins(features);
        softmax_rows(&mut proba);
        Ok(proba)
    }

    fn class_ids(&self) -> &[usize] {
        &self.class_ids
    }

    fn model_type(&self) -> ModelType {
        ModelType::GradientBoosting
    }

    fn is_trained(&self) -> bool {
        self.trained
    }
}

/// Any fitted candidate, in a form that can be persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FittedClassifier {
    RandomForest(RandomForestClassifier),
    GradientBoosting(GradientBoostingClassifier),
    LogisticRegression(LogisticRegressionClassifier),
}

impl FittedClassifier {
    /// Untrained classifier for a candidate, configured with its weighting mode
    pub fn new(model_type: ModelType, config: &TrainingConfig) -> Self {
        let class_weight = model_type.weighting().class_weight();
        match model_type {
            ModelType::RandomForest => FittedClassifier::RandomForest(RandomForestClassifier::new(
                config.random_forest.clone(),
                class_weight,
                config.random_state,
            )),
            ModelType::GradientBoosting => FittedClassifier::GradientBoosting(
                GradientBoostingClassifier::new(
                    config.gradient_boosting.clone(),
                    config.random_state,
                ),
            ),
            ModelType::LogisticRegression => FittedClassifier::LogisticRegression(
                LogisticRegressionClassifier::new(config.logistic_regression.clone(), class_weight),
            ),
        }
    }

    pub fn as_classifier(&self) -> &dyn Classifier {
        match self {
            FittedClassifier::RandomForest(c) => c,
            FittedClassifier::GradientBoosting(c) => c,
            FittedClassifier::LogisticRegression(c) => c,
        }
    }

    pub fn as_classifier_mut(&mut self) -> &mut dyn Classifier {
        match self {
            FittedClassifier::RandomForest(c) => c,
            FittedClassifier::GradientBoosting(c) => c,
            FittedClassifier::LogisticRegression(c) => c,
        }
    }
}

/// A fitted feature space bound to the classifier trained on its output.
///
/// Accepts raw records; the feature space is applied internally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedPipeline {
    model_name: String,
    feature_space: FeatureSpace,
    classifier: FittedClassifier,
    trained_at: chrono::DateTime<chrono::Utc>,
}

impl TrainedPipeline {
    pub fn new(feature_space: FeatureSpace, classifier: FittedClassifier) -> Result<Self> {
        let inner = classifier.as_classifier();
        if !inner.is_trained() {
            return Err(AppError::Training(
                "Cannot build a pipeline around an untrained classifier".to_string(),
            ));
        }

        Ok(Self {
            model_name: inner.model_type().artifact_name().to_string(),
            feature_space,
            classifier,
            trained_at: chrono::Utc::now(),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn model_type(&self) -> ModelType {
        self.classifier.as_classifier().model_type()
    }

    pub fn feature_space(&self) -> &FeatureSpace {
        &self.feature_space
    }

    pub fn trained_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.trained_at
    }

    /// Class ids known to the classifier; probability columns follow this order
    pub fn class_ids(&self) -> &[usize] {
        self.classifier.as_classifier().class_ids()
    }

    pub fn predict_proba(&self, records: &[IssueRecord]) -> Result<Array2<f64>> {
        let features = self.feature_space.transform(records);
        self.classifier.as_classifier().predict_proba(&features)
    }

    pub fn predict(&self, records: &[IssueRecord]) -> Result<Vec<usize>> {
        let features = self.feature_space.transform(records);
        self.classifier.as_classifier().predict(&features)
    }

    /// Predictions on rows already produced by this pipeline's feature space
    pub fn predict_features(&self, features: &Array2<f64>) -> Result<Vec<usize>> {
        self.classifier.as_classifier().predict(features)
    }
}
