use crate::error::{AppError, Result};
use crate::ml::artifacts::ArtifactStore;
use crate::ml::models::FeatureConfig;
use crate::models::IssueRecord;
use ndarray::{Array2, ArrayViewMut1};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

/// Word tokens of two or more characters
static TOKEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?u)\b\w\w+\b").expect("token pattern is valid"));

/// Common English stop words
const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "across", "after", "afterwards", "again", "against", "all", "almost",
    "alone", "along", "already", "also", "although", "always", "am", "among", "amongst", "an",
    "and", "another", "any", "anyhow", "anyone", "anything", "anyway", "anywhere", "are",
    "around", "as", "at", "back", "be", "became", "because", "become", "becomes", "been",
    "before", "beforehand", "behind", "being", "below", "beside", "besides", "between", "beyond",
    "both", "but", "by", "can", "cannot", "could", "did", "do", "does", "done", "down", "due",
    "during", "each", "either", "else", "elsewhere", "enough", "etc", "even", "ever", "every",
    "everyone", "everything", "everywhere", "except", "few", "for", "former", "formerly", "from",
    "further", "had", "has", "have", "he", "hence", "her", "here", "hereafter", "hereby",
    "herein", "hers", "herself", "him", "himself", "his", "how", "however", "i", "ie", "if",
    "in", "indeed", "into", "is", "it", "its", "itself", "just", "last", "latter", "least",
    "less", "made", "many", "may", "me", "meanwhile", "might", "mine", "more", "moreover",
    "most", "mostly", "much", "must", "my", "myself", "namely", "neither", "never",
    "nevertheless", "next", "no", "nobody", "none", "nor", "not", "nothing", "now", "nowhere",
    "of", "off", "often", "on", "once", "one", "only", "onto", "or", "other", "others",
    "otherwise", "our", "ours", "ourselves", "out", "over", "own", "per", "perhaps", "please",
    "rather", "re", "same", "seem", "seemed", "seeming", "seems", "several", "she", "should",
    "since", "so", "some", "somehow", "someone", "something", "sometime", "sometimes",
    "somewhere", "still", "such", "than", "that", "the", "their", "them", "themselves", "then",
    "thence", "there", "thereafter", "thereby", "therefore", "therein", "these", "they", "this",
    "those", "though", "through", "throughout", "thru", "thus", "to", "together", "too",
    "toward", "towards", "under", "until", "up", "upon", "us", "very", "via", "was", "we",
    "well", "were", "what", "whatever", "when", "whence", "whenever", "where", "whereafter",
    "whereas", "whereby", "wherein", "whereupon", "wherever", "whether", "which", "while",
    "whither", "who", "whoever", "whole", "whom", "whose", "why", "will", "with", "within",
    "without", "would", "yet", "you", "your", "yours", "yourself", "yourselves",
];

/// Fitted transformation from raw issue fields to a fixed-width vector.
///
/// Column layout is `[text vocabulary | category one-hot | location one-hot]`.
/// The layout is frozen at fit time; values unseen during fit contribute
/// nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpace {
    /// Configuration
    config: FeatureConfig,

    /// Vocabulary mapping (term -> column), columns in alphabetical term order
    vocabulary: BTreeMap<String, usize>,

    /// Inverse document frequency per vocabulary column
    idf_values: Vec<f64>,

    /// Known categories, sorted
    categories: Vec<String>,

    /// Known locations, sorted
    locations: Vec<String>,

    /// Number of text features
    n_text_features: usize,

    /// Total number of features
    n_features: usize,
}

impl FeatureSpace {
    /// Fit the feature space on labeled or unlabeled records
    pub fn fit(config: FeatureConfig, records: &[IssueRecord]) -> Result<Self> {
        if records.is_empty() {
            return Err(AppError::Validation(
                "Cannot fit feature space on an empty dataset".to_string(),
            ));
        }

        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut term_freq: HashMap<String, usize> = HashMap::new();

        for record in records {
            let terms = TextPreprocessor::extract_terms(&record.short_description, &config);
            let unique: BTreeSet<&String> = terms.iter().collect();
            for term in unique {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            for term in terms {
                *term_freq.entry(term).or_insert(0) += 1;
            }
        }

        // Keep the most frequent terms, ties broken alphabetically
        let mut ranked: Vec<(String, usize)> = term_freq
            .into_iter()
            .filter(|(term, _)| doc_freq.get(term).copied().unwrap_or(0) >= config.min_doc_freq)
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(config.max_vocab_size);

        let kept: BTreeSet<String> = ranked.into_iter().map(|(term, _)| term).collect();
        let vocabulary: BTreeMap<String, usize> = kept
            .into_iter()
            .enumerate()
            .map(|(idx, term)| (term, idx))
            .collect();

        let n_docs = records.len() as f64;
        let idf_values = vocabulary
            .keys()
            .map(|term| {
                if config.use_tfidf {
                    let df = doc_freq.get(term).copied().unwrap_or(0) as f64;
                    ((1.0 + n_docs) / (1.0 + df)).ln() + 1.0
                } else {
                    1.0
                }
            })
            .collect();

        let categories: Vec<String> = records
            .iter()
            .map(|r| r.category.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let locations: Vec<String> = records
            .iter()
            .map(|r| r.location.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let n_text_features = vocabulary.len();
        let n_features = n_text_features + categories.len() + locations.len();

        info!(
            vocab_size = n_text_features,
            categories = categories.len(),
            locations = locations.len(),
            n_features,
            "Feature space fitted"
        );

        Ok(Self {
            config,
            vocabulary,
            idf_values,
            categories,
            locations,
            n_text_features,
            n_features,
        })
    }

    /// Transform records into a feature matrix (n_records × n_features)
    pub fn transform(&self, records: &[IssueRecord]) -> Array2<f64> {
        let mut features = Array2::zeros((records.len(), self.n_features));
        for (record, row) in records.iter().zip(features.rows_mut()) {
            self.transform_into(record, row);
        }
        features
    }

    fn transform_into(&self, record: &IssueRecord, mut row: ArrayViewMut1<f64>) {
        let terms = TextPreprocessor::extract_terms(&record.short_description, &self.config);
        for term in &terms {
            if let Some(&idx) = self.vocabulary.get(term) {
                row[idx] += 1.0;
            }
        }

        if self.n_text_features > 0 {
            let mut text = row.slice_mut(ndarray::s![..self.n_text_features]);
            if self.config.use_tfidf {
                for (value, idf) in text.iter_mut().zip(&self.idf_values) {
                    *value *= idf;
                }
                let norm = text.iter().map(|v| v * v).sum::<f64>().sqrt();
                if norm > 0.0 {
                    text.mapv_inplace(|v| v / norm);
                }
            }
        }

        let mut offset = self.n_text_features;
        if let Ok(idx) = self.categories.binary_search(&record.category) {
            row[offset + idx] = 1.0;
        }
        offset += self.categories.len();

        if let Ok(idx) = self.locations.binary_search(&record.location) {
            row[offset + idx] = 1.0;
        }
    }

    /// Column names in layout order
    pub fn feature_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.n_features);
        names.extend(self.vocabulary.keys().map(|t| format!("text__{}", t)));
        names.extend(self.categories.iter().map(|c| format!("category__{}", c)));
        names.extend(self.locations.iter().map(|l| format!("location__{}", l)));
        names
    }

    /// Get number of features
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Get vocabulary size
    pub fn vocab_size(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn locations(&self) -> &[String] {
        &self.locations
    }
}

/// Bijection between priority labels and dense ids `0..K-1`.
///
/// Ids follow the sorted order of the labels observed at fit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMapping {
    classes: Vec<String>,
}

impl LabelMapping {
    /// Build a mapping from the distinct observed labels
    pub fn fit<'a>(labels: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let classes: Vec<String> = labels
            .into_iter()
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if classes.is_empty() {
            return Err(AppError::Validation(
                "Cannot fit label mapping without labels".to_string(),
            ));
        }

        Ok(Self { classes })
    }

    /// Encode a label; unseen labels are rejected
    pub fn encode(&self, label: &str) -> Result<usize> {
        self.classes
            .binary_search_by(|c| c.as_str().cmp(label))
            .map_err(|_| AppError::InvalidLabel {
                labels: vec![label.to_string()],
            })
    }

    pub fn decode(&self, id: usize) -> Option<&str> {
        self.classes.get(id).map(String::as_str)
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// Fits and applies the feature space and label mapping for a training run
#[derive(Debug, Clone, Default)]
pub struct FeatureTransformer {
    config: FeatureConfig,
}

impl FeatureTransformer {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    /// Fit both artifacts on labeled records
    pub fn fit(&self, records: &[IssueRecord]) -> Result<(FeatureSpace, LabelMapping)> {
        let labels = records
            .iter()
            .map(|r| {
                r.admin_priority.as_deref().ok_or_else(|| {
                    AppError::Validation("Training record has no admin_priority".to_string())
                })
            })
            .collect::<Result<Vec<&str>>>()?;

        let mapping = LabelMapping::fit(labels)?;
        let space = FeatureSpace::fit(self.config.clone(), records)?;

        debug!(classes = ?mapping.classes(), "Label mapping fitted");
        Ok((space, mapping))
    }

    /// Transform records with an already-fitted feature space
    pub fn apply(space: &FeatureSpace, records: &[IssueRecord]) -> Array2<f64> {
        space.transform(records)
    }

    /// Write both fitted artifacts under the artifact root
    pub fn persist(
        store: &ArtifactStore,
        space: &FeatureSpace,
        mapping: &LabelMapping,
    ) -> Result<()> {
        store.save(&store.layout().preprocessor_path(), space)?;
        store.save(&store.layout().label_encoder_path(), mapping)?;
        Ok(())
    }
}

/// Text preprocessing utilities
pub struct TextPreprocessor;

impl TextPreprocessor {
    /// Lowercased word tokens with two or more characters
    pub fn tokenize(text: &str) -> Vec<String> {
        let lowered = Self::normalize(text);
        TOKEN_PATTERN
            .find_iter(&lowered)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    pub fn is_stop_word(word: &str) -> bool {
        STOP_WORDS.binary_search(&word).is_ok()
    }

    /// Normalize text (lowercase, trim)
    pub fn normalize(text: &str) -> String {
        text.to_lowercase().trim().to_string()
    }

    /// Terms (n-grams over filtered tokens) used for vocabulary and counting
    pub fn extract_terms(text: &str, config: &FeatureConfig) -> Vec<String> {
        let words: Vec<String> = Self::tokenize(text)
            .into_iter()
            .filter(|w| !config.remove_stop_words || !Self::is_stop_word(w))
            .collect();

        let (min_n, max_n) = config.ngram_range;
        let mut terms = Vec::new();
        for n in min_n.max(1)..=max_n.max(min_n.max(1)) {
            for window in words.windows(n) {
                terms.push(window.join(" "));
            }
        }

        terms
    }
}
