use crate::error::{AppError, Result};
use crate::ml::artifacts::ArtifactStore;
use crate::ml::classifier::{argmax, TrainedPipeline};
use crate::ml::features::LabelMapping;
use crate::ml::ingestion::{load_csv, write_raw_csv};
use crate::ml::models::PredictionOutcome;
use crate::models::{InputRecord, IssueRecord, RawDataset, FEATURE_COLUMNS};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Id → label table used when the label encoder artifact is unavailable.
///
/// It assumes the sorted assignment of the default Low/Medium/High domain
/// and is wrong for any run whose label set differs.
pub const FALLBACK_LABELS: [(usize, &str); 3] = [(0, "High"), (1, "Low"), (2, "Medium")];

/// Non-fatal conditions met while binding a model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferenceWarning {
    /// Label encoder missing or unreadable; fixed fallback table in use
    DecodeFallback { path: PathBuf, reason: String },
}

impl std::fmt::Display for InferenceWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InferenceWarning::DecodeFallback { path, reason } => write!(
                f,
                "label decoder unavailable at {} ({}); using fallback mapping",
                path.display(),
                reason
            ),
        }
    }
}

/// Maps classifier class ids back to priority labels
#[derive(Debug, Clone, PartialEq)]
pub enum LabelDecoder {
    Mapping(LabelMapping),
    Fallback,
}

impl LabelDecoder {
    pub fn decode(&self, class_id: usize) -> String {
        if let LabelDecoder::Mapping(mapping) = self {
            if let Some(label) = mapping.decode(class_id) {
                return label.to_string();
            }
        }
        fallback_label(class_id)
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, LabelDecoder::Fallback)
    }
}

fn fallback_label(class_id: usize) -> String {
    FALLBACK_LABELS
        .iter()
        .find(|(id, _)| *id == class_id)
        .map(|(_, label)| label.to_string())
        .unwrap_or_else(|| format!("class_{}", class_id))
}

/// A loaded pipeline bound to its label decoder; read-only once built
#[derive(Debug, Clone)]
pub struct BoundModel {
    model_name: String,
    pipeline: TrainedPipeline,
    decoder: LabelDecoder,
    warnings: Vec<InferenceWarning>,
}

impl BoundModel {
    pub fn new(model_name: impl Into<String>, pipeline: TrainedPipeline, decoder: LabelDecoder) -> Self {
        Self {
            model_name: model_name.into(),
            pipeline,
            decoder,
            warnings: Vec::new(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn pipeline(&self) -> &TrainedPipeline {
        &self.pipeline
    }

    pub fn decoder(&self) -> &LabelDecoder {
        &self.decoder
    }

    pub fn warnings(&self) -> &[InferenceWarning] {
        &self.warnings
    }

    /// Decoded labels in probability column order
    pub fn class_labels(&self) -> Vec<String> {
        self.pipeline
            .class_ids()
            .iter()
            .map(|&id| self.decoder.decode(id))
            .collect()
    }

    /// Predict loosely-typed inputs.
    ///
    /// Every input is checked before the model runs; one malformed input
    /// fails the call with `MissingColumn`.
    pub fn predict(&self, inputs: &[InputRecord]) -> Result<Vec<PredictionOutcome>> {
        let records = inputs
            .iter()
            .map(IssueRecord::from_fields)
            .collect::<Result<Vec<_>>>()?;
        self.predict_records(&records)
    }

    /// Predict already-typed records, one independent outcome per record
    pub fn predict_records(&self, records: &[IssueRecord]) -> Result<Vec<PredictionOutcome>> {
        let proba = self.pipeline.predict_proba(records)?;
        let labels = self.class_labels();

        let outcomes = proba
            .rows()
            .into_iter()
            .map(|row| {
                let best = argmax(row);
                let class_probabilities: BTreeMap<String, f64> =
                    labels.iter().cloned().zip(row.iter().copied()).collect();

                PredictionOutcome::new(labels[best].clone(), row[best], self.model_name.clone())
                    .with_probabilities(class_probabilities)
            })
            .collect();

        Ok(outcomes)
    }
}

/// Loads named pipelines from an artifact root
#[derive(Debug, Clone)]
pub struct InferenceEngine {
    store: ArtifactStore,
}

impl InferenceEngine {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }

    /// Load a trained pipeline and, when present, the label encoder.
    ///
    /// A missing pipeline is `ArtifactNotFound`. A missing or unreadable
    /// label encoder degrades to the fallback table with a warning.
    pub fn load(&self, model_name: &str) -> Result<BoundModel> {
        let layout = self.store.layout();
        let model_path = layout.model_path(model_name);
        let pipeline: TrainedPipeline = self.store.load(&model_path)?;
        info!(model = model_name, path = %model_path.display(), "Model loaded");

        let encoder_path = layout.label_encoder_path();
        let (decoder, warning) = match self.store.load::<LabelMapping>(&encoder_path) {
            Ok(mapping) => {
                info!(classes = ?mapping.classes(), "Label encoder loaded");
                (LabelDecoder::Mapping(mapping), None)
            }
            Err(e) => {
                let reason = match e {
                    AppError::ArtifactNotFound { .. } => "not found".to_string(),
                    other => other.to_string(),
                };
                let warning = InferenceWarning::DecodeFallback {
                    path: encoder_path.clone(),
                    reason,
                };
                warn!(model = model_name, "{}", warning);
                (LabelDecoder::Fallback, Some(warning))
            }
        };

        let mut model = BoundModel::new(model_name, pipeline, decoder);
        model.warnings.extend(warning);
        Ok(model)
    }

    /// Score every row of a CSV file.
    ///
    /// Appends `predicted_priority`, `confidence` and one `prob_<label>`
    /// column per class. Blank feature cells are scored as empty values.
    pub fn predict_csv(
        model: &BoundModel,
        input_path: &Path,
        output_path: Option<&Path>,
    ) -> Result<RawDataset> {
        let mut table = load_csv(input_path)?;

        let missing = table.missing_columns(&FEATURE_COLUMNS);
        if !missing.is_empty() {
            return Err(AppError::MissingColumn { missing });
        }

        let columns: Vec<usize> = FEATURE_COLUMNS
            .iter()
            .filter_map(|column| table.column_index(column))
            .collect();
        let records: Vec<IssueRecord> = (0..table.rows.len())
            .map(|row| {
                let cell = |col: usize| table.value(row, columns[col]).unwrap_or("").to_string();
                IssueRecord::new(cell(0), cell(1), cell(2))
            })
            .collect();

        let outcomes = model.predict_records(&records)?;
        let labels = model.class_labels();

        table.headers.push("predicted_priority".to_string());
        table.headers.push("confidence".to_string());
        table
            .headers
            .extend(labels.iter().map(|label| format!("prob_{}", label.to_lowercase())));

        for (row, outcome) in table.rows.iter_mut().zip(&outcomes) {
            row.push(Some(outcome.prediction.clone()));
            row.push(Some(outcome.confidence.to_string()));
            row.extend(
                labels
                    .iter()
                    .map(|label| Some(outcome.probability_of(label).to_string())),
            );
        }

        if let Some(path) = output_path {
            write_raw_csv(&table, path)?;
            info!(path = %path.display(), "Predictions saved");
        }

        info!(rows = outcomes.len(), model = model.model_name(), "CSV prediction completed");
        Ok(table)
    }
}

/// Order items by the probability of `label`, highest first.
///
/// Items whose distribution lacks `label` rank as 0.0. The sort is stable.
pub fn rank_by_high_priority<T>(
    mut items: Vec<(T, PredictionOutcome)>,
    label: &str,
) -> Vec<(T, PredictionOutcome)> {
    items.sort_by(|(_, a), (_, b)| {
        b.probability_of(label)
            .total_cmp(&a.probability_of(label))
    });
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(probs: &[(&str, f64)]) -> PredictionOutcome {
        let map: BTreeMap<String, f64> = probs.iter().map(|(l, p)| (l.to_string(), *p)).collect();
        let (label, confidence) = probs
            .iter()
            .fold(("", f64::MIN), |acc, (l, p)| if *p > acc.1 { (*l, *p) } else { acc });
        PredictionOutcome::new(label.to_string(), confidence, "random_forest".to_string())
            .with_probabilities(map)
    }

    #[test]
    fn test_fallback_mapping() {
        let decoder = LabelDecoder::Fallback;
        assert_eq!(decoder.decode(0), "High");
        assert_eq!(decoder.decode(1), "Low");
        assert_eq!(decoder.decode(2), "Medium");
        assert_eq!(decoder.decode(7), "class_7");
        assert!(decoder.is_fallback());
    }

    #[test]
    fn test_mapping_decoder() {
        let mapping = LabelMapping::fit(["P1", "P2"]).unwrap();
        let decoder = LabelDecoder::Mapping(mapping);
        assert_eq!(decoder.decode(0), "P1");
        assert_eq!(decoder.decode(1), "P2");
        assert!(!decoder.is_fallback());
    }

    #[test]
    fn test_fallback_agrees_with_sorted_default_domain() {
        let mapping = LabelMapping::fit(["Low", "Medium", "High"]).unwrap();
        for (id, label) in FALLBACK_LABELS {
            assert_eq!(mapping.decode(id), Some(label));
        }
    }

    #[test]
    fn test_rank_by_high_priority() {
        let items = vec![
            ("a", outcome(&[("High", 0.9), ("Low", 0.1)])),
            ("b", outcome(&[("High", 0.2), ("Low", 0.8)])),
            ("c", outcome(&[("High", 0.5), ("Low", 0.5)])),
        ];

        let ranked = rank_by_high_priority(items, "High");
        let order: Vec<&str> = ranked.iter().map(|(name, _)| *name).collect();
        assert_eq!(order, vec!["a", "c", "b"]);
    }

    #[test]
    fn test_rank_missing_class_counts_as_zero() {
        let items = vec![
            ("no_high", outcome(&[("Low", 0.6), ("Medium", 0.4)])),
            ("some_high", outcome(&[("High", 0.05), ("Low", 0.95)])),
            ("also_no_high", outcome(&[("Low", 1.0)])),
        ];

        let ranked = rank_by_high_priority(items, "High");
        let order: Vec<&str> = ranked.iter().map(|(name, _)| *name).collect();
        assert_eq!(order, vec!["some_high", "no_high", "also_no_high"]);
    }

    #[test]
    fn test_warning_message_names_path() {
        let warning = InferenceWarning::DecodeFallback {
            path: PathBuf::from("artifacts/preprocessors/label_encoder.pkl"),
            reason: "not found".to_string(),
        };
        assert!(warning.to_string().contains("label_encoder.pkl"));
    }
}
