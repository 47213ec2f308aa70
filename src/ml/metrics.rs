use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Per-class evaluation metrics
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

/// Held-out evaluation of one classifier
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassificationReport {
    /// Fraction of correct predictions
    pub accuracy: f64,

    /// Metrics keyed by decoded label
    pub per_class: BTreeMap<String, ClassMetrics>,

    /// Unweighted mean over classes
    pub macro_avg: ClassMetrics,

    /// Support-weighted mean over classes
    pub weighted_avg: ClassMetrics,

    /// `confusion_matrix[true][predicted]`, indexed by class id
    pub confusion_matrix: Vec<Vec<usize>>,

    /// Label for each class id, in id order
    pub labels: Vec<String>,
}

impl ClassificationReport {
    /// Build a report from encoded targets and predictions.
    ///
    /// `labels[i]` names class id `i`. Ids outside `labels` are counted in
    /// accuracy but ignored by the per-class breakdown.
    pub fn compute(y_true: &[usize], y_pred: &[usize], labels: &[String]) -> Self {
        let n_samples = y_true.len();
        let n_classes = labels.len();
        if n_samples == 0 {
            return Self {
                labels: labels.to_vec(),
                confusion_matrix: vec![vec![0; n_classes]; n_classes],
                ..Self::default()
            };
        }

        let accuracy = accuracy(y_true, y_pred);

        let mut confusion_matrix = vec![vec![0usize; n_classes]; n_classes];
        for (&t, &p) in y_true.iter().zip(y_pred) {
            if t < n_classes && p < n_classes {
                confusion_matrix[t][p] += 1;
            }
        }

        let mut per_class = BTreeMap::new();
        let mut macro_avg = ClassMetrics::default();
        let mut weighted_avg = ClassMetrics::default();
        let mut total_support = 0usize;
        let mut n_present = 0usize;

        for (class_idx, label) in labels.iter().enumerate() {
            let tp = y_true
                .iter()
                .zip(y_pred)
                .filter(|(t, p)| **t == class_idx && **p == class_idx)
                .count();

            let fp = y_pred
                .iter()
                .zip(y_true)
                .filter(|(p, t)| **p == class_idx && **t != class_idx)
                .count();

            let fn_count = y_true
                .iter()
                .zip(y_pred)
                .filter(|(t, p)| **t == class_idx && **p != class_idx)
                .count();

            let precision = ratio(tp, tp + fp);
            let recall = ratio(tp, tp + fn_count);
            let f1_score = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            let support = tp + fn_count;

            // classes absent from both truth and predictions stay out of the macro average
            if support + fp > 0 {
                n_present += 1;
                macro_avg.precision += precision;
                macro_avg.recall += recall;
                macro_avg.f1_score += f1_score;
            }

            weighted_avg.precision += precision * support as f64;
            weighted_avg.recall += recall * support as f64;
            weighted_avg.f1_score += f1_score * support as f64;
            total_support += support;

            per_class.insert(
                label.clone(),
                ClassMetrics {
                    precision,
                    recall,
                    f1_score,
                    support,
                },
            );
        }

        if n_present > 0 {
            let k = n_present as f64;
            macro_avg.precision /= k;
            macro_avg.recall /= k;
            macro_avg.f1_score /= k;
        }
        macro_avg.support = total_support;

        if total_support > 0 {
            let s = total_support as f64;
            weighted_avg.precision /= s;
            weighted_avg.recall /= s;
            weighted_avg.f1_score /= s;
        }
        weighted_avg.support = total_support;

        Self {
            accuracy,
            per_class,
            macro_avg,
            weighted_avg,
            confusion_matrix,
            labels: labels.to_vec(),
        }
    }
}

/// Fraction of positions where prediction equals target
pub fn accuracy(y_true: &[usize], y_pred: &[usize]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let correct = y_true
        .iter()
        .zip(y_pred)
        .filter(|(t, p)| t == p)
        .count();
    correct as f64 / y_true.len() as f64
}

fn ratio(num: usize, den: usize) -> f64 {
    if den > 0 {
        num as f64 / den as f64
    } else {
        0.0
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .labels
            .iter()
            .map(String::len)
            .chain(["weighted avg".len()])
            .max()
            .unwrap_or(12);

        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;

        for label in &self.labels {
            let m = self.per_class.get(label).copied().unwrap_or_default();
            writeln!(
                f,
                "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                label, m.precision, m.recall, m.f1_score, m.support
            )?;
        }
        writeln!(f)?;

        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        for (name, m) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            writeln!(
                f,
                "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                name, m.precision, m.recall, m.f1_score, m.support
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Vec<String> {
        vec!["High".to_string(), "Low".to_string(), "Medium".to_string()]
    }

    #[test]
    fn test_accuracy() {
        assert_eq!(accuracy(&[0, 1, 2, 1], &[0, 1, 1, 1]), 0.75);
        assert_eq!(accuracy(&[], &[]), 0.0);
    }

    #[test]
    fn test_per_class_metrics() {
        let y_true = vec![0, 0, 1, 1, 2, 2];
        let y_pred = vec![0, 1, 1, 1, 2, 0];
        let report = ClassificationReport::compute(&y_true, &y_pred, &labels());

        let high = report.per_class["High"];
        assert_eq!(high.precision, 0.5);
        assert_eq!(high.recall, 0.5);
        assert_eq!(high.support, 2);

        let low = report.per_class["Low"];
        assert!((low.precision - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(low.recall, 1.0);

        assert_eq!(report.confusion_matrix[2], vec![1, 0, 1]);
        assert_eq!(report.macro_avg.support, 6);
        assert!((report.accuracy - 4.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_class_never_predicted_has_zero_precision() {
        let report = ClassificationReport::compute(&[0, 1], &[0, 0], &labels());
        assert_eq!(report.per_class["Low"].precision, 0.0);
        assert_eq!(report.per_class["Low"].f1_score, 0.0);
        assert_eq!(report.per_class["Medium"].support, 0);
    }

    #[test]
    fn test_macro_average_skips_absent_classes() {
        // Medium appears in neither truth nor predictions
        let report = ClassificationReport::compute(&[0, 0, 1], &[0, 0, 1], &labels());
        assert_eq!(report.macro_avg.precision, 1.0);
        assert_eq!(report.macro_avg.recall, 1.0);
        assert_eq!(report.macro_avg.f1_score, 1.0);
        assert!(report.per_class.contains_key("Medium"));
    }

    #[test]
    fn test_display_lists_every_label() {
        let report = ClassificationReport::compute(&[0, 1, 2], &[0, 1, 2], &labels());
        let text = report.to_string();

        for label in labels() {
            assert!(text.contains(&label));
        }
        assert!(text.contains("weighted avg"));
        assert!(text.contains("1.00"));
    }
}
