use crate::error::{AppError, Result};
use crate::ml::models::DEFAULT_PRIORITY_DOMAIN;
use crate::models::{IssueRecord, RawDataset, ADMIN_PRIORITY, TRAINING_COLUMNS};
use std::collections::{BTreeSet, HashSet};
use tracing::{info, warn};

/// Cleaned, typed training rows plus what was removed to get there
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedDataset {
    pub records: Vec<IssueRecord>,
    pub dropped_missing: usize,
    pub dropped_duplicates: usize,
}

impl ValidatedDataset {
    /// (rows, columns) over the canonical training columns
    pub fn shape(&self) -> (usize, usize) {
        (self.records.len(), TRAINING_COLUMNS.len())
    }
}

/// Enforces dataset shape and label-domain correctness before learning
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    expected_priorities: BTreeSet<String>,
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new(DEFAULT_PRIORITY_DOMAIN.iter().map(|p| p.to_string()))
    }
}

impl SchemaValidator {
    pub fn new(expected_priorities: impl IntoIterator<Item = String>) -> Self {
        Self {
            expected_priorities: expected_priorities.into_iter().collect(),
        }
    }

    /// Validate a raw dataset without mutating it.
    ///
    /// Fails with `Schema` when a required column is absent and with
    /// `InvalidLabel` when a label falls outside the expected domain. Rows
    /// with a missing required value and exact duplicate rows are dropped.
    pub fn validate(&self, dataset: &RawDataset) -> Result<ValidatedDataset> {
        let missing = dataset.missing_columns(&TRAINING_COLUMNS);
        if !missing.is_empty() {
            return Err(AppError::Schema { missing });
        }

        let columns: Vec<usize> = TRAINING_COLUMNS
            .iter()
            .filter_map(|column| dataset.column_index(column))
            .collect();

        let mut records = Vec::with_capacity(dataset.rows.len());
        let mut seen: HashSet<&[Option<String>]> = HashSet::new();
        let mut dropped_missing = 0;
        let mut dropped_duplicates = 0;

        for (row_idx, row) in dataset.rows.iter().enumerate() {
            let values: Vec<&str> = columns
                .iter()
                .filter_map(|&col| dataset.value(row_idx, col))
                .collect();

            if values.len() != columns.len() {
                dropped_missing += 1;
                continue;
            }

            if !seen.insert(row.as_slice()) {
                dropped_duplicates += 1;
                continue;
            }

            records.push(
                IssueRecord::new(values[0], values[1], values[2]).with_priority(values[3]),
            );
        }

        if dropped_missing > 0 {
            warn!(dropped_missing, "Dropped rows with missing required values");
        }
        if dropped_duplicates > 0 {
            info!(dropped_duplicates, "Dropped duplicate rows");
        }

        let invalid: BTreeSet<&str> = records
            .iter()
            .filter_map(|r| r.admin_priority.as_deref())
            .filter(|label| !self.expected_priorities.contains(*label))
            .collect();

        if !invalid.is_empty() {
            return Err(AppError::InvalidLabel {
                labels: invalid.into_iter().map(str::to_string).collect(),
            });
        }

        info!(
            raw_rows = dataset.rows.len(),
            valid_rows = records.len(),
            label_column = ADMIN_PRIORITY,
            "Dataset validated"
        );

        Ok(ValidatedDataset {
            records,
            dropped_missing,
            dropped_duplicates,
        })
    }
}
