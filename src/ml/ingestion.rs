use crate::error::{AppError, Result};
use crate::models::{IssueRecord, RawDataset, TRAINING_COLUMNS};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Read a headed CSV file; empty cells become missing values
pub fn load_csv(path: &Path) -> Result<RawDataset> {
    if !path.is_file() {
        return Err(AppError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Dataset not found: {}", path.display()),
        )));
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)?;

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let width = headers.len();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let mut row: Vec<Option<String>> = record
            .iter()
            .take(width)
            .map(|value| {
                if value.trim().is_empty() {
                    None
                } else {
                    Some(value.to_string())
                }
            })
            .collect();
        row.resize(width, None);
        rows.push(row);
    }

    info!(
        path = %path.display(),
        rows = rows.len(),
        columns = width,
        "Dataset loaded"
    );

    Ok(RawDataset::new(headers, rows))
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Write a raw dataset back out unchanged
pub fn write_raw_csv(dataset: &RawDataset, path: &Path) -> Result<()> {
    create_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;

    writer.write_record(&dataset.headers)?;
    for row in &dataset.rows {
        writer.write_record(row.iter().map(|cell| cell.as_deref().unwrap_or("")))?;
    }
    writer.flush()?;

    debug!(path = %path.display(), rows = dataset.rows.len(), "Raw dataset written");
    Ok(())
}

/// Write labeled records with the canonical training columns
pub fn write_records_csv(records: &[IssueRecord], path: &Path) -> Result<()> {
    create_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;

    writer.write_record(TRAINING_COLUMNS)?;
    for record in records {
        writer.write_record([
            record.short_description.as_str(),
            record.category.as_str(),
            record.location.as_str(),
            record.admin_priority.as_deref().unwrap_or(""),
        ])?;
    }
    writer.flush()?;

    debug!(path = %path.display(), rows = records.len(), "Split written");
    Ok(())
}

/// Split labeled records into (train, test), stratified on `admin_priority`.
///
/// Each class sends `round(n_c * test_size)` rows to test, keeping at least
/// one row in train. Both splits keep the input row order.
pub fn stratified_split(
    records: &[IssueRecord],
    test_size: f64,
    seed: u64,
) -> Result<(Vec<IssueRecord>, Vec<IssueRecord>)> {
    if !(0.0..1.0).contains(&test_size) {
        return Err(AppError::Validation(format!(
            "test_size must be in [0, 1), got {}",
            test_size
        )));
    }

    let mut by_class: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (idx, record) in records.iter().enumerate() {
        let label = record.admin_priority.as_deref().unwrap_or_default();
        by_class.entry(label).or_default().push(idx);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut in_test = vec![false; records.len()];

    for indices in by_class.values_mut() {
        let n_class = indices.len();
        let n_test = ((n_class as f64 * test_size).round() as usize).min(n_class - 1);
        indices.shuffle(&mut rng);
        for &idx in indices.iter().take(n_test) {
            in_test[idx] = true;
        }
    }

    let (test, train): (Vec<_>, Vec<_>) = records
        .iter()
        .zip(&in_test)
        .partition(|(_, &is_test)| is_test);
    let train: Vec<IssueRecord> = train.into_iter().map(|(r, _)| r.clone()).collect();
    let test: Vec<IssueRecord> = test.into_iter().map(|(r, _)| r.clone()).collect();

    if train.is_empty() || test.is_empty() {
        return Err(AppError::Validation(format!(
            "Stratified split produced an empty split (train={}, test={})",
            train.len(),
            test.len()
        )));
    }

    info!(
        train_rows = train.len(),
        test_rows = test.len(),
        classes = by_class.len(),
        "Dataset split"
    );

    Ok((train, test))
}
