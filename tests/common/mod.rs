//! Common test utilities for the training and serving tests
//!
//! Builds small synthetic civic-issue datasets and trains a fast
//! configuration into a temporary artifact root.

#![allow(dead_code)]

use civic_priority::ml::{ArtifactStore, RunSummary, TrainingConfig, TrainingOrchestrator};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const HEADER: &str = "short_description,category,location,admin_priority";

/// Rows for one priority tier; each tier has its own vocabulary
fn tier_rows(priority: &str, count: usize) -> Vec<String> {
    let (words, categories, locations): (&[&str], &[&str], &[&str]) = match priority {
        "High" => (
            &["gas leak near school", "live wire fallen on street", "bridge crack collapse risk", "fire hydrant burst flooding"],
            &["Safety", "Electrical"],
            &["Downtown", "Central"],
        ),
        "Medium" => (
            &["pothole damaging cars", "traffic signal blinking", "blocked drain overflow", "broken street sign"],
            &["Roads", "Traffic"],
            &["Suburb", "Eastside"],
        ),
        _ => (
            &["graffiti on park bench", "faded paint on railing", "litter near playground", "overgrown grass verge"],
            &["Parks", "Cleanliness"],
            &["Residential", "Northside"],
        ),
    };

    (0..count)
        .map(|i| {
            format!(
                "{} report {},{},{},{}",
                words[i % words.len()],
                i,
                categories[i % categories.len()],
                locations[i % locations.len()],
                priority
            )
        })
        .collect()
}

/// A labeled CSV with `per_class` rows per tier plus one blank row and one duplicate
pub fn training_csv(per_class: usize) -> String {
    let mut csv = String::new();
    let _ = writeln!(csv, "{}", HEADER);
    for priority in ["High", "Medium", "Low"] {
        for row in tier_rows(priority, per_class) {
            let _ = writeln!(csv, "{}", row);
        }
    }
    // dropped: missing category
    let _ = writeln!(csv, "streetlight out,,Downtown,Medium");
    // dropped: exact duplicate of the first High row
    if let Some(first) = tier_rows("High", 1).first() {
        let _ = writeln!(csv, "{}", first);
    }
    csv
}

pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

/// Training configuration small enough for tests
pub fn fast_config() -> TrainingConfig {
    let mut config = TrainingConfig::default();
    config.random_forest.n_estimators = 15;
    config.gradient_boosting.n_estimators = 15;
    config.gradient_boosting.max_depth = 3;
    config.logistic_regression.max_iter = 300;
    config
}

/// Train into a fresh artifact root and return it with the run summary
pub fn trained_root() -> (TempDir, ArtifactStore, RunSummary) {
    let dir = TempDir::new().unwrap();
    let data = write_file(dir.path(), "issues.csv", &training_csv(20));
    let store = ArtifactStore::new(dir.path().join("artifacts"));

    let summary = TrainingOrchestrator::new(fast_config(), store.clone())
        .run(&data)
        .unwrap();

    (dir, store, summary)
}
