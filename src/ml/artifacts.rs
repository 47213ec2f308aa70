use crate::error::{AppError, Result};
use crate::ml::models::RunSummary;
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const RAW_DATASET_FILE: &str = "priority_raw.csv";
const TRAIN_DATASET_FILE: &str = "priority_train.csv";
const TEST_DATASET_FILE: &str = "priority_test.csv";
const MODELS_DIR: &str = "models";
const PREPROCESSORS_DIR: &str = "preprocessors";
const PREPROCESSOR_FILE: &str = "preprocessor.pkl";
const LABEL_ENCODER_FILE: &str = "label_encoder.pkl";
const METADATA_FILE: &str = "training_metadata.pkl";

/// Paths of every artifact under one artifact root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn raw_csv_path(&self) -> PathBuf {
        self.root.join(RAW_DATASET_FILE)
    }

    pub fn train_csv_path(&self) -> PathBuf {
        self.root.join(TRAIN_DATASET_FILE)
    }

    pub fn test_csv_path(&self) -> PathBuf {
        self.root.join(TEST_DATASET_FILE)
    }

    /// Trained pipeline for a candidate, e.g. `models/random_forest.pkl`
    pub fn model_path(&self, model_name: &str) -> PathBuf {
        self.root
            .join(MODELS_DIR)
            .join(format!("{}.pkl", model_name))
    }

    pub fn preprocessor_path(&self) -> PathBuf {
        self.root.join(PREPROCESSORS_DIR).join(PREPROCESSOR_FILE)
    }

    pub fn label_encoder_path(&self) -> PathBuf {
        self.root.join(PREPROCESSORS_DIR).join(LABEL_ENCODER_FILE)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(METADATA_FILE)
    }
}

/// Bincode-backed store for fitted artifacts.
///
/// No locking is done; concurrent training runs against one root must be
/// serialized by the caller.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    layout: ArtifactLayout,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            layout: ArtifactLayout::new(root),
        }
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// Serialize `value` to `path`, creating parent directories
    pub fn save<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, value)?;
        writer.flush()?;

        debug!(path = %path.display(), "Artifact saved");
        Ok(())
    }

    /// Deserialize an artifact; a missing file is `ArtifactNotFound`
    pub fn load<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        if !path.is_file() {
            return Err(AppError::ArtifactNotFound {
                path: path.to_path_buf(),
            });
        }

        let reader = BufReader::new(File::open(path)?);
        let value = bincode::deserialize_from(reader)?;

        debug!(path = %path.display(), "Artifact loaded");
        Ok(value)
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// Delete an artifact; returns whether a file was removed
    pub fn remove(&self, path: &Path) -> Result<bool> {
        if !path.is_file() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        debug!(path = %path.display(), "Artifact removed");
        Ok(true)
    }

    pub fn save_run_summary(&self, summary: &RunSummary) -> Result<()> {
        self.save(&self.layout.metadata_path(), summary)
    }

    /// Metadata of the last completed training run
    pub fn load_run_summary(&self) -> Result<RunSummary> {
        self.load(&self.layout.metadata_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        name: String,
        weights: Vec<f64>,
    }

    #[test]
    fn test_layout_paths() {
        let layout = ArtifactLayout::new("artifacts");

        assert_eq!(layout.raw_csv_path(), PathBuf::from("artifacts/priority_raw.csv"));
        assert_eq!(
            layout.model_path("xgb_model"),
            PathBuf::from("artifacts/models/xgb_model.pkl")
        );
        assert_eq!(
            layout.label_encoder_path(),
            PathBuf::from("artifacts/preprocessors/label_encoder.pkl")
        );
        assert_eq!(
            layout.metadata_path(),
            PathBuf::from("artifacts/training_metadata.pkl")
        );
    }

    #[test]
    fn test_save_creates_directories_and_loads_back() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let path = store.layout().model_path("random_forest");
        let payload = Payload {
            name: "forest".to_string(),
            weights: vec![0.25, 0.75],
        };

        store.save(&path, &payload).unwrap();
        assert!(store.exists(&path));

        let loaded: Payload = store.load(&path).unwrap();
        assert_eq!(loaded, payload);
    }

    #[test]
    fn test_load_missing_artifact() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let path = store.layout().model_path("logistic_regression");

        match store.load::<Payload>(&path) {
            Err(AppError::ArtifactNotFound { path: missing }) => assert_eq!(missing, path),
            other => panic!("expected ArtifactNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_remove_artifact() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let path = store.layout().model_path("xgb_model");

        assert!(!store.remove(&path).unwrap());

        store.save(&path, &vec![1u8, 2, 3]).unwrap();
        assert!(store.remove(&path).unwrap());
        assert!(!store.exists(&path));
    }
}
