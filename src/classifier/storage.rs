// Trained model storage
// JSON files on disk with a SHA256 checksum to detect changed models
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::train::TrainedClassifier;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Checksum mismatch: expected {expected}, found {found}")]
    ChecksumMismatch { expected: String, found: String },
    #[error("Failed to get app data directory")]
    NoAppDataDir,
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Directory holding stored models
pub fn models_dir() -> StorageResult<PathBuf> {
    let data_dir = dirs::data_dir().ok_or(StorageError::NoAppDataDir)?;
    let models_dir = data_dir.join("reactivate").join("models");
    fs::create_dir_all(&models_dir)?;
    Ok(models_dir)
}

/// Calculate SHA256 hash of data
pub fn calculate_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Write a trained classifier to `path` and return its SHA256 hash
pub fn save_model(path: &Path, trained: &TrainedClassifier) -> StorageResult<String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_vec_pretty(trained)?;
    let mut file = fs::File::create(path)?;
    file.write_all(&data)?;
    Ok(calculate_sha256(&data))
}

/// Read a trained classifier, checking its hash when one is given
pub fn load_model(path: &Path, expected_sha: Option<&str>) -> StorageResult<TrainedClassifier> {
    let data = fs::read(path)?;
    if let Some(expected) = expected_sha {
        let found = calculate_sha256(&data);
        if found != expected {
            return Err(StorageError::ChecksumMismatch {
                expected: expected.to_string(),
                found,
            });
        }
    }
    Ok(serde_json::from_slice(&data)?)
}

/// Store a trained classifier in the models directory, named after the
/// run it was trained for and its model id
pub fn store_model(trained: &TrainedClassifier) -> StorageResult<(PathBuf, String)> {
    let provenance = &trained.params.provenance;
    let filename = format!(
        "{}_{}_{}_{}.json",
        provenance.mouse,
        provenance.comparison_date,
        provenance.comparison_run,
        trained.model.id()
    );
    let path = models_dir()?.join(filename);
    let hash = save_model(&path, trained)?;
    Ok((path, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::params::ParamOverrides;
    use crate::classifier::train::{train_classifier, TrainOptions};
    use crate::recording::fixtures::hungry_day;
    use serde_json::json;
    use tempfile::TempDir;

    fn trained() -> TrainedClassifier {
        let day = hungry_day();
        let overrides = ParamOverrides::new()
            .set("probability", json!({ "plus": 0.05, "minus": 0.05, "other": 0.997 }))
            .set("stimulus_training_ms", 1500)
            .set("excluded_time_around_onsets_ms", 1000);
        train_classifier(
            &day.store,
            &day.spontaneous,
            &TrainOptions::new().overrides(overrides),
        )
        .unwrap()
    }

    #[test]
    fn test_calculate_sha256() {
        assert_eq!(
            calculate_sha256(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_save_and_load_model() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("models").join("model.json");
        let trained = trained();

        let hash = save_model(&path, &trained).unwrap();
        assert_eq!(hash.len(), 64);

        let loaded = load_model(&path, Some(&hash)).unwrap();
        assert_eq!(loaded.model.id(), trained.model.id());
        assert_eq!(loaded.model.classnames(), trained.model.classnames());
        assert_eq!(loaded.params, trained.params);
        assert_eq!(loaded.nan_cells, trained.nan_cells);
        assert_eq!(
            loaded.model.distribution("plus").unwrap().p_active,
            trained.model.distribution("plus").unwrap().p_active
        );
    }

    #[test]
    fn test_changed_model_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        let hash = save_model(&path, &trained()).unwrap();

        let mut contents = fs::read_to_string(&path).unwrap();
        contents.push('\n');
        fs::write(&path, contents).unwrap();

        assert!(matches!(
            load_model(&path, Some(&hash)),
            Err(StorageError::ChecksumMismatch { .. })
        ));
        assert!(load_model(&path, None).is_ok());
    }

    #[test]
    fn test_missing_model() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            load_model(&dir.path().join("absent.json"), None),
            Err(StorageError::Io(_))
        ));
    }
}
