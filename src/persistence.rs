// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Model archive read/write
//!
//! A model file is a zip archive with two entries:
//! - `manifest.json`: format version, producer version, timestamp, shape and
//!   the SHA-256 of the payload
//! - `model.json`: the serialized [`TrainedModel`]

use crate::error::ClassifierError;
use crate::model::TrainedModel;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

pub const FORMAT_VERSION: u32 = 1;

const MANIFEST_ENTRY: &str = "manifest.json";
const MODEL_ENTRY: &str = "model.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    pub format_version: u32,
    pub producer_version: String,
    pub created_at: DateTime<Utc>,
    pub payload_sha256: String,
    pub num_classes: usize,
    pub feature_dim: usize,
}

/// Write the model archive, replacing any existing file
pub fn save_model(model: &TrainedModel, path: &Path) -> Result<ModelManifest> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create model directory: {}", parent.display()))?;
    }

    let payload = serde_json::to_vec(model).context("Failed to serialize model")?;
    let manifest = ModelManifest {
        format_version: FORMAT_VERSION,
        producer_version: env!("CARGO_PKG_VERSION").to_string(),
        created_at: Utc::now(),
        payload_sha256: hex::encode(Sha256::digest(&payload)),
        num_classes: model.num_classes(),
        feature_dim: model.pipeline.dim(),
    };
    let manifest_json = serde_json::to_vec_pretty(&manifest)?;

    let file = File::create(path)
        .with_context(|| format!("Failed to create model file: {}", path.display()))?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    zip.start_file(MANIFEST_ENTRY, options)?;
    zip.write_all(&manifest_json)?;
    zip.start_file(MODEL_ENTRY, options)?;
    zip.write_all(&payload)?;
    zip.finish()
        .with_context(|| format!("Failed to finish model archive: {}", path.display()))?;

    tracing::info!("Model saved to {}", path.display());
    Ok(manifest)
}

/// Read and verify a model archive
pub fn load_model(path: &Path) -> Result<TrainedModel> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open model file: {}", path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("Not a model archive: {}", path.display()))?;

    let manifest: ModelManifest = serde_json::from_slice(&read_entry(&mut archive, MANIFEST_ENTRY)?)
        .context("Failed to parse model manifest")?;
    if manifest.format_version != FORMAT_VERSION {
        return Err(ClassifierError::UnsupportedFormat {
            found: manifest.format_version,
            expected: FORMAT_VERSION,
        }
        .into());
    }

    let payload = read_entry(&mut archive, MODEL_ENTRY)?;
    let actual = hex::encode(Sha256::digest(&payload));
    if actual != manifest.payload_sha256 {
        return Err(ClassifierError::ChecksumMismatch {
            expected: manifest.payload_sha256,
            actual,
        }
        .into());
    }

    let model: TrainedModel =
        serde_json::from_slice(&payload).context("Failed to deserialize model payload")?;
    model.validate()?;

    tracing::info!(
        "Model loaded from {} ({} classes, {} features, written by v{})",
        path.display(),
        manifest.num_classes,
        manifest.feature_dim,
        manifest.producer_version
    );
    Ok(model)
}

/// Read only the manifest of a model archive
pub fn read_manifest(path: &Path) -> Result<ModelManifest> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open model file: {}", path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("Not a model archive: {}", path.display()))?;
    let manifest = serde_json::from_slice(&read_entry(&mut archive, MANIFEST_ENTRY)?)
        .context("Failed to parse model manifest")?;
    Ok(manifest)
}

fn read_entry<R: Read + std::io::Seek>(archive: &mut zip::ZipArchive<R>, name: &str) -> Result<Vec<u8>> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(ClassifierError::MissingEntry(name.to_string()).into())
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to read archive entry {}", name)),
    };
    let mut buf = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut buf)
        .with_context(|| format!("Failed to read archive entry {}", name))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::Record;
    use crate::features::TextFeaturizerOptions;
    use crate::pipeline::MlContext;
    use crate::sdca::SdcaOptions;

    fn trained() -> TrainedModel {
        TrainedModel::fit(
            &MlContext::new(0),
            &[
                Record::new(1, "Электронный аукцион"),
                Record::new(2, "котировка"),
            ],
            &TextFeaturizerOptions::default(),
            &SdcaOptions::default(),
        )
        .unwrap()
    }

    fn write_archive(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    fn manifest_json(format_version: u32, sha: &str) -> Vec<u8> {
        serde_json::to_vec(&ModelManifest {
            format_version,
            producer_version: "0.0.0".to_string(),
            created_at: Utc::now(),
            payload_sha256: sha.to_string(),
            num_classes: 0,
            feature_dim: 0,
        })
        .unwrap()
    }

    fn classifier_error(err: anyhow::Error) -> ClassifierError {
        err.downcast_ref::<ClassifierError>()
            .cloned()
            .expect("expected a classifier error")
    }

    #[test]
    fn test_round_trip_preserves_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Models").join("model.zip");
        let model = trained();

        let manifest = save_model(&model, &path).unwrap();
        assert_eq!(manifest.num_classes, 2);

        let loaded = load_model(&path).unwrap();
        for text in ["Электронный аукцион", "котировка", "что-то новое"] {
            assert_eq!(
                model.prediction_engine().predict_text(text),
                loaded.prediction_engine().predict_text(text)
            );
        }
        assert_eq!(read_manifest(&path).unwrap(), manifest);
    }

    #[test]
    fn test_save_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.zip");
        std::fs::write(&path, b"stale").unwrap();

        save_model(&trained(), &path).unwrap();
        assert!(load_model(&path).is_ok());
    }

    #[test]
    fn test_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_model(&dir.path().join("absent.zip")).unwrap_err();
        assert!(err.downcast_ref::<std::io::Error>().is_some());
    }

    #[test]
    fn test_non_archive_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.zip");
        std::fs::write(&path, b"not a zip archive").unwrap();

        let err = load_model(&path).unwrap_err();
        assert!(err.to_string().contains("Not a model archive"));
    }

    #[test]
    fn test_missing_payload_entry_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.zip");
        let manifest = manifest_json(FORMAT_VERSION, "");
        write_archive(&path, &[(MANIFEST_ENTRY, manifest.as_slice())]);

        let err = classifier_error(load_model(&path).unwrap_err());
        assert_eq!(err, ClassifierError::MissingEntry(MODEL_ENTRY.to_string()));
    }

    #[test]
    fn test_future_format_version_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.zip");
        let manifest = manifest_json(FORMAT_VERSION + 1, "");
        write_archive(
            &path,
            &[
                (MANIFEST_ENTRY, manifest.as_slice()),
                (MODEL_ENTRY, b"{}".as_slice()),
            ],
        );

        let err = classifier_error(load_model(&path).unwrap_err());
        assert_eq!(
            err,
            ClassifierError::UnsupportedFormat {
                found: FORMAT_VERSION + 1,
                expected: FORMAT_VERSION
            }
        );
    }

    #[test]
    fn test_tampered_payload_fails_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.zip");
        let payload = serde_json::to_vec(&trained()).unwrap();
        let sha = hex::encode(Sha256::digest(&payload));

        let mut tampered = payload.clone();
        tampered.push(b' ');
        let manifest = manifest_json(FORMAT_VERSION, &sha);
        write_archive(
            &path,
            &[
                (MANIFEST_ENTRY, manifest.as_slice()),
                (MODEL_ENTRY, tampered.as_slice()),
            ],
        );

        let err = classifier_error(load_model(&path).unwrap_err());
        assert!(matches!(err, ClassifierError::ChecksumMismatch { .. }));
    }
}
