// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Train → evaluate → persist → predict pipeline
//!
//! Orchestrates:
//! - Training and test dataset loading
//! - Feature pipeline fitting and SDCA training
//! - A smoke prediction on the just-trained model
//! - Model persistence
//! - Test-set evaluation
//! - Predictions from the reloaded model
//! - Results serialization

use crate::datasets::Dataset;
use crate::features::TextFeaturizerOptions;
use crate::metrics::MulticlassMetrics;
use crate::model::TrainedModel;
use crate::persistence::{load_model, save_model};
use crate::sdca::{SdcaOptions, TrainingSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Shared settings handed to every stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MlContext {
    seed: u64,
}

impl MlContext {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

/// Configuration for a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Random seed for the trainer's example order
    pub seed: u64,
    pub train_path: PathBuf,
    pub test_path: PathBuf,
    pub model_path: PathBuf,
    pub featurizer: TextFeaturizerOptions,
    pub trainer: SdcaOptions,
    /// Text classified right after training, before the model is saved
    pub smoke_text: String,
    /// Texts classified with the reloaded model
    pub predict_texts: Vec<String>,
    /// Report top-k accuracy for this k
    pub top_k: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            train_path: Path::new("Data").join("placing_way.tsv"),
            test_path: Path::new("Data").join("placing_way_test.tsv"),
            model_path: Path::new("Models").join("model.zip"),
            featurizer: TextFeaturizerOptions::default(),
            trainer: SdcaOptions::default(),
            smoke_text: "Электронный аукцион".to_string(),
            predict_texts: vec!["котировка".to_string()],
            top_k: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub name: String,
    pub path: PathBuf,
    pub rows: usize,
    pub label_distribution: BTreeMap<i32, usize>,
}

impl DatasetInfo {
    fn describe(dataset: &Dataset, path: &Path) -> Self {
        Self {
            name: dataset.name.clone(),
            path: path.to_path_buf(),
            rows: dataset.len(),
            label_distribution: Dataset::label_distribution(&dataset.records),
        }
    }
}

/// One classified text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSample {
    pub text: String,
    pub predicted_label: i32,
    pub confidence: f64,
}

/// Everything a run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResults {
    pub config: PipelineConfig,
    pub train: DatasetInfo,
    pub test: DatasetInfo,
    pub training: TrainingSummary,
    pub metrics: MulticlassMetrics,
    pub smoke_prediction: PredictionSample,
    pub predictions: Vec<PredictionSample>,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

/// Main training pipeline
pub struct ConformityPipeline {
    config: PipelineConfig,
    context: MlContext,
}

impl ConformityPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let context = MlContext::new(config.seed);
        Self { config, context }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn load_dataset(path: &Path, name: &str) -> Result<Dataset> {
        tracing::info!("=============== Loading Dataset ({}) ===============", name);
        let dataset = Dataset::load_tsv(path, name)?;
        tracing::info!(
            "=============== Finished Loading Dataset: {} rows from {} ===============",
            dataset.len(),
            path.display()
        );
        Ok(dataset)
    }

    /// Fit the feature pipeline and SDCA trainer
    pub fn train(&self, train: &Dataset) -> Result<TrainedModel> {
        tracing::info!("=============== Training the model ===============");
        let model = TrainedModel::fit(
            &self.context,
            &train.records,
            &self.config.featurizer,
            &self.config.trainer,
        )
        .with_context(|| format!("Failed to train on {}", train.name))?;
        tracing::info!(
            "=============== Finished Training the model Ending time: {} ===============",
            Utc::now().format("%Y-%m-%d %H:%M:%S")
        );
        Ok(model)
    }

    pub fn evaluate(&self, model: &TrainedModel, test: &Dataset) -> Result<MulticlassMetrics> {
        tracing::info!(
            "=============== Evaluating to get model's accuracy metrics - Starting time: {} ===============",
            Utc::now().format("%Y-%m-%d %H:%M:%S")
        );
        let metrics = MulticlassMetrics::evaluate(model, test, self.config.top_k)
            .with_context(|| format!("Failed to evaluate on {}", test.name))?;
        tracing::info!(
            "=============== Evaluating to get model's accuracy metrics - Ending time: {} ===============",
            Utc::now().format("%Y-%m-%d %H:%M:%S")
        );
        Ok(metrics)
    }

    /// Reload the saved model and classify the configured texts
    pub fn predict_from_saved(&self) -> Result<Vec<PredictionSample>> {
        let model = load_model(&self.config.model_path)?;
        let engine = model.prediction_engine();

        let samples: Vec<PredictionSample> = self
            .config
            .predict_texts
            .iter()
            .map(|text| classify(&engine, text))
            .collect();

        for sample in &samples {
            tracing::info!(
                "=============== Single Prediction - Result: {} ===============",
                sample.predicted_label
            );
        }
        Ok(samples)
    }

    /// Run every stage in order; any failure aborts the run
    pub fn run(&self) -> Result<PipelineResults> {
        let train = Self::load_dataset(&self.config.train_path, "training data")?;

        tracing::info!("=============== Processing Data ===============");
        let model = self.train(&train)?;

        tracing::info!("=============== Single Prediction just-trained-model ===============");
        let smoke_prediction = classify(&model.prediction_engine(), &self.config.smoke_text);
        tracing::info!(
            "=============== Single Prediction just-trained-model - Result: {} ===============",
            smoke_prediction.predicted_label
        );

        save_model(&model, &self.config.model_path)?;

        let test = Self::load_dataset(&self.config.test_path, "test data")?;
        let metrics = self.evaluate(&model, &test)?;

        let predictions = self.predict_from_saved()?;

        Ok(PipelineResults {
            config: self.config.clone(),
            train: DatasetInfo::describe(&train, &self.config.train_path),
            test: DatasetInfo::describe(&test, &self.config.test_path),
            training: model.training.clone(),
            metrics,
            smoke_prediction,
            predictions,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    /// Save results to a JSON file
    pub fn save_results(results: &PipelineResults, output_path: &Path) -> Result<()> {
        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(output_path, json)
            .with_context(|| format!("Failed to write results to {}", output_path.display()))?;
        tracing::info!("Results saved to {}", output_path.display());
        Ok(())
    }
}

fn classify(engine: &crate::model::PredictionEngine<'_>, text: &str) -> PredictionSample {
    let prediction = engine.predict_text(text);
    PredictionSample {
        text: text.to_string(),
        predicted_label: prediction.predicted_label,
        confidence: prediction.confidence(),
    }
}
