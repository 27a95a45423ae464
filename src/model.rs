// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Trained model and single-item prediction

use crate::datasets::Record;
use crate::error::ClassifierError;
use crate::features::{FeaturePipeline, TextFeaturizerOptions};
use crate::pipeline::MlContext;
use crate::sdca::{LinearModel, SdcaMulticlassTrainer, SdcaOptions, TrainingSummary};
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Classification output for one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Predicted category code
    pub predicted_label: i32,
    /// Class probabilities in key order
    pub scores: Vec<f64>,
}

impl Prediction {
    /// Probability of the predicted class
    pub fn confidence(&self) -> f64 {
        self.scores.iter().copied().fold(0.0, f64::max)
    }
}

/// Fitted feature pipeline plus SDCA weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModel {
    pub pipeline: FeaturePipeline,
    pub linear: LinearModel,
    pub training: TrainingSummary,
}

impl TrainedModel {
    /// Fit value-to-key mapping, text featurizer and SDCA on labelled records
    pub fn fit(
        context: &MlContext,
        records: &[Record],
        featurizer: &TextFeaturizerOptions,
        trainer: &SdcaOptions,
    ) -> Result<Self> {
        let pipeline = FeaturePipeline::fit(records, featurizer)?;
        let (cached, _) = pipeline.checkpoint(records);

        let (linear, training) =
            SdcaMulticlassTrainer::new(trainer.clone(), context.seed()).fit(&cached)?;

        Ok(Self {
            pipeline,
            linear,
            training,
        })
    }

    /// Check that the weights match the key mapping and feature space
    pub fn validate(&self) -> Result<()> {
        let classes = self.pipeline.key_mapping.len();
        if self.linear.num_classes() != classes {
            return Err(ClassifierError::InconsistentModel(format!(
                "{} weight rows for {} label keys",
                self.linear.num_classes(),
                classes
            ))
            .into());
        }
        if self.linear.dim() != self.pipeline.dim() {
            return Err(ClassifierError::InconsistentModel(format!(
                "weights cover {} features, featurizer produces {}",
                self.linear.dim(),
                self.pipeline.dim()
            ))
            .into());
        }
        Ok(())
    }

    /// Category codes in key order
    pub fn labels(&self) -> &[i32] {
        self.pipeline.key_mapping.values()
    }

    pub fn num_classes(&self) -> usize {
        self.pipeline.key_mapping.len()
    }

    /// Class probabilities for a text, in key order
    pub fn probabilities(&self, text: &str) -> Vec<f64> {
        self.linear.probabilities(&self.pipeline.features(text))
    }

    pub fn prediction_engine(&self) -> PredictionEngine<'_> {
        PredictionEngine { model: self }
    }
}

/// Classifies one record at a time against a borrowed model
#[derive(Debug, Clone, Copy)]
pub struct PredictionEngine<'a> {
    model: &'a TrainedModel,
}

impl PredictionEngine<'_> {
    pub fn predict(&self, record: &Record) -> Prediction {
        let scores = self.model.probabilities(&record.text);
        let key = crate::sdca::argmax(&scores);
        // Keys are dense over the mapping, checked by `TrainedModel::validate`
        let predicted_label = self.model.labels()[key];

        Prediction {
            predicted_label,
            scores,
        }
    }

    pub fn predict_text(&self, text: &str) -> Prediction {
        self.predict(&Record::from_text(text))
    }
}
