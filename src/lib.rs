// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Multiclass text classifier for procurement placing-way codes
//!
//! This crate provides:
//! - Tab-separated dataset loading with strict schema checks
//! - A feature pipeline (label keys, word/char n-gram featurization, concatenation)
//! - An SDCA multiclass linear trainer with duality-gap convergence
//! - Multiclass evaluation metrics (micro/macro accuracy, log-loss, log-loss reduction)
//! - Model archives with manifest and checksum verification
//! - A seeded train → evaluate → persist → predict pipeline

pub mod datasets;
pub mod error;
pub mod features;
pub mod metrics;
pub mod model;
pub mod persistence;
pub mod pipeline;
pub mod sdca;

pub use datasets::{Dataset, Record};
pub use error::ClassifierError;
pub use features::{FeaturePipeline, KeyMapping, TextFeaturizer, TextFeaturizerOptions};
pub use metrics::{ConfusionMatrix, MulticlassMetrics};
pub use model::{Prediction, PredictionEngine, TrainedModel};
pub use persistence::{load_model, save_model, ModelManifest};
pub use pipeline::{ConformityPipeline, MlContext, PipelineConfig, PipelineResults};
pub use sdca::{LinearModel, SdcaMulticlassTrainer, SdcaOptions, TrainingSummary};
