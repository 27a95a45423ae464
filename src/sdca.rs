// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! SDCA trainer for multiclass linear classification
//!
//! Minimizes `λ/2·‖W‖² + (1/n)·Σ softmax_cross_entropy(W·xᵢ + b, yᵢ)` by
//! stochastic dual coordinate ascent. Each example owns a dual vector
//! `αᵢ = e_yᵢ − qᵢ` with `qᵢ` in the probability simplex, and the primal
//! weights are kept in sync as `W = (1/λn)·Σ xᵢ·αᵢᵀ`. The bias is a constant
//! feature of value 1.
//!
//! Training stops once the relative duality gap drops below the tolerance.

use crate::error::ClassifierError;
use crate::features::{FeaturizedDataset, SparseVector};
use anyhow::Result;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Smoothness constant of softmax cross-entropy
const GAMMA: f64 = 1.0;

const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Trainer options; `None` fields are derived from the data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdcaOptions {
    /// L2 regularization strength; auto is `max(1e-4, 1/n)`
    pub l2_regularization: Option<f64>,
    /// Maximum passes over the data; auto is 100
    pub max_iterations: Option<usize>,
    /// Stop once `(primal − dual) / primal` is below this value
    pub convergence_tolerance: f64,
    /// Epochs between duality gap checks
    pub check_frequency: usize,
    /// Visit examples in a seeded random order each epoch
    pub shuffle: bool,
}

impl Default for SdcaOptions {
    fn default() -> Self {
        Self {
            l2_regularization: None,
            max_iterations: None,
            convergence_tolerance: 0.01,
            check_frequency: 1,
            shuffle: true,
        }
    }
}

/// Outcome of a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub epochs: usize,
    pub l2_regularization: f64,
    pub primal_objective: f64,
    pub dual_objective: f64,
    pub converged: bool,
}

impl TrainingSummary {
    pub fn duality_gap(&self) -> f64 {
        self.primal_objective - self.dual_objective
    }
}

/// Linear scorer: one weight row and one bias per class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    num_classes: usize,
    dim: usize,
    /// Row-major `num_classes × dim`
    weights: Vec<f64>,
    biases: Vec<f64>,
}

impl LinearModel {
    fn zeros(num_classes: usize, dim: usize) -> Self {
        Self {
            num_classes,
            dim,
            weights: vec![0.0; num_classes * dim],
            biases: vec![0.0; num_classes],
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    fn row(&self, class: usize) -> &[f64] {
        &self.weights[class * self.dim..(class + 1) * self.dim]
    }

    /// Raw per-class scores
    pub fn scores(&self, x: &SparseVector) -> Vec<f64> {
        (0..self.num_classes)
            .map(|k| x.dot(self.row(k)) + self.biases[k])
            .collect()
    }

    /// Softmax probabilities per class
    pub fn probabilities(&self, x: &SparseVector) -> Vec<f64> {
        softmax(&self.scores(x))
    }

    /// Highest-scoring key; ties go to the lower key
    pub fn predict_key(&self, x: &SparseVector) -> usize {
        argmax(&self.scores(x))
    }

    fn squared_norm(&self) -> f64 {
        self.weights.iter().chain(self.biases.iter()).map(|w| w * w).sum()
    }

    /// Add `scale · x · deltaᵀ` to the weights, with the bias feature included
    fn add_outer(&mut self, x: &SparseVector, delta: &[f64], scale: f64) {
        for (k, d) in delta.iter().enumerate() {
            if *d == 0.0 {
                continue;
            }
            let step = scale * d;
            let row = k * self.dim;
            for (i, v) in &x.entries {
                self.weights[row + i] += step * v;
            }
            self.biases[k] += step;
        }
    }
}

pub fn softmax(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

fn log_sum_exp(scores: &[f64]) -> f64 {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    max + scores.iter().map(|s| (s - max).exp()).sum::<f64>().ln()
}

pub(crate) fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (k, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = k;
        }
    }
    best
}

fn entropy(q: &[f64]) -> f64 {
    q.iter().filter(|p| **p > 0.0).map(|p| -p * p.ln()).sum()
}

/// Stochastic dual coordinate ascent over a cached featurized dataset
#[derive(Debug, Clone)]
pub struct SdcaMulticlassTrainer {
    options: SdcaOptions,
    seed: u64,
}

impl SdcaMulticlassTrainer {
    pub fn new(options: SdcaOptions, seed: u64) -> Self {
        Self { options, seed }
    }

    pub fn fit(&self, data: &FeaturizedDataset) -> Result<(LinearModel, TrainingSummary)> {
        if data.is_empty() || data.num_classes == 0 {
            return Err(ClassifierError::EmptyDataset("training data".to_string()).into());
        }

        let n = data.len();
        let k = data.num_classes;
        let lambda = self
            .options
            .l2_regularization
            .unwrap_or_else(|| (1.0 / n as f64).max(1e-4));
        if !(lambda > 0.0) {
            anyhow::bail!("L2 regularization must be positive, got {}", lambda);
        }
        let max_iterations = self
            .options
            .max_iterations
            .unwrap_or(DEFAULT_MAX_ITERATIONS)
            .max(1);
        let check_frequency = self.options.check_frequency.max(1);

        let lambda_n = lambda * n as f64;
        let scale = 1.0 / lambda_n;

        let mut model = LinearModel::zeros(k, data.dim);
        let mut duals = vec![0.0; n * k];
        let mut order: Vec<usize> = (0..n).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);

        // Step sizes depend only on the row norm (bias feature included)
        let steps: Vec<f64> = data
            .rows
            .iter()
            .map(|row| lambda_n * GAMMA / (row.features.squared_norm() + 1.0 + lambda_n * GAMMA))
            .collect();

        tracing::info!(
            "SDCA: {} examples, {} classes, {} features, λ={:.3e}",
            n,
            k,
            data.dim,
            lambda
        );

        let mut summary = TrainingSummary {
            epochs: 0,
            l2_regularization: lambda,
            primal_objective: f64::INFINITY,
            dual_objective: f64::NEG_INFINITY,
            converged: false,
        };
        let mut delta = vec![0.0; k];

        for epoch in 1..=max_iterations {
            if self.options.shuffle {
                order.shuffle(&mut rng);
            }

            for &i in &order {
                let row = &data.rows[i];
                let probs = model.probabilities(&row.features);
                let alpha = &mut duals[i * k..(i + 1) * k];
                let s = steps[i];

                for c in 0..k {
                    let target = if c == row.key { 1.0 } else { 0.0 };
                    let u = target - probs[c];
                    delta[c] = s * (u - alpha[c]);
                    alpha[c] += delta[c];
                }

                model.add_outer(&row.features, &delta, scale);
            }

            summary.epochs = epoch;

            if epoch % check_frequency == 0 || epoch == max_iterations {
                let (primal, dual) = objectives(&model, data, &duals, lambda);
                summary.primal_objective = primal;
                summary.dual_objective = dual;

                let gap = (primal - dual) / primal.abs().max(f64::EPSILON);
                tracing::debug!(
                    "SDCA epoch {}: primal={:.6} dual={:.6} gap={:.3e}",
                    epoch,
                    primal,
                    dual,
                    gap
                );

                if gap < self.options.convergence_tolerance {
                    summary.converged = true;
                    break;
                }
            }
        }

        if summary.converged {
            tracing::info!("SDCA converged after {} epochs", summary.epochs);
        } else {
            tracing::warn!(
                "SDCA stopped after {} epochs without reaching tolerance {} (gap {:.3e})",
                summary.epochs,
                self.options.convergence_tolerance,
                summary.duality_gap()
            );
        }

        Ok((model, summary))
    }
}

/// Primal and dual objective values for the current iterate
fn objectives(model: &LinearModel, data: &FeaturizedDataset, duals: &[f64], lambda: f64) -> (f64, f64) {
    let n = data.len() as f64;
    let k = data.num_classes;
    let regularizer = lambda / 2.0 * model.squared_norm();

    let mut loss = 0.0;
    let mut dual_entropy = 0.0;
    let mut q = vec![0.0; k];

    for (i, row) in data.rows.iter().enumerate() {
        let scores = model.scores(&row.features);
        loss += log_sum_exp(&scores) - scores[row.key];

        // qᵢ = e_yᵢ − αᵢ
        for (c, slot) in q.iter_mut().enumerate() {
            let target = if c == row.key { 1.0 } else { 0.0 };
            *slot = target - duals[i * k + c];
        }
        dual_entropy += entropy(&q);
    }

    (loss / n + regularizer, dual_entropy / n - regularizer)
}
