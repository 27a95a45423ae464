// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Evaluation metrics for multiclass classification
//!
//! Implements:
//! - Confusion matrix over label keys
//! - Micro accuracy (fraction of rows classified correctly)
//! - Macro accuracy (mean per-class recall over classes present in the truth)
//! - Log-loss and log-loss reduction against the empirical class prior
//! - Optional top-k accuracy and per-class precision/recall/F1/log-loss

use crate::datasets::Dataset;
use crate::error::ClassifierError;
use crate::model::TrainedModel;
use crate::sdca::argmax;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Probabilities are clipped here before taking the log
const PROBABILITY_FLOOR: f64 = 1e-15;

/// Counts indexed `[truth][predicted]` over label keys
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Category code for each key
    pub labels: Vec<i32>,
    pub counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn new(labels: &[i32]) -> Self {
        let k = labels.len();
        Self {
            labels: labels.to_vec(),
            counts: vec![vec![0; k]; k],
        }
    }

    pub fn record(&mut self, truth: usize, predicted: usize) {
        self.counts[truth][predicted] += 1;
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.labels.len()).map(|k| self.counts[k][k]).sum()
    }

    /// Rows whose truth is `class`
    pub fn support(&self, class: usize) -> usize {
        self.counts[class].iter().sum()
    }

    /// TP / (TP + FN)
    pub fn recall(&self, class: usize) -> f64 {
        let support = self.support(class);
        if support == 0 {
            return 0.0;
        }
        self.counts[class][class] as f64 / support as f64
    }

    /// TP / (TP + FP)
    pub fn precision(&self, class: usize) -> f64 {
        let predicted: usize = self.counts.iter().map(|row| row[class]).sum();
        if predicted == 0 {
            return 0.0;
        }
        self.counts[class][class] as f64 / predicted as f64
    }

    pub fn f1_score(&self, class: usize) -> f64 {
        let precision = self.precision(class);
        let recall = self.recall(class);
        let denom = precision + recall;
        if denom == 0.0 {
            return 0.0;
        }
        2.0 * precision * recall / denom
    }

    pub fn format(&self) -> String {
        let mut output = String::from("Confusion Matrix (rows = truth, columns = predicted):\n");
        output.push_str(&format!("{:>10}", ""));
        for label in &self.labels {
            output.push_str(&format!(" {:>8}", label));
        }
        output.push('\n');
        for (label, row) in self.labels.iter().zip(&self.counts) {
            output.push_str(&format!("{:>10}", label));
            for count in row {
                output.push_str(&format!(" {:>8}", count));
            }
            output.push('\n');
        }
        output
    }
}

/// Per-class breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub log_loss: f64,
    pub support: usize,
}

/// Multiclass evaluation result over a test set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MulticlassMetrics {
    pub micro_accuracy: f64,
    pub macro_accuracy: f64,
    pub log_loss: f64,
    pub log_loss_reduction: f64,
    pub top_k: Option<usize>,
    pub top_k_accuracy: Option<f64>,
    /// Keyed by category code
    pub per_class: BTreeMap<i32, ClassMetrics>,
    pub confusion_matrix: ConfusionMatrix,
    /// Rows that took part in the metrics
    pub support: usize,
    /// Rows skipped because their label never appeared in training
    pub skipped_rows: usize,
}

impl MulticlassMetrics {
    /// Score every test row with the model and compute metrics
    pub fn evaluate(model: &TrainedModel, dataset: &Dataset, top_k: Option<usize>) -> Result<Self> {
        let (cached, skipped) = model.pipeline.checkpoint(&dataset.records);
        if skipped > 0 {
            tracing::warn!(
                "{}: skipped {} rows whose label was not seen during training",
                dataset.name,
                skipped
            );
        }
        if cached.is_empty() {
            return Err(ClassifierError::EmptyDataset(dataset.name.clone()).into());
        }

        let truth: Vec<usize> = cached.rows.iter().map(|r| r.key).collect();
        let probabilities: Vec<Vec<f64>> = cached
            .rows
            .iter()
            .map(|r| model.linear.probabilities(&r.features))
            .collect();

        Ok(Self::from_probabilities(
            model.labels(),
            &truth,
            &probabilities,
            top_k,
            skipped,
        ))
    }

    /// Compute metrics from per-row class probabilities in key order
    pub fn from_probabilities(
        labels: &[i32],
        truth: &[usize],
        probabilities: &[Vec<f64>],
        top_k: Option<usize>,
        skipped_rows: usize,
    ) -> Self {
        assert_eq!(truth.len(), probabilities.len(), "Truth and probability lengths must match");

        let k = labels.len();
        let n = truth.len();
        let mut confusion_matrix = ConfusionMatrix::new(labels);
        let mut class_log_loss = vec![0.0; k];
        let mut top_k_hits = 0usize;

        for (&y, probs) in truth.iter().zip(probabilities) {
            confusion_matrix.record(y, argmax(probs));

            let p_true = probs[y];
            class_log_loss[y] += -p_true.max(PROBABILITY_FLOOR).ln();

            if let Some(top) = top_k {
                let rank = probs.iter().filter(|p| **p > p_true).count();
                if rank < top {
                    top_k_hits += 1;
                }
            }
        }

        let total_log_loss: f64 = class_log_loss.iter().sum();
        let log_loss = if n == 0 { 0.0 } else { total_log_loss / n as f64 };

        // Log-loss of always predicting the test set's class frequencies
        let prior_log_loss: f64 = (0..k)
            .map(|c| confusion_matrix.support(c) as f64 / n.max(1) as f64)
            .filter(|p| *p > 0.0)
            .map(|p| -p * p.ln())
            .sum();
        let log_loss_reduction = if prior_log_loss > 0.0 {
            (prior_log_loss - log_loss) / prior_log_loss
        } else {
            0.0
        };

        let present: Vec<usize> = (0..k).filter(|c| confusion_matrix.support(*c) > 0).collect();
        let macro_accuracy = if present.is_empty() {
            0.0
        } else {
            present.iter().map(|c| confusion_matrix.recall(*c)).sum::<f64>() / present.len() as f64
        };
        let micro_accuracy = if n == 0 {
            0.0
        } else {
            confusion_matrix.correct() as f64 / n as f64
        };

        let per_class = labels
            .iter()
            .enumerate()
            .map(|(c, label)| {
                let support = confusion_matrix.support(c);
                let metrics = ClassMetrics {
                    precision: confusion_matrix.precision(c),
                    recall: confusion_matrix.recall(c),
                    f1_score: confusion_matrix.f1_score(c),
                    log_loss: if support == 0 {
                        0.0
                    } else {
                        class_log_loss[c] / support as f64
                    },
                    support,
                };
                (*label, metrics)
            })
            .collect();

        Self {
            micro_accuracy,
            macro_accuracy,
            log_loss,
            log_loss_reduction,
            top_k,
            top_k_accuracy: top_k.map(|_| if n == 0 { 0.0 } else { top_k_hits as f64 / n as f64 }),
            per_class,
            confusion_matrix,
            support: n,
            skipped_rows,
        }
    }

    /// Format the headline block printed after evaluation
    pub fn format(&self) -> String {
        let rule = "*".repeat(100);
        let mut output = String::new();
        output.push_str(&format!("{}\n", rule));
        output.push_str("*       Metrics for Multi-class Classification model - Test Data\n");
        output.push_str(&format!("*{}\n", "-".repeat(99)));
        output.push_str(&format!("*       MicroAccuracy:    {:.3}\n", self.micro_accuracy));
        output.push_str(&format!("*       MacroAccuracy:    {:.3}\n", self.macro_accuracy));
        output.push_str(&format!("*       LogLoss:          {:.3}\n", self.log_loss));
        output.push_str(&format!("*       LogLossReduction: {:.3}\n", self.log_loss_reduction));
        if let (Some(k), Some(acc)) = (self.top_k, self.top_k_accuracy) {
            output.push_str(&format!("*       Top-{} Accuracy:   {:.3}\n", k, acc));
        }
        output.push_str(&format!("{}\n", rule));
        output
    }

    /// Per-class table and confusion matrix
    pub fn format_details(&self) -> String {
        let mut output = String::from("Per-Class Metrics:\n");
        for (label, m) in &self.per_class {
            output.push_str(&format!(
                "  {}: P={:.4} R={:.4} F1={:.4} LogLoss={:.4} (n={})\n",
                label, m.precision, m.recall, m.f1_score, m.log_loss, m.support
            ));
        }
        output.push('\n');
        output.push_str(&self.confusion_matrix.format());
        if self.skipped_rows > 0 {
            output.push_str(&format!("\nSkipped rows (unseen label): {}\n", self.skipped_rows));
        }
        output
    }
}
