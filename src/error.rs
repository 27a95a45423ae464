// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Typed failures for dataset schema and model archive problems
//!
//! Everything else propagates as `anyhow::Error`; these variants are the ones
//! callers can recover with `downcast_ref::<ClassifierError>()`.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifierError {
    /// A data row ended before the named column
    #[error("line {line}: missing `{column}` column")]
    MissingColumn { line: u64, column: &'static str },

    /// The label column did not hold an integer category code
    #[error("line {line}: label `{value}` is not an integer category code")]
    InvalidLabel { line: u64, value: String },

    /// Dataset bytes were not UTF-8
    #[error("dataset is not valid UTF-8 (first invalid byte at offset {offset})")]
    Encoding { offset: usize },

    #[error("{0} contains no usable records")]
    EmptyDataset(String),

    #[error("unsupported model format version {found} (this build reads version {expected})")]
    UnsupportedFormat { found: u32, expected: u32 },

    #[error("model payload checksum mismatch: manifest records {expected}, payload hashes to {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("model archive has no `{0}` entry")]
    MissingEntry(String),

    /// Deserialized parts of a model disagree on their shapes
    #[error("inconsistent model: {0}")]
    InconsistentModel(String),
}
