// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Feature pipeline: label keys, text featurization and concatenation
//!
//! Implements:
//! - Value-to-key mapping for the label column (keys in order of first occurrence)
//! - Text featurization into word and character n-gram counts, L2-normalized
//! - Concatenation of sparse feature blocks into one `Features` vector
//! - An in-memory cache checkpoint of the featurized training rows

use crate::datasets::Record;
use crate::error::ClassifierError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

const TEXT_START: char = '\u{2}';
const TEXT_END: char = '\u{3}';

/// Sparse vector with entries sorted by index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub dim: usize,
    pub entries: Vec<(usize, f64)>,
}

impl SparseVector {
    pub fn from_counts(dim: usize, counts: BTreeMap<usize, f64>) -> Self {
        Self {
            dim,
            entries: counts.into_iter().collect(),
        }
    }

    pub fn squared_norm(&self) -> f64 {
        self.entries.iter().map(|(_, v)| v * v).sum()
    }

    /// Dot product with a dense slice of at least `dim` values
    pub fn dot(&self, dense: &[f64]) -> f64 {
        self.entries.iter().map(|(i, v)| dense[*i] * v).sum()
    }

    pub fn l2_normalize(&mut self) {
        let norm = self.squared_norm().sqrt();
        if norm > 0.0 {
            for (_, v) in &mut self.entries {
                *v /= norm;
            }
        }
    }

    pub fn nnz(&self) -> usize {
        self.entries.len()
    }
}

/// Join feature blocks end to end, offsetting each block's indices
pub fn concatenate(blocks: &[SparseVector]) -> SparseVector {
    let mut out = SparseVector::default();
    for block in blocks {
        let offset = out.dim;
        out.entries
            .extend(block.entries.iter().map(|(i, v)| (i + offset, *v)));
        out.dim += block.dim;
    }
    out
}

/// Maps raw label codes to dense keys `0..len` and back
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMapping {
    values: Vec<i32>,
}

impl KeyMapping {
    /// Keys follow the order in which labels first appear
    pub fn fit<I: IntoIterator<Item = i32>>(labels: I) -> Self {
        let mut values = Vec::new();
        for label in labels {
            if !values.contains(&label) {
                values.push(label);
            }
        }
        Self { values }
    }

    pub fn to_key(&self, value: i32) -> Option<usize> {
        self.values.iter().position(|v| *v == value)
    }

    pub fn to_value(&self, key: usize) -> Option<i32> {
        self.values.get(key).copied()
    }

    pub fn values(&self) -> &[i32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Text featurizer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextFeaturizerOptions {
    /// Fold the text to lower case before extracting n-grams
    pub lowercase: bool,
    /// Word n-grams of every length from 1 up to this value; 0 disables words
    pub word_ngram_length: usize,
    /// Character n-grams of exactly this length; 0 disables characters
    pub char_ngram_length: usize,
    pub l2_normalize: bool,
}

impl Default for TextFeaturizerOptions {
    fn default() -> Self {
        Self {
            lowercase: true,
            word_ngram_length: 1,
            char_ngram_length: 3,
            l2_normalize: true,
        }
    }
}

/// Bag of word and character n-grams with a vocabulary fixed at fit time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextFeaturizer {
    options: TextFeaturizerOptions,
    word_vocab: HashMap<String, usize>,
    char_vocab: HashMap<String, usize>,
}

impl TextFeaturizer {
    pub fn fit<'a, I>(options: TextFeaturizerOptions, texts: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut featurizer = Self {
            options,
            word_vocab: HashMap::new(),
            char_vocab: HashMap::new(),
        };

        for text in texts {
            let normalized = featurizer.normalize(text);
            for gram in featurizer.word_ngrams(&normalized) {
                let next = featurizer.word_vocab.len();
                featurizer.word_vocab.entry(gram).or_insert(next);
            }
            for gram in featurizer.char_ngrams(&normalized) {
                let next = featurizer.char_vocab.len();
                featurizer.char_vocab.entry(gram).or_insert(next);
            }
        }

        featurizer
    }

    pub fn options(&self) -> &TextFeaturizerOptions {
        &self.options
    }

    pub fn dim(&self) -> usize {
        self.word_vocab.len() + self.char_vocab.len()
    }

    pub fn vocabulary_sizes(&self) -> (usize, usize) {
        (self.word_vocab.len(), self.char_vocab.len())
    }

    /// Featurize one text; n-grams outside the vocabulary are dropped
    pub fn transform(&self, text: &str) -> SparseVector {
        let normalized = self.normalize(text);

        let mut word_counts = BTreeMap::new();
        for gram in self.word_ngrams(&normalized) {
            if let Some(&idx) = self.word_vocab.get(&gram) {
                *word_counts.entry(idx).or_insert(0.0) += 1.0;
            }
        }

        let mut char_counts = BTreeMap::new();
        for gram in self.char_ngrams(&normalized) {
            if let Some(&idx) = self.char_vocab.get(&gram) {
                *char_counts.entry(idx).or_insert(0.0) += 1.0;
            }
        }

        let mut features = concatenate(&[
            SparseVector::from_counts(self.word_vocab.len(), word_counts),
            SparseVector::from_counts(self.char_vocab.len(), char_counts),
        ]);
        if self.options.l2_normalize {
            features.l2_normalize();
        }
        features
    }

    /// Case folding plus whitespace collapsing
    fn normalize(&self, text: &str) -> String {
        let folded = if self.options.lowercase {
            text.to_lowercase()
        } else {
            text.to_string()
        };
        folded.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn word_ngrams(&self, normalized: &str) -> Vec<String> {
        let tokens: Vec<&str> = normalized
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| !s.is_empty())
            .collect();

        let mut grams = Vec::new();
        for n in 1..=self.options.word_ngram_length {
            for window in tokens.windows(n) {
                grams.push(window.join(" "));
            }
        }
        grams
    }

    fn char_ngrams(&self, normalized: &str) -> Vec<String> {
        let n = self.options.char_ngram_length;
        if n == 0 {
            return Vec::new();
        }

        let chars: Vec<char> = std::iter::once(TEXT_START)
            .chain(normalized.chars())
            .chain(std::iter::once(TEXT_END))
            .collect();

        chars.windows(n).map(|w| w.iter().collect()).collect()
    }
}

/// One cached training row
#[derive(Debug, Clone)]
pub struct FeaturizedRow {
    pub key: usize,
    pub features: SparseVector,
}

/// Featurized rows materialized once so trainer passes skip featurization
#[derive(Debug, Clone)]
pub struct FeaturizedDataset {
    pub rows: Vec<FeaturizedRow>,
    pub dim: usize,
    pub num_classes: usize,
}

impl FeaturizedDataset {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Fitted value-to-key mapping, text featurizer and feature concatenation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturePipeline {
    pub key_mapping: KeyMapping,
    pub featurizer: TextFeaturizer,
}

impl FeaturePipeline {
    pub fn fit(records: &[Record], options: &TextFeaturizerOptions) -> Result<Self> {
        if records.is_empty() {
            return Err(ClassifierError::EmptyDataset("training data".to_string()).into());
        }

        let key_mapping = KeyMapping::fit(records.iter().map(|r| r.label));
        let featurizer =
            TextFeaturizer::fit(options.clone(), records.iter().map(|r| r.text.as_str()));

        let (words, chars) = featurizer.vocabulary_sizes();
        tracing::debug!(
            "Feature pipeline fitted: {} classes, {} word n-grams, {} char n-grams",
            key_mapping.len(),
            words,
            chars
        );

        Ok(Self {
            key_mapping,
            featurizer,
        })
    }

    /// The `Features` column for one text
    pub fn features(&self, text: &str) -> SparseVector {
        concatenate(&[self.featurizer.transform(text)])
    }

    pub fn dim(&self) -> usize {
        self.featurizer.dim()
    }

    /// Featurize labelled records into the in-memory cache
    ///
    /// Records whose label has no key are skipped; the count is returned
    /// alongside the cached rows.
    pub fn checkpoint(&self, records: &[Record]) -> (FeaturizedDataset, usize) {
        let mut rows = Vec::with_capacity(records.len());
        let mut skipped = 0;

        for record in records {
            match self.key_mapping.to_key(record.label) {
                Some(key) => rows.push(FeaturizedRow {
                    key,
                    features: self.features(&record.text),
                }),
                None => skipped += 1,
            }
        }

        let dataset = FeaturizedDataset {
            rows,
            dim: self.dim(),
            num_classes: self.key_mapping.len(),
        };
        (dataset, skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_mapping_first_occurrence_order() {
        let mapping = KeyMapping::fit(vec![5, 2, 5, 9, 2]);

        assert_eq!(mapping.values(), &[5, 2, 9]);
        assert_eq!(mapping.to_key(5), Some(0));
        assert_eq!(mapping.to_key(9), Some(2));
        assert_eq!(mapping.to_key(7), None);
        assert_eq!(mapping.to_value(1), Some(2));
        assert_eq!(mapping.to_value(3), None);
    }

    #[test]
    fn test_concatenate_offsets_indices() {
        let a = SparseVector {
            dim: 3,
            entries: vec![(0, 1.0), (2, 2.0)],
        };
        let b = SparseVector {
            dim: 2,
            entries: vec![(1, 4.0)],
        };

        let joined = concatenate(&[a, b]);
        assert_eq!(joined.dim, 5);
        assert_eq!(joined.entries, vec![(0, 1.0), (2, 2.0), (4, 4.0)]);
    }

    #[test]
    fn test_transform_is_l2_normalized() {
        let featurizer = TextFeaturizer::fit(
            TextFeaturizerOptions::default(),
            vec!["Электронный аукцион", "котировка"],
        );
        let features = featurizer.transform("Электронный аукцион");

        assert!((features.squared_norm() - 1.0).abs() < 1e-9);
        assert_eq!(features.dim, featurizer.dim());
    }

    #[test]
    fn test_case_and_whitespace_are_normalized() {
        let featurizer =
            TextFeaturizer::fit(TextFeaturizerOptions::default(), vec!["Электронный аукцион"]);

        assert_eq!(
            featurizer.transform("ЭЛЕКТРОННЫЙ   аукцион"),
            featurizer.transform("электронный аукцион")
        );
    }

    #[test]
    fn test_unknown_text_yields_empty_vector() {
        let featurizer = TextFeaturizer::fit(TextFeaturizerOptions::default(), vec!["abc"]);
        let features = featurizer.transform("xyz");

        assert_eq!(features.nnz(), 0);
        assert_eq!(features.squared_norm(), 0.0);
    }

    #[test]
    fn test_word_bigrams_when_enabled() {
        let options = TextFeaturizerOptions {
            word_ngram_length: 2,
            char_ngram_length: 0,
            ..TextFeaturizerOptions::default()
        };
        let featurizer = TextFeaturizer::fit(options, vec!["запрос котировок цен"]);

        // 3 unigrams + 2 bigrams
        assert_eq!(featurizer.vocabulary_sizes(), (5, 0));
    }

    #[test]
    fn test_char_ngrams_include_boundaries() {
        let options = TextFeaturizerOptions {
            word_ngram_length: 0,
            char_ngram_length: 3,
            ..TextFeaturizerOptions::default()
        };
        let featurizer = TextFeaturizer::fit(options, vec!["ab"]);

        // <start>ab, ab<end>
        assert_eq!(featurizer.vocabulary_sizes(), (0, 2));
    }

    #[test]
    fn test_pipeline_checkpoint_skips_unknown_labels() {
        let train = vec![Record::new(1, "аукцион"), Record::new(2, "котировка")];
        let pipeline = FeaturePipeline::fit(&train, &TextFeaturizerOptions::default()).unwrap();

        let rows = vec![Record::new(2, "котировка"), Record::new(3, "конкурс")];
        let (cached, skipped) = pipeline.checkpoint(&rows);

        assert_eq!(skipped, 1);
        assert_eq!(cached.len(), 1);
        assert_eq!(cached.rows[0].key, 1);
        assert_eq!(cached.num_classes, 2);
        assert_eq!(cached.dim, pipeline.dim());
    }

    #[test]
    fn test_pipeline_rejects_empty_training_data() {
        let err = FeaturePipeline::fit(&[], &TextFeaturizerOptions::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ClassifierError>(),
            Some(ClassifierError::EmptyDataset(_))
        ));
    }
}
