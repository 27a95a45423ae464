// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Dataset loading for the placing-way classifier
//!
//! Files are UTF-8, tab-separated, with a header row. Column 0 holds the
//! integer category code, column 1 the text. Extra columns are ignored and
//! quotes are taken literally.

use crate::error::ClassifierError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// A single labelled example
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Category code
    pub label: i32,
    /// Text to classify
    pub text: String,
}

impl Record {
    pub fn new(label: i32, text: impl Into<String>) -> Self {
        Self {
            label,
            text: text.into(),
        }
    }

    /// Prediction input: only the text is read, the label stays at its default
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new(0, text)
    }
}

/// A loaded dataset held in memory
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub name: String,
    pub records: Vec<Record>,
}

impl Dataset {
    pub fn from_records(name: &str, records: Vec<Record>) -> Self {
        Self {
            name: name.to_string(),
            records,
        }
    }

    /// Load a tab-separated file with a header row
    pub fn load_tsv(path: &Path, name: &str) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to open dataset file: {}", path.display()))?;

        Self::parse_tsv(&bytes, name)
            .with_context(|| format!("Failed to parse dataset file: {}", path.display()))
    }

    /// Parse tab-separated bytes; any malformed row aborts the whole load
    pub fn parse_tsv(bytes: &[u8], name: &str) -> Result<Self> {
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        let text = std::str::from_utf8(bytes).map_err(|e| ClassifierError::Encoding {
            offset: e.valid_up_to(),
        })?;

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(true)
            .quoting(false)
            .from_reader(text.as_bytes());

        let mut records = Vec::new();

        for (idx, result) in reader.records().enumerate() {
            let row = result.with_context(|| format!("Failed to read record {} of {}", idx, name))?;
            // Header is line 1
            let line = row.position().map_or(idx as u64 + 2, |p| p.line());

            let label_field = row.get(0).map(str::trim).unwrap_or("");
            if label_field.is_empty() {
                return Err(ClassifierError::MissingColumn { line, column: "label" }.into());
            }
            let text = row
                .get(1)
                .ok_or(ClassifierError::MissingColumn { line, column: "text" })?;

            let label: i32 = label_field.parse().map_err(|_| ClassifierError::InvalidLabel {
                line,
                value: label_field.to_string(),
            })?;

            records.push(Record::new(label, text));
        }

        tracing::debug!("Parsed {} records for {}", records.len(), name);

        Ok(Self::from_records(name, records))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Count of records per label, ordered by label code
    pub fn label_distribution(records: &[Record]) -> BTreeMap<i32, usize> {
        let mut dist = BTreeMap::new();
        for record in records {
            *dist.entry(record.label).or_insert(0) += 1;
        }
        dist
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(input: &str) -> Result<Dataset> {
        Dataset::parse_tsv(input.as_bytes(), "test")
    }

    fn schema_error(result: Result<Dataset>) -> ClassifierError {
        result
            .unwrap_err()
            .downcast_ref::<ClassifierError>()
            .cloned()
            .expect("expected a schema error")
    }

    #[test]
    fn test_parse_cyrillic_rows() {
        let dataset = parse("Con\tName\n1\tЭлектронный аукцион\n2\tкотировка\n").unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.records[0], Record::new(1, "Электронный аукцион"));
        assert_eq!(dataset.records[1], Record::new(2, "котировка"));
    }

    #[test]
    fn test_bom_crlf_and_extra_columns() {
        let dataset = parse("\u{feff}Con\tName\r\n3\tзапрос предложений\tignored\r\n").unwrap();

        assert_eq!(dataset.records, vec![Record::new(3, "запрос предложений")]);
    }

    #[test]
    fn test_quotes_are_literal() {
        let dataset = parse("Con\tName\n4\tООО \"Ромашка\"\n").unwrap();
        assert_eq!(dataset.records[0].text, "ООО \"Ромашка\"");
    }

    #[test]
    fn test_empty_text_is_allowed() {
        let dataset = parse("Con\tName\n5\t\n").unwrap();
        assert_eq!(dataset.records[0], Record::new(5, ""));
    }

    #[test]
    fn test_missing_text_column_fails() {
        let err = schema_error(parse("Con\tName\n1\tаукцион\n2\n"));
        assert_eq!(err, ClassifierError::MissingColumn { line: 3, column: "text" });
    }

    #[test]
    fn test_missing_label_fails() {
        let err = schema_error(parse("Con\tName\n\tаукцион\n"));
        assert_eq!(err, ClassifierError::MissingColumn { line: 2, column: "label" });
    }

    #[test]
    fn test_non_integer_label_fails() {
        let err = schema_error(parse("Con\tName\none\tаукцион\n"));
        assert_eq!(
            err,
            ClassifierError::InvalidLabel {
                line: 2,
                value: "one".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_utf8_fails() {
        let mut bytes = b"Con\tName\n1\t".to_vec();
        // cp1251 "аук"
        bytes.extend_from_slice(&[0xE0, 0xF3, 0xEA]);
        bytes.push(b'\n');

        let err = schema_error(Dataset::parse_tsv(&bytes, "cp1251"));
        assert_eq!(err, ClassifierError::Encoding { offset: 11 });
    }

    #[test]
    fn test_header_only_is_empty() {
        let dataset = parse("Con\tName\n").unwrap();
        assert!(dataset.is_empty());
    }

    #[test]
    fn test_load_tsv_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "Con\tName\n1\tаукцион\n").unwrap();

        let dataset = Dataset::load_tsv(file.path(), "disk").unwrap();
        assert_eq!(dataset.name, "disk");
        assert_eq!(dataset.len(), 1);
    }

    #[test]
    fn test_load_tsv_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Dataset::load_tsv(&dir.path().join("absent.tsv"), "absent").unwrap_err();

        assert!(err.to_string().contains("Failed to open dataset file"));
        assert!(err.downcast_ref::<std::io::Error>().is_some());
    }

    #[test]
    fn test_label_distribution() {
        let records = vec![
            Record::new(2, "a"),
            Record::new(1, "b"),
            Record::new(2, "c"),
        ];
        let dist = Dataset::label_distribution(&records);

        assert_eq!(dist.get(&1), Some(&1));
        assert_eq!(dist.get(&2), Some(&2));
        assert_eq!(dist.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
    }
}
