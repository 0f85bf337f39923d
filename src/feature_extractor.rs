//! Feature extraction for the anomaly models.
//!
//! Turns a cleaned transfer table into a dense row-per-record matrix. The
//! `amount` column is always available; any other feature must be a numeric
//! extra column of the source file.

use crate::error::{PipelineError, Result};
use crate::types::transaction::{TransactionTable, AMOUNT_COLUMN};
use ndarray::Array2;

/// Feature extractor that turns transfer records into model input rows
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    columns: Vec<String>,
}

impl FeatureExtractor {
    /// Create an extractor over the given feature columns
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    /// Number of features per row
    pub fn feature_count(&self) -> usize {
        self.columns.len()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.columns
    }

    /// Extract the feature matrix, one row per record in table order
    pub fn extract(&self, table: &TransactionTable) -> Result<Array2<f64>> {
        if self.columns.is_empty() {
            return Err(PipelineError::format("no feature columns configured"));
        }

        let sources = self
            .columns
            .iter()
            .map(|column| {
                if column == AMOUNT_COLUMN {
                    Ok(None)
                } else {
                    table.extra_index(column).map(Some).ok_or_else(|| {
                        PipelineError::format(format!("feature column '{}' is missing", column))
                    })
                }
            })
            .collect::<Result<Vec<Option<usize>>>>()?;

        let mut features = Array2::zeros((table.len(), self.feature_count()));
        for (row, record) in table.records.iter().enumerate() {
            for (col, source) in sources.iter().enumerate() {
                features[[row, col]] = match source {
                    None => record.amount,
                    Some(idx) => parse_numeric(&record.extra[*idx], &self.columns[col], row)?,
                };
            }
        }

        Ok(features)
    }

    /// Extract a 0/1 label column for supervised training
    pub fn extract_labels(table: &TransactionTable, column: &str) -> Result<Vec<u8>> {
        let idx = table.extra_index(column).ok_or_else(|| {
            PipelineError::format(format!("label column '{}' is missing", column))
        })?;

        table
            .records
            .iter()
            .enumerate()
            .map(|(row, record)| match record.extra[idx].trim() {
                "1" | "true" | "True" | "1.0" => Ok(1),
                "0" | "false" | "False" | "0.0" => Ok(0),
                other => Err(PipelineError::format(format!(
                    "record {}: label '{}' in '{}' is not 0/1",
                    row, other, column
                ))),
            })
            .collect()
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(vec![AMOUNT_COLUMN.to_string()])
    }
}

fn parse_numeric(value: &str, column: &str, row: usize) -> Result<f64> {
    match value.trim().parse::<f64>() {
        Ok(parsed) if parsed.is_finite() => Ok(parsed),
        _ => Err(PipelineError::format(format!(
            "record {}: feature '{}' value '{}' is not a finite number",
            row, column, value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::transaction::Transaction;

    fn table_with_frequency() -> TransactionTable {
        let mut table = TransactionTable::from_records(vec![]);
        table.headers.push("frequency".to_string());
        table.extra_headers.push("frequency".to_string());
        table.headers.push("is_suspicious".to_string());
        table.extra_headers.push("is_suspicious".to_string());

        for (amount, freq, label) in [(100.0, "10", "0"), (100000.0, "1", "1")] {
            let mut tx = Transaction::new("A", "B", amount);
            tx.extra = vec![freq.to_string(), label.to_string()];
            table.records.push(tx);
        }
        table
    }

    #[test]
    fn test_feature_extraction() {
        let extractor = FeatureExtractor::new(vec!["amount".into(), "frequency".into()]);

        let features = extractor.extract(&table_with_frequency()).unwrap();

        assert_eq!(features.dim(), (2, 2));
        assert_eq!(features[[1, 0]], 100000.0);
        assert_eq!(features[[0, 1]], 10.0);
    }

    #[test]
    fn test_missing_feature_column() {
        let extractor = FeatureExtractor::new(vec!["velocity".into()]);

        let err = extractor.extract(&table_with_frequency()).unwrap_err();
        assert_eq!(err.kind(), "FormatError");
    }

    #[test]
    fn test_non_finite_feature_value() {
        let mut table = table_with_frequency();
        table.records[1].extra[0] = "inf".to_string();
        let extractor = FeatureExtractor::new(vec!["amount".into(), "frequency".into()]);

        let err = extractor.extract(&table).unwrap_err();
        assert_eq!(err.kind(), "FormatError");
        assert!(err.to_string().contains("frequency"));
    }

    #[test]
    fn test_label_extraction() {
        let labels =
            FeatureExtractor::extract_labels(&table_with_frequency(), "is_suspicious").unwrap();
        assert_eq!(labels, vec![0, 1]);

        let err = FeatureExtractor::extract_labels(&table_with_frequency(), "frequency")
            .unwrap_err();
        assert_eq!(err.kind(), "FormatError");
    }
}
