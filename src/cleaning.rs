//! Record cleaning: incomplete rows, amount sign and scale

use crate::error::{PipelineError, Result};
use crate::types::transaction::{RawTable, Transaction, TransactionTable};
use serde::Deserialize;
use tracing::{debug, info};

/// Which optional cleaning steps run after dropping incomplete rows
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CleaningOptions {
    /// Replace amounts with their absolute value
    pub absolute_amount: bool,
    /// Drop transfers whose amount is not strictly positive
    pub retain_positive: bool,
    /// Divide amounts by the table maximum
    pub normalize_amount: bool,
}

impl Default for CleaningOptions {
    fn default() -> Self {
        Self {
            absolute_amount: true,
            retain_positive: false,
            normalize_amount: true,
        }
    }
}

/// Outcome of the cleaning stage
#[derive(Debug, Clone)]
pub struct CleanReport {
    pub table: TransactionTable,
    /// Rows dropped because a field was missing
    pub incomplete_removed: usize,
    /// Rows dropped because the amount was not positive
    pub non_positive_removed: usize,
}

/// Remove every record with a missing value in any column.
///
/// Returns the complete table and the number of removed rows.
pub fn drop_incomplete(raw: RawTable) -> (TransactionTable, usize) {
    let initial = raw.records.len();
    let has_time = raw.has_time;

    let records: Vec<Transaction> = raw
        .records
        .into_iter()
        .filter_map(|record| {
            let time = match (has_time, record.time) {
                (true, Some(time)) => Some(time),
                (true, None) => return None,
                (false, _) => None,
            };
            let extra = record.extra.into_iter().collect::<Option<Vec<_>>>()?;

            Some(Transaction {
                sender: record.sender?,
                receiver: record.receiver?,
                amount: record.amount.filter(|a| !a.is_nan())?,
                time,
                extra,
            })
        })
        .collect();

    let removed = initial - records.len();
    info!(removed, remaining = records.len(), "Dropped incomplete rows");

    (
        TransactionTable {
            headers: raw.headers,
            extra_headers: raw.extra_headers,
            records,
        },
        removed,
    )
}

/// Replace each amount with its magnitude
pub fn absolute_amount(mut table: TransactionTable) -> TransactionTable {
    for record in &mut table.records {
        record.amount = record.amount.abs();
    }
    table
}

/// Divide every amount by the largest amount in the table
pub fn normalize_amount(mut table: TransactionTable) -> Result<TransactionTable> {
    let max = table
        .records
        .iter()
        .map(|r| r.amount)
        .fold(f64::NEG_INFINITY, f64::max);

    if !(max.is_finite() && max != 0.0) {
        return Err(PipelineError::DivideByZero);
    }

    for record in &mut table.records {
        record.amount /= max;
    }
    debug!(max_amount = max, "Normalized amounts");
    Ok(table)
}

/// Keep only transfers with a strictly positive amount
pub fn retain_positive(mut table: TransactionTable) -> (TransactionTable, usize) {
    let initial = table.records.len();
    table.records.retain(|r| r.amount > 0.0);
    let removed = initial - table.records.len();
    info!(removed, "Dropped non-positive amounts");
    (table, removed)
}

/// Run the configured cleaning sequence
pub fn clean(raw: RawTable, options: &CleaningOptions) -> Result<CleanReport> {
    let (mut table, incomplete_removed) = drop_incomplete(raw);

    if options.absolute_amount {
        table = absolute_amount(table);
    }

    let mut non_positive_removed = 0;
    if options.retain_positive {
        let (kept, removed) = retain_positive(table);
        table = kept;
        non_positive_removed = removed;
    }

    if options.normalize_amount {
        table = normalize_amount(table)?;
    }

    Ok(CleanReport {
        table,
        incomplete_removed,
        non_positive_removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::read_transactions;

    fn raw_fixture() -> RawTable {
        let data = "sender,receiver,amount,time\n\
                    A,C,100,2024-12-15\n\
                    B,D,-50,2024-12-16\n\
                    ,E,200,2024-12-17\n";
        read_transactions(data.as_bytes(), b',').unwrap()
    }

    fn table(amounts: &[f64]) -> TransactionTable {
        TransactionTable::from_records(
            amounts
                .iter()
                .enumerate()
                .map(|(i, &a)| Transaction::new(format!("S{}", i), format!("R{}", i), a))
                .collect(),
        )
    }

    #[test]
    fn test_clean_drops_nulls_and_fixes_sign() {
        let options = CleaningOptions {
            normalize_amount: false,
            ..CleaningOptions::default()
        };

        let report = clean(raw_fixture(), &options).unwrap();

        assert_eq!(report.incomplete_removed, 1);
        assert_eq!(report.table.amounts(), vec![100.0, 50.0]);
        assert!(report.table.records.iter().all(|r| r.amount >= 0.0));
        assert!(report.table.records.iter().all(|r| r.time.is_some()));
    }

    #[test]
    fn test_missing_extra_column_drops_row() {
        let data = "sender,receiver,amount,channel\nA,B,1,wire\nB,C,2,\n";
        let raw = read_transactions(data.as_bytes(), b',').unwrap();

        let (table, removed) = drop_incomplete(raw);

        assert_eq!(removed, 1);
        assert_eq!(table.records[0].extra, vec!["wire".to_string()]);
    }

    #[test]
    fn test_absolute_amount_is_idempotent() {
        let once = absolute_amount(table(&[100.0, -50.0, 0.0, -0.5]));
        let twice = absolute_amount(once.clone());

        assert_eq!(once, twice);
        assert_eq!(once.amounts(), vec![100.0, 50.0, 0.0, 0.5]);
    }

    #[test]
    fn test_normalize_amount() {
        let normalized = normalize_amount(table(&[100.0, 200.0, 300.0])).unwrap();
        let amounts = normalized.amounts();

        assert!((amounts[0] - 1.0 / 3.0).abs() < 1e-9);
        assert!((amounts[1] - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(amounts[2], 1.0);
    }

    #[test]
    fn test_normalize_all_zero_fails() {
        let err = normalize_amount(table(&[0.0, 0.0])).unwrap_err();
        assert!(matches!(err, PipelineError::DivideByZero));

        let err = normalize_amount(table(&[])).unwrap_err();
        assert!(matches!(err, PipelineError::DivideByZero));
    }

    #[test]
    fn test_retain_positive() {
        let (kept, removed) = retain_positive(table(&[10.0, 0.0, -3.0, 4.0]));

        assert_eq!(removed, 2);
        assert_eq!(kept.amounts(), vec![10.0, 4.0]);
    }
}
