//! Transfer records and tables

use serde::{Deserialize, Serialize};

/// Column names the pipeline relies on
pub const SENDER_COLUMN: &str = "sender";
pub const RECEIVER_COLUMN: &str = "receiver";
pub const AMOUNT_COLUMN: &str = "amount";
pub const TIME_COLUMN: &str = "time";

/// A transfer as read from the source, before cleaning.
///
/// Every field may be missing; `extra` holds the remaining columns in header order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawRecord {
    pub sender: Option<String>,
    pub receiver: Option<String>,
    pub amount: Option<f64>,
    pub time: Option<String>,
    pub extra: Vec<Option<String>>,
}

/// Ingested table with its header layout preserved
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    /// Headers in source order
    pub headers: Vec<String>,
    /// Whether the source carries a time column
    pub has_time: bool,
    /// Names of the non-standard columns, aligned with `RawRecord::extra`
    pub extra_headers: Vec<String>,
    pub records: Vec<RawRecord>,
}

impl RawTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A complete transfer record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sending account identifier
    pub sender: String,

    /// Receiving account identifier
    pub receiver: String,

    /// Transferred amount
    pub amount: f64,

    /// Opaque timestamp; `None` only when the source has no time column
    #[serde(default)]
    pub time: Option<String>,

    /// Values of the extra columns, aligned with `TransactionTable::extra_headers`
    #[serde(default)]
    pub extra: Vec<String>,
}

impl Transaction {
    /// Create a transfer without time or extra columns
    pub fn new(sender: impl Into<String>, receiver: impl Into<String>, amount: f64) -> Self {
        Self {
            sender: sender.into(),
            receiver: receiver.into(),
            amount,
            time: None,
            extra: Vec::new(),
        }
    }

    /// Attach a timestamp
    pub fn with_time(mut self, time: impl Into<String>) -> Self {
        self.time = Some(time.into());
        self
    }
}

/// Cleaned transfer table. Record order is input order.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionTable {
    pub headers: Vec<String>,
    pub extra_headers: Vec<String>,
    pub records: Vec<Transaction>,
}

impl TransactionTable {
    /// Build a table from records with the standard headers only
    pub fn from_records(records: Vec<Transaction>) -> Self {
        let mut headers = vec![
            SENDER_COLUMN.to_string(),
            RECEIVER_COLUMN.to_string(),
            AMOUNT_COLUMN.to_string(),
        ];
        if records.iter().any(|r| r.time.is_some()) {
            headers.push(TIME_COLUMN.to_string());
        }

        Self {
            headers,
            extra_headers: Vec::new(),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn amounts(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.amount).collect()
    }

    /// Position of an extra column by name
    pub fn extra_index(&self, column: &str) -> Option<usize> {
        self.extra_headers.iter().position(|h| h == column)
    }

    /// Value of a named column for one record, as it would be written out
    pub fn value(&self, record: &Transaction, column: &str) -> Option<String> {
        match column {
            SENDER_COLUMN => Some(record.sender.clone()),
            RECEIVER_COLUMN => Some(record.receiver.clone()),
            AMOUNT_COLUMN => Some(record.amount.to_string()),
            TIME_COLUMN => record.time.clone(),
            other => self
                .extra_index(other)
                .and_then(|idx| record.extra.get(idx).cloned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_serialization() {
        let tx = Transaction::new("A", "B", 100.0).with_time("2024-12-15");

        let json = serde_json::to_string(&tx).unwrap();
        let deserialized: Transaction = serde_json::from_str(&json).unwrap();

        assert_eq!(tx, deserialized);
    }

    #[test]
    fn test_table_headers_follow_records() {
        let table = TransactionTable::from_records(vec![Transaction::new("A", "B", 1.0)]);
        assert_eq!(table.headers, vec!["sender", "receiver", "amount"]);

        let timed = TransactionTable::from_records(vec![
            Transaction::new("A", "B", 1.0).with_time("2024-12-15"),
        ]);
        assert_eq!(timed.headers.last().map(String::as_str), Some("time"));
    }

    #[test]
    fn test_column_lookup() {
        let mut table = TransactionTable::from_records(vec![]);
        table.headers.push("channel".to_string());
        table.extra_headers.push("channel".to_string());

        let mut tx = Transaction::new("A", "B", 42.5);
        tx.extra.push("wire".to_string());

        assert_eq!(table.value(&tx, "amount"), Some("42.5".to_string()));
        assert_eq!(table.value(&tx, "channel"), Some("wire".to_string()));
        assert_eq!(table.value(&tx, "unknown"), None);
    }
}
