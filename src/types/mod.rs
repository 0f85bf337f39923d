//! Type definitions for the money flow pipeline

pub mod alert;
pub mod transaction;

pub use alert::{RiskLevel, RiskLevelThresholds, SuspicionFlag};
pub use transaction::{RawRecord, RawTable, Transaction, TransactionTable};
