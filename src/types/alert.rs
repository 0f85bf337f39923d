//! Suspicion flags raised by the reporter

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Risk level classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Determine risk level from score and thresholds
    pub fn from_score(score: f64, thresholds: &RiskLevelThresholds) -> Self {
        if score >= thresholds.critical {
            RiskLevel::Critical
        } else if score >= thresholds.high {
            RiskLevel::High
        } else if score >= thresholds.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// Configurable risk level thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLevelThresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for RiskLevelThresholds {
    fn default() -> Self {
        Self {
            medium: 0.4,
            high: 0.6,
            critical: 0.8,
        }
    }
}

/// A transfer flagged as suspicious
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspicionFlag {
    /// Unique flag identifier
    pub flag_id: String,

    /// Position of the record in the cleaned table
    pub record_index: usize,

    pub sender: String,
    pub receiver: String,
    pub amount: f64,

    /// Combined risk score (0.0 - 1.0)
    pub risk_score: f64,

    /// Risk level classification
    pub risk_level: RiskLevel,

    /// Normalized per-signal scores that fed the risk score
    pub signal_scores: BTreeMap<String, f64>,

    /// Signals that crossed their own threshold
    pub triggered_signals: Vec<String>,

    /// Flag generation timestamp
    pub timestamp: DateTime<Utc>,
}

impl SuspicionFlag {
    /// Create a new flag for one record
    pub fn new(
        record_index: usize,
        sender: String,
        receiver: String,
        amount: f64,
        risk_score: f64,
        risk_level: RiskLevel,
    ) -> Self {
        Self {
            flag_id: uuid::Uuid::new_v4().to_string(),
            record_index,
            sender,
            receiver,
            amount,
            risk_score,
            risk_level,
            signal_scores: BTreeMap::new(),
            triggered_signals: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Attach the signals behind the score
    pub fn with_signals(
        mut self,
        signal_scores: BTreeMap<String, f64>,
        triggered_signals: Vec<String>,
    ) -> Self {
        self.signal_scores = signal_scores;
        self.triggered_signals = triggered_signals;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_from_score() {
        let thresholds = RiskLevelThresholds::default();

        assert_eq!(RiskLevel::from_score(0.1, &thresholds), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.45, &thresholds), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.75, &thresholds), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.95, &thresholds), RiskLevel::Critical);
    }

    #[test]
    fn test_partial_thresholds_keep_defaults() {
        let thresholds: RiskLevelThresholds = serde_json::from_str(r#"{"medium": 0.3}"#).unwrap();

        assert_eq!(thresholds.medium, 0.3);
        assert_eq!(thresholds.high, 0.6);
        assert_eq!(thresholds.critical, 0.8);
    }

    #[test]
    fn test_flag_serialization() {
        let mut scores = BTreeMap::new();
        scores.insert("isolation_forest".to_string(), 0.9);

        let flag = SuspicionFlag::new(3, "D".into(), "A".into(), 100000.0, 0.82, RiskLevel::Critical)
            .with_signals(scores, vec!["isolation_forest:0.90".to_string()]);

        let json = serde_json::to_string(&flag).unwrap();
        assert!(json.contains("\"risk_level\":\"critical\""));

        let deserialized: SuspicionFlag = serde_json::from_str(&json).unwrap();
        assert_eq!(flag.flag_id, deserialized.flag_id);
        assert_eq!(deserialized.record_index, 3);
        assert_eq!(deserialized.triggered_signals.len(), 1);
    }
}
