//! Risk aggregation across anomaly and graph signals

use std::collections::BTreeMap;

/// Combines normalized per-record signals into a single risk score.
#[derive(Debug, Clone)]
pub struct ScoreAggregator {
    /// Signal weights for weighted average
    weights: BTreeMap<String, f64>,
    /// Default weight for signals not in the weights map
    default_weight: f64,
}

impl ScoreAggregator {
    /// Create a new score aggregator with signal weights.
    pub fn new(weights: BTreeMap<String, f64>) -> Self {
        Self {
            weights,
            default_weight: 0.1,
        }
    }

    /// Aggregate signal scores into a single risk score.
    ///
    /// Uses weighted average where weights are normalized to sum to 1.
    pub fn aggregate(&self, signal_scores: &BTreeMap<String, f64>) -> f64 {
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;

        for (signal, &score) in signal_scores {
            let weight = self
                .weights
                .get(signal)
                .copied()
                .unwrap_or(self.default_weight);

            weighted_sum += score * weight;
            total_weight += weight;
        }

        if total_weight > 0.0 {
            (weighted_sum / total_weight).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

impl Default for ScoreAggregator {
    fn default() -> Self {
        let mut weights = BTreeMap::new();
        weights.insert("isolation_forest".to_string(), 0.5);
        weights.insert("autoencoder".to_string(), 0.3);
        weights.insert("centrality".to_string(), 0.2);

        Self {
            weights,
            default_weight: 0.1,
        }
    }
}

/// Scale values into [0, 1] by dividing by the maximum
pub fn scale_by_max(values: &[f64]) -> Vec<f64> {
    let max = values.iter().copied().fold(0.0, f64::max);
    if max > 0.0 {
        values.iter().map(|v| (v / max).clamp(0.0, 1.0)).collect()
    } else {
        vec![0.0; values.len()]
    }
}
