//! Isolation Forest implementation
//!
//! Anomaly detection using isolation trees. Anomalies are easier to isolate
//! and thus have shorter path lengths in the trees.

use super::{check_width, AnomalyScorer};
use crate::error::{PipelineError, Result};
use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Isolation forest parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationForestConfig {
    /// Number of trees
    pub num_trees: usize,
    /// Rows drawn (without replacement) for each tree
    pub sample_size: usize,
    /// Expected fraction of anomalies, used to place the label threshold
    pub contamination: f64,
    /// Random seed; equal seeds give identical forests
    pub seed: u64,
}

impl Default for IsolationForestConfig {
    fn default() -> Self {
        Self {
            num_trees: 100,
            sample_size: 256,
            contamination: 0.01,
            seed: 42,
        }
    }
}

/// Isolation Forest model for anomaly detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    config: IsolationForestConfig,
    /// Individual isolation trees
    trees: Vec<IsolationTree>,
    /// Rows each tree was grown on
    tree_size: usize,
    /// Feature width seen at fit time
    n_features: usize,
    /// Scores above this are labelled anomalous
    threshold: f64,
    fitted: bool,
}

impl Default for IsolationForest {
    fn default() -> Self {
        Self::new(IsolationForestConfig::default())
    }
}

impl IsolationForest {
    pub fn new(config: IsolationForestConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            tree_size: 0,
            n_features: 0,
            threshold: f64::INFINITY,
            fitted: false,
        }
    }

    /// Average unsuccessful-search path length in a binary search tree of `n` nodes, c(n)
    fn average_path_length(n: usize) -> f64 {
        match n {
            0 | 1 => 0.0,
            2 => 1.0,
            _ => {
                let n = n as f64;
                2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
            }
        }
    }

    /// Score threshold derived from the contamination rate at fit time
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn score_row(&self, sample: ArrayView1<f64>, normalizer: f64) -> f64 {
        if self.trees.is_empty() || normalizer == 0.0 {
            return 0.5;
        }

        let total_path_length: f64 = self
            .trees
            .iter()
            .map(|tree| tree.path_length(sample))
            .sum();
        let avg_path = total_path_length / self.trees.len() as f64;

        // Anomaly score: 2^(-E[h(x)] / c(psi))
        2.0_f64.powf(-avg_path / normalizer)
    }

    fn score_rows(&self, features: &Array2<f64>) -> Vec<f64> {
        let normalizer = Self::average_path_length(self.tree_size);
        features
            .rows()
            .into_iter()
            .map(|row| self.score_row(row, normalizer))
            .collect()
    }

    /// Binary labels: -1 for anomalies, 1 for normal rows
    pub fn predict(&self, features: &Array2<f64>) -> Result<Vec<i8>> {
        Ok(self
            .score(features)?
            .into_iter()
            .map(|s| if s > self.threshold { -1 } else { 1 })
            .collect())
    }
}

impl AnomalyScorer for IsolationForest {
    fn fit(&mut self, features: &Array2<f64>) -> Result<()> {
        let (n_rows, n_features) = features.dim();
        if n_rows == 0 || n_features == 0 {
            return Err(PipelineError::format(
                "cannot fit isolation forest on an empty feature table",
            ));
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let tree_size = self.config.sample_size.clamp(1, n_rows);
        let max_depth = (tree_size as f64).log2().ceil() as usize;

        self.trees = (0..self.config.num_trees.max(1))
            .map(|_| {
                let sample: Vec<Vec<f64>> = rand::seq::index::sample(&mut rng, n_rows, tree_size)
                    .into_iter()
                    .map(|idx| features.row(idx).to_vec())
                    .collect();
                IsolationTree::build(&sample, n_features, max_depth, &mut rng)
            })
            .collect();
        self.tree_size = tree_size;
        self.n_features = n_features;

        let mut training_scores = self.score_rows(features);
        let contamination = self.config.contamination.clamp(0.0, 0.5);
        self.threshold = percentile(&mut training_scores, 100.0 * (1.0 - contamination));
        self.fitted = true;

        debug!(
            trees = self.trees.len(),
            tree_size,
            threshold = self.threshold,
            "Isolation forest fitted"
        );
        Ok(())
    }

    fn score(&self, features: &Array2<f64>) -> Result<Vec<f64>> {
        if !self.fitted {
            return Err(PipelineError::NotFitted(self.name().to_string()));
        }
        check_width(self.n_features, features)?;
        Ok(self.score_rows(features))
    }

    fn name(&self) -> &str {
        "isolation_forest"
    }

    fn is_fitted(&self) -> bool {
        self.fitted
    }
}

/// Linear-interpolated percentile (`q` in 0..=100) of the values
fn percentile(values: &mut [f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::INFINITY;
    }
    values.sort_by(|a, b| a.total_cmp(b));

    let pos = (q / 100.0).clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    values[lo] + (values[hi] - values[lo]) * (pos - lo as f64)
}

/// A single isolation tree
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IsolationTree {
    root: Option<Box<IsolationNode>>,
}

impl IsolationTree {
    /// Build an isolation tree from samples
    fn build<R: Rng>(samples: &[Vec<f64>], n_features: usize, max_depth: usize, rng: &mut R) -> Self {
        let root = Self::build_node(samples, n_features, 0, max_depth, rng);
        Self { root }
    }

    /// Recursively build tree nodes
    fn build_node<R: Rng>(
        samples: &[Vec<f64>],
        n_features: usize,
        depth: usize,
        max_depth: usize,
        rng: &mut R,
    ) -> Option<Box<IsolationNode>> {
        if samples.is_empty() {
            return None;
        }

        // Terminal conditions
        if depth >= max_depth || samples.len() <= 1 {
            return Some(Box::new(IsolationNode::Leaf {
                size: samples.len(),
            }));
        }

        // Randomly select feature
        let feature_idx = rng.gen_range(0..n_features);

        let (min_val, max_val) = samples
            .iter()
            .map(|s| s[feature_idx])
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });

        // If all values are the same, make a leaf
        if max_val <= min_val {
            return Some(Box::new(IsolationNode::Leaf {
                size: samples.len(),
            }));
        }

        // Random split point
        let split_value = rng.gen_range(min_val..max_val);

        let (left_samples, right_samples): (Vec<Vec<f64>>, Vec<Vec<f64>>) = samples
            .iter()
            .cloned()
            .partition(|s| s[feature_idx] < split_value);

        let left = Self::build_node(&left_samples, n_features, depth + 1, max_depth, rng);
        let right = Self::build_node(&right_samples, n_features, depth + 1, max_depth, rng);

        Some(Box::new(IsolationNode::Internal {
            feature_idx,
            split_value,
            left,
            right,
        }))
    }

    /// Calculate path length for a sample
    fn path_length(&self, sample: ArrayView1<f64>) -> f64 {
        match &self.root {
            None => 0.0,
            Some(node) => Self::node_path_length(node, sample, 0),
        }
    }

    fn node_path_length(node: &IsolationNode, sample: ArrayView1<f64>, depth: usize) -> f64 {
        match node {
            IsolationNode::Leaf { size } => {
                // Unresolved leaves add the expected remaining path length
                depth as f64 + IsolationForest::average_path_length(*size)
            }
            IsolationNode::Internal {
                feature_idx,
                split_value,
                left,
                right,
            } => {
                let next_node = if sample[*feature_idx] < *split_value {
                    left
                } else {
                    right
                };

                match next_node {
                    Some(n) => Self::node_path_length(n, sample, depth + 1),
                    None => depth as f64 + 1.0,
                }
            }
        }
    }
}

/// Node in an isolation tree
#[derive(Debug, Clone, Serialize, Deserialize)]
enum IsolationNode {
    /// Internal node with split
    Internal {
        feature_idx: usize,
        split_value: f64,
        left: Option<Box<IsolationNode>>,
        right: Option<Box<IsolationNode>>,
    },
    /// Leaf node
    Leaf { size: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn transfers() -> Array2<f64> {
        array![
            [100.0, 10.0],
            [150.0, 12.0],
            [200.0, 14.0],
            [100000.0, 1.0],
            [120.0, 11.0],
            [180.0, 13.0]
        ]
    }

    #[test]
    fn test_isolation_forest_creation() {
        let forest = IsolationForest::default();
        assert!(!forest.is_fitted());
        assert_eq!(forest.name(), "isolation_forest");
    }

    #[test]
    fn test_single_outlier_is_labelled() {
        let amounts = array![[100.0], [150.0], [200.0], [100000.0], [120.0], [180.0]];
        let mut forest = IsolationForest::new(IsolationForestConfig {
            contamination: 0.17,
            ..IsolationForestConfig::default()
        });

        forest.fit(&amounts).unwrap();
        let labels = forest.predict(&amounts).unwrap();

        assert_eq!(labels, vec![1, 1, 1, -1, 1, 1]);
    }

    #[test]
    fn test_outlier_scores_highest() {
        let data = transfers();
        let mut forest = IsolationForest::default();
        forest.fit(&data).unwrap();

        let scores = forest.score(&data).unwrap();
        let top = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);

        assert_eq!(top, Some(3));
        assert!(scores.iter().all(|&s| s > 0.0 && s <= 1.0));
    }

    #[test]
    fn test_same_seed_same_scores() {
        let data = transfers();
        let mut first = IsolationForest::default();
        let mut second = IsolationForest::default();
        first.fit(&data).unwrap();
        second.fit(&data).unwrap();

        assert_eq!(first.score(&data).unwrap(), second.score(&data).unwrap());
        assert_eq!(first.trees.len(), 100);
    }

    #[test]
    fn test_shape_mismatch() {
        let mut forest = IsolationForest::default();
        forest.fit(&transfers()).unwrap();

        let err = forest.score(&array![[1.0, 2.0, 3.0]]).unwrap_err();
        assert!(matches!(err, PipelineError::Shape { expected: 2, actual: 3 }));
    }

    #[test]
    fn test_score_before_fit() {
        let forest = IsolationForest::default();
        let err = forest.score(&transfers()).unwrap_err();
        assert!(matches!(err, PipelineError::NotFitted(_)));
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(IsolationForest::average_path_length(1), 0.0);
        assert_eq!(IsolationForest::average_path_length(2), 1.0);

        let c_10 = IsolationForest::average_path_length(10);
        let c_100 = IsolationForest::average_path_length(100);
        assert!(c_100 > c_10, "c(100)={} should be > c(10)={}", c_100, c_10);
    }

    #[test]
    fn test_percentile_interpolates() {
        let mut values = vec![4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(percentile(&mut values, 50.0), 3.0);
        assert!((percentile(&mut values, 90.0) - 4.6).abs() < 1e-12);
    }
}
