//! Random forest classifier for labelled transfers.
//!
//! Bootstrap-aggregated CART trees using Gini impurity, with a random subset
//! of √d features considered at every split.

use super::check_width;
use crate::error::{PipelineError, Result};
use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Random forest parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomForestConfig {
    pub num_trees: usize,
    pub max_depth: usize,
    /// Nodes with fewer rows become leaves
    pub min_samples_split: usize,
    pub seed: u64,
}

impl Default for RandomForestConfig {
    fn default() -> Self {
        Self {
            num_trees: 100,
            max_depth: 12,
            min_samples_split: 2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum DecisionNode {
    Leaf {
        /// Fraction of positive rows that reached this leaf
        positive_rate: f64,
    },
    Split {
        feature_idx: usize,
        threshold: f64,
        left: Box<DecisionNode>,
        right: Box<DecisionNode>,
    },
}

impl DecisionNode {
    fn predict(&self, sample: ArrayView1<f64>) -> f64 {
        match self {
            DecisionNode::Leaf { positive_rate } => *positive_rate,
            DecisionNode::Split {
                feature_idx,
                threshold,
                left,
                right,
            } => {
                if sample[*feature_idx] <= *threshold {
                    left.predict(sample)
                } else {
                    right.predict(sample)
                }
            }
        }
    }
}

fn gini(positives: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let p = positives as f64 / total as f64;
    2.0 * p * (1.0 - p)
}

/// Best split found for one node
struct SplitCandidate {
    feature_idx: usize,
    threshold: f64,
    impurity: f64,
}

struct TreeBuilder<'a, R: Rng> {
    features: &'a Array2<f64>,
    labels: &'a [u8],
    config: &'a RandomForestConfig,
    features_per_split: usize,
    rng: &'a mut R,
}

impl<'a, R: Rng> TreeBuilder<'a, R> {
    fn build(&mut self, rows: &[usize], depth: usize) -> DecisionNode {
        let positives = rows.iter().filter(|&&r| self.labels[r] == 1).count();
        let leaf = DecisionNode::Leaf {
            positive_rate: positives as f64 / rows.len().max(1) as f64,
        };

        if depth >= self.config.max_depth
            || rows.len() < self.config.min_samples_split.max(2)
            || positives == 0
            || positives == rows.len()
        {
            return leaf;
        }

        let parent_impurity = gini(positives, rows.len());
        let Some(split) = self.best_split(rows) else {
            return leaf;
        };
        if split.impurity >= parent_impurity {
            return leaf;
        }

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&r| self.features[[r, split.feature_idx]] <= split.threshold);

        DecisionNode::Split {
            feature_idx: split.feature_idx,
            threshold: split.threshold,
            left: Box::new(self.build(&left_rows, depth + 1)),
            right: Box::new(self.build(&right_rows, depth + 1)),
        }
    }

    fn best_split(&mut self, rows: &[usize]) -> Option<SplitCandidate> {
        let n_features = self.features.ncols();
        let mut candidates: Vec<usize> = (0..n_features).collect();
        candidates.shuffle(&mut *self.rng);
        candidates.truncate(self.features_per_split);

        let total = rows.len();
        let total_positive = rows.iter().filter(|&&r| self.labels[r] == 1).count();
        let mut best: Option<SplitCandidate> = None;

        for feature_idx in candidates {
            let mut column: Vec<(f64, u8)> = rows
                .iter()
                .map(|&r| (self.features[[r, feature_idx]], self.labels[r]))
                .collect();
            column.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_positive = 0;
            for i in 0..total - 1 {
                left_positive += column[i].1 as usize;
                if column[i].0 == column[i + 1].0 {
                    continue;
                }

                let left_total = i + 1;
                let right_total = total - left_total;
                let impurity = (left_total as f64 * gini(left_positive, left_total)
                    + right_total as f64 * gini(total_positive - left_positive, right_total))
                    / total as f64;

                if best.as_ref().map_or(true, |b| impurity < b.impurity) {
                    best = Some(SplitCandidate {
                        feature_idx,
                        threshold: (column[i].0 + column[i + 1].0) / 2.0,
                        impurity,
                    });
                }
            }
        }

        best
    }
}

/// Random forest binary classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    config: RandomForestConfig,
    trees: Vec<DecisionNode>,
    n_features: usize,
}

impl RandomForest {
    pub fn new(config: RandomForestConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            n_features: 0,
        }
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    /// Train on features with 0/1 labels
    pub fn fit(&mut self, features: &Array2<f64>, labels: &[u8]) -> Result<()> {
        let (n_rows, n_features) = features.dim();
        if n_rows == 0 || n_features == 0 {
            return Err(PipelineError::format(
                "cannot fit random forest on an empty feature table",
            ));
        }
        if labels.len() != n_rows {
            return Err(PipelineError::format(format!(
                "{} labels for {} feature rows",
                labels.len(),
                n_rows
            )));
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let features_per_split = ((n_features as f64).sqrt().round() as usize).clamp(1, n_features);

        let mut trees = Vec::with_capacity(self.config.num_trees.max(1));
        for _ in 0..self.config.num_trees.max(1) {
            let bootstrap: Vec<usize> = (0..n_rows).map(|_| rng.gen_range(0..n_rows)).collect();
            let mut builder = TreeBuilder {
                features,
                labels,
                config: &self.config,
                features_per_split,
                rng: &mut rng,
            };
            trees.push(builder.build(&bootstrap, 0));
        }

        self.trees = trees;
        self.n_features = n_features;
        debug!(trees = self.trees.len(), features_per_split, "Random forest fitted");
        Ok(())
    }

    /// Mean positive-class probability across trees
    pub fn predict_proba(&self, features: &Array2<f64>) -> Result<Vec<f64>> {
        if !self.is_fitted() {
            return Err(PipelineError::NotFitted("random_forest".to_string()));
        }
        check_width(self.n_features, features)?;

        Ok(features
            .rows()
            .into_iter()
            .map(|row| {
                self.trees.iter().map(|t| t.predict(row)).sum::<f64>() / self.trees.len() as f64
            })
            .collect())
    }

    pub fn predict(&self, features: &Array2<f64>) -> Result<Vec<u8>> {
        Ok(self
            .predict_proba(features)?
            .into_iter()
            .map(|p| u8::from(p >= 0.5))
            .collect())
    }
}

/// Shuffle row indices with a seed and split off `test_fraction` of them for testing
pub fn train_test_split(n_rows: usize, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut indices: Vec<usize> = (0..n_rows).collect();
    indices.shuffle(&mut rng);

    let test_len = ((n_rows as f64) * test_fraction.clamp(0.0, 1.0) - 1e-9).ceil() as usize;
    let test_len = test_len.min(n_rows.saturating_sub(1));
    let train = indices.split_off(test_len);
    (train, indices)
}

/// Binary classification metrics for the positive (suspicious) class
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support_positive: usize,
    pub support_negative: usize,
}

impl ClassificationReport {
    pub fn from_predictions(truth: &[u8], predicted: &[u8]) -> Self {
        let mut tp = 0usize;
        let mut fp = 0usize;
        let mut fn_ = 0usize;
        let mut tn = 0usize;
        for (&t, &p) in truth.iter().zip(predicted) {
            match (t, p) {
                (1, 1) => tp += 1,
                (0, 1) => fp += 1,
                (1, _) => fn_ += 1,
                _ => tn += 1,
            }
        }

        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            accuracy: ratio(tp + tn, truth.len()),
            precision,
            recall,
            f1,
            support_positive: tp + fn_,
            support_negative: tn + fp,
        }
    }
}

/// Score a fitted forest against held-out labels
pub fn evaluate(model: &RandomForest, features: &Array2<f64>, labels: &[u8]) -> Result<ClassificationReport> {
    let predicted = model.predict(features)?;
    Ok(ClassificationReport::from_predictions(labels, &predicted))
}
