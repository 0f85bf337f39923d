//! Anomaly scorers, the supervised classifier, and their persistence

pub mod aggregator;
pub mod autoencoder;
pub mod inference;
pub mod isolation_forest;
pub mod loader;
pub mod random_forest;

pub use aggregator::ScoreAggregator;
pub use autoencoder::{Autoencoder, AutoencoderConfig};
pub use inference::{DetectionEngine, DetectionStrategy, ScoreSet};
pub use isolation_forest::{IsolationForest, IsolationForestConfig};
pub use loader::{load_model, save_model, ModelStore};
pub use random_forest::{ClassificationReport, RandomForest, RandomForestConfig};

use crate::error::{PipelineError, Result};
use ndarray::Array2;

/// Capability shared by the anomaly models: fit once, then score rows
pub trait AnomalyScorer {
    /// Learn from a feature matrix (one row per record)
    fn fit(&mut self, features: &Array2<f64>) -> Result<()>;

    /// Score each row; higher means more anomalous
    fn score(&self, features: &Array2<f64>) -> Result<Vec<f64>>;

    /// Get model name
    fn name(&self) -> &str;

    fn is_fitted(&self) -> bool;
}

/// Reject matrices whose width differs from the one seen at fit time
pub(crate) fn check_width(expected: usize, features: &Array2<f64>) -> Result<()> {
    let actual = features.ncols();
    if actual != expected {
        return Err(PipelineError::Shape { expected, actual });
    }
    Ok(())
}
