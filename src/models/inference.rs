//! Detection engine running the configured anomaly models

use crate::error::Result;
use crate::models::aggregator::scale_by_max;
use crate::models::loader::ModelStore;
use crate::models::{
    AnomalyScorer, Autoencoder, AutoencoderConfig, IsolationForest, IsolationForestConfig,
};
use crate::output::OutputBatch;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const ISOLATION_FOREST: &str = "isolation_forest";
pub const AUTOENCODER: &str = "autoencoder";

/// Which anomaly models score the records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStrategy {
    IsolationForest,
    Autoencoder,
    /// Run both models
    #[default]
    Ensemble,
}

impl DetectionStrategy {
    pub fn uses_isolation_forest(self) -> bool {
        matches!(self, Self::IsolationForest | Self::Ensemble)
    }

    pub fn uses_autoencoder(self) -> bool {
        matches!(self, Self::Autoencoder | Self::Ensemble)
    }
}

/// Per-record output of the anomaly models that ran
#[derive(Debug, Clone, Default)]
pub struct ScoreSet {
    /// Reconstruction error per record
    pub autoencoder: Option<Vec<f64>>,
    /// Isolation score in (0, 1] per record
    pub isolation_scores: Option<Vec<f64>>,
    /// -1 anomaly, 1 normal
    pub isolation_labels: Option<Vec<i8>>,
}

impl ScoreSet {
    pub fn len(&self) -> usize {
        self.autoencoder
            .as_ref()
            .or(self.isolation_scores.as_ref())
            .map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records labelled anomalous by the isolation forest
    pub fn anomaly_count(&self) -> usize {
        self.isolation_labels
            .as_ref()
            .map_or(0, |labels| labels.iter().filter(|&&l| l == -1).count())
    }

    pub fn is_labelled_anomaly(&self, record: usize) -> bool {
        self.isolation_labels
            .as_ref()
            .and_then(|labels| labels.get(record))
            .is_some_and(|&l| l == -1)
    }

    /// Per-record signals scaled into [0, 1], keyed by model name.
    ///
    /// Reconstruction errors are divided by the largest error of the batch.
    pub fn normalized_signals(&self) -> Vec<BTreeMap<String, f64>> {
        let mut signals = vec![BTreeMap::new(); self.len()];

        if let Some(scores) = &self.isolation_scores {
            for (entry, &score) in signals.iter_mut().zip(scores) {
                entry.insert(ISOLATION_FOREST.to_string(), score.clamp(0.0, 1.0));
            }
        }
        if let Some(errors) = &self.autoencoder {
            for (entry, score) in signals.iter_mut().zip(scale_by_max(errors)) {
                entry.insert(AUTOENCODER.to_string(), score);
            }
        }

        signals
    }
}

/// Fits and runs the anomaly models selected by a [`DetectionStrategy`]
pub struct DetectionEngine {
    strategy: DetectionStrategy,
    isolation_forest: Option<IsolationForest>,
    autoencoder: Option<Autoencoder>,
}

impl DetectionEngine {
    pub fn new(
        strategy: DetectionStrategy,
        isolation_forest: IsolationForestConfig,
        autoencoder: AutoencoderConfig,
    ) -> Self {
        Self {
            strategy,
            isolation_forest: strategy
                .uses_isolation_forest()
                .then(|| IsolationForest::new(isolation_forest)),
            autoencoder: strategy
                .uses_autoencoder()
                .then(|| Autoencoder::new(autoencoder)),
        }
    }

    pub fn strategy(&self) -> DetectionStrategy {
        self.strategy
    }

    pub fn isolation_forest(&self) -> Option<&IsolationForest> {
        self.isolation_forest.as_ref()
    }

    pub fn autoencoder(&self) -> Option<&Autoencoder> {
        self.autoencoder.as_ref()
    }

    fn scorers_mut(&mut self) -> Vec<&mut dyn AnomalyScorer> {
        let mut scorers: Vec<&mut dyn AnomalyScorer> = Vec::new();
        if let Some(model) = self.isolation_forest.as_mut() {
            scorers.push(model);
        }
        if let Some(model) = self.autoencoder.as_mut() {
            scorers.push(model);
        }
        scorers
    }

    /// Replace enabled models with fitted artifacts from `store` where present.
    ///
    /// Returns the number of models loaded.
    pub fn load_models(&mut self, store: &ModelStore) -> Result<usize> {
        let mut loaded = 0;
        if self.isolation_forest.is_some() {
            if let Some(model) = store.load_if_present::<IsolationForest>(ISOLATION_FOREST)? {
                self.isolation_forest = Some(model);
                loaded += 1;
            }
        }
        if self.autoencoder.is_some() {
            if let Some(model) = store.load_if_present::<Autoencoder>(AUTOENCODER)? {
                self.autoencoder = Some(model);
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    /// Stage every fitted model into `batch` under `store`'s directory
    pub fn stage_models(&self, store: &ModelStore, batch: &mut OutputBatch) -> Result<()> {
        if let Some(model) = self.isolation_forest.as_ref().filter(|m| m.is_fitted()) {
            store.stage(batch, ISOLATION_FOREST, model)?;
        }
        if let Some(model) = self.autoencoder.as_ref().filter(|m| m.is_fitted()) {
            store.stage(batch, AUTOENCODER, model)?;
        }
        Ok(())
    }

    /// Fit every enabled model that is not already fitted
    pub fn fit(&mut self, features: &Array2<f64>) -> Result<()> {
        for scorer in self.scorers_mut() {
            if scorer.is_fitted() {
                debug!(model = %scorer.name(), "Model already fitted, skipping training");
                continue;
            }
            scorer.fit(features)?;
            info!(model = %scorer.name(), rows = features.nrows(), "Model fitted");
        }
        Ok(())
    }

    /// Score every record with the enabled models
    pub fn score(&self, features: &Array2<f64>) -> Result<ScoreSet> {
        let mut scores = ScoreSet::default();

        if let Some(model) = &self.isolation_forest {
            scores.isolation_scores = Some(model.score(features)?);
            scores.isolation_labels = Some(model.predict(features)?);
        }
        if let Some(model) = &self.autoencoder {
            scores.autoencoder = Some(model.score(features)?);
        }

        debug!(
            strategy = ?self.strategy,
            records = scores.len(),
            anomalies = scores.anomaly_count(),
            "Scoring complete"
        );
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use ndarray::array;

    fn data() -> Array2<f64> {
        array![[100.0], [150.0], [200.0], [100000.0], [120.0], [180.0]]
    }

    fn engine(strategy: DetectionStrategy) -> DetectionEngine {
        DetectionEngine::new(
            strategy,
            IsolationForestConfig {
                contamination: 0.17,
                ..IsolationForestConfig::default()
            },
            AutoencoderConfig {
                epochs: 20,
                ..AutoencoderConfig::default()
            },
        )
    }

    #[test]
    fn test_ensemble_runs_both_models() {
        let mut engine = engine(DetectionStrategy::Ensemble);
        engine.fit(&data()).unwrap();
        let scores = engine.score(&data()).unwrap();

        assert_eq!(scores.len(), 6);
        assert_eq!(scores.autoencoder.as_ref().map(Vec::len), Some(6));
        assert_eq!(
            scores.isolation_labels.as_deref(),
            Some(&[1, 1, 1, -1, 1, 1][..])
        );
        assert_eq!(scores.anomaly_count(), 1);
        assert!(scores.is_labelled_anomaly(3));
    }

    #[test]
    fn test_single_model_strategy() {
        let mut engine = engine(DetectionStrategy::IsolationForest);
        engine.fit(&data()).unwrap();
        let scores = engine.score(&data()).unwrap();

        assert!(engine.autoencoder().is_none());
        assert!(scores.autoencoder.is_none());
        assert_eq!(scores.len(), 6);
    }

    #[test]
    fn test_normalized_signals_in_unit_range() {
        let mut engine = engine(DetectionStrategy::Ensemble);
        engine.fit(&data()).unwrap();
        let signals = engine.score(&data()).unwrap().normalized_signals();

        assert_eq!(signals.len(), 6);
        for entry in &signals {
            assert_eq!(entry.len(), 2);
            assert!(entry.values().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_score_before_fit() {
        let engine = engine(DetectionStrategy::Autoencoder);
        let err = engine.score(&data()).unwrap_err();
        assert!(matches!(err, PipelineError::NotFitted(_)));
    }

    #[test]
    fn test_models_reused_from_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());

        let mut first = engine(DetectionStrategy::Ensemble);
        first.fit(&data()).unwrap();
        let mut batch = OutputBatch::new();
        first.stage_models(&store, &mut batch).unwrap();
        batch.commit().unwrap();

        let mut second = engine(DetectionStrategy::Ensemble);
        assert_eq!(second.load_models(&store).unwrap(), 2);
        second.fit(&data()).unwrap();

        let a = first.score(&data()).unwrap();
        let b = second.score(&data()).unwrap();
        assert_eq!(a.isolation_labels, b.isolation_labels);
        assert_eq!(a.isolation_scores, b.isolation_scores);
    }

    #[test]
    fn test_strategy_serde() {
        let strategy: DetectionStrategy = serde_json::from_str("\"isolation_forest\"").unwrap();
        assert_eq!(strategy, DetectionStrategy::IsolationForest);
        assert_eq!(DetectionStrategy::default(), DetectionStrategy::Ensemble);
    }
}
