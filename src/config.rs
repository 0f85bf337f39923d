//! Configuration management for the money flow pipeline

use crate::cleaning::CleaningOptions;
use crate::graph::EdgePolicy;
use crate::models::{AutoencoderConfig, DetectionStrategy, IsolationForestConfig, RandomForestConfig};
use crate::types::alert::RiskLevelThresholds;
use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Prefix of environment overrides, e.g. `MONEYFLOW__DETECTION__THRESHOLD=0.7`
pub const ENV_PREFIX: &str = "MONEYFLOW";

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub input: InputConfig,
    pub cleaning: CleaningOptions,
    pub graph: GraphConfig,
    pub detection: DetectionConfig,
    pub classifier: ClassifierConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

/// Source file settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Delimited transfer file
    pub path: PathBuf,
    /// Field delimiter (single ASCII character)
    pub delimiter: char,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/transactions.csv"),
            delimiter: ',',
        }
    }
}

impl InputConfig {
    pub fn delimiter_byte(&self) -> Result<u8> {
        if !self.delimiter.is_ascii() {
            bail!("delimiter '{}' is not a single ASCII character", self.delimiter);
        }
        Ok(self.delimiter as u8)
    }
}

/// Graph construction and analysis settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// How repeated (sender, receiver) transfers collapse into one edge
    pub edge_policy: EdgePolicy,
    /// Number of most central nodes to log
    pub top_central: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            edge_policy: EdgePolicy::Sum,
            top_central: 5,
        }
    }
}

/// Anomaly detection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Which anomaly models run: "isolation_forest", "autoencoder" or "ensemble"
    pub strategy: DetectionStrategy,
    /// Feature columns fed to the anomaly models
    pub features: Vec<String>,
    /// Risk score threshold for flagging a transfer
    pub threshold: f64,
    /// Load fitted models from the models directory instead of retraining
    pub reuse_models: bool,
    /// Signal weights for the risk score
    pub weights: BTreeMap<String, f64>,
    /// Risk level classification thresholds
    pub risk_levels: RiskLevelThresholds,
    pub isolation_forest: IsolationForestConfig,
    pub autoencoder: AutoencoderConfig,
}

fn default_weights() -> BTreeMap<String, f64> {
    let mut weights = BTreeMap::new();
    weights.insert("isolation_forest".to_string(), 0.5);
    weights.insert("autoencoder".to_string(), 0.3);
    weights.insert("centrality".to_string(), 0.2);
    weights
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            strategy: DetectionStrategy::Ensemble,
            features: vec!["amount".to_string()],
            threshold: 0.6,
            reuse_models: false,
            weights: default_weights(),
            risk_levels: RiskLevelThresholds::default(),
            isolation_forest: IsolationForestConfig::default(),
            autoencoder: AutoencoderConfig::default(),
        }
    }
}

/// Supervised classifier settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub enabled: bool,
    /// 0/1 column holding known-suspicious labels
    pub label_column: String,
    /// Fraction of rows held out for evaluation
    pub test_fraction: f64,
    pub forest: RandomForestConfig,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            label_column: "is_suspicious".to_string(),
            test_fraction: 0.2,
            forest: RandomForestConfig::default(),
        }
    }
}

/// Output locations; file names are relative to `dir`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub transactions_file: String,
    pub nodes_file: String,
    pub flags_file: String,
    pub graphml_file: String,
    /// Directory of fitted model artifacts
    pub models_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
            transactions_file: "transactions_scored.csv".to_string(),
            nodes_file: "nodes.csv".to_string(),
            flags_file: "flags.json".to_string(),
            graphml_file: "transaction_graph.graphml".to_string(),
            models_dir: PathBuf::from("models"),
        }
    }
}

impl OutputConfig {
    pub fn transactions_path(&self) -> PathBuf {
        self.dir.join(&self.transactions_file)
    }

    pub fn nodes_path(&self) -> PathBuf {
        self.dir.join(&self.nodes_file)
    }

    pub fn flags_path(&self) -> PathBuf {
        self.dir.join(&self.flags_file)
    }

    pub fn graphml_path(&self) -> PathBuf {
        self.dir.join(&self.graphml_file)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default file
    pub fn load() -> Result<Self> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific path, then apply `MONEYFLOW__*` overrides
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config = Config::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to build configuration from {}", path.display()))?;

        let config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        self.input.delimiter_byte()?;

        let detection = &self.detection;
        if detection.features.is_empty() {
            bail!("detection.features must name at least one column");
        }
        if !(0.0..=1.0).contains(&detection.threshold) {
            bail!("detection.threshold must be within [0, 1], got {}", detection.threshold);
        }
        if detection.weights.values().any(|&w| w < 0.0) {
            bail!("detection.weights must not be negative");
        }
        let contamination = detection.isolation_forest.contamination;
        if !(contamination > 0.0 && contamination <= 0.5) {
            bail!(
                "detection.isolation_forest.contamination must be within (0, 0.5], got {}",
                contamination
            );
        }
        let levels = &detection.risk_levels;
        if !(levels.medium <= levels.high && levels.high <= levels.critical) {
            bail!("detection.risk_levels must be ordered medium <= high <= critical");
        }

        let test_fraction = self.classifier.test_fraction;
        if !(test_fraction > 0.0 && test_fraction < 1.0) {
            bail!("classifier.test_fraction must be within (0, 1), got {}", test_fraction);
        }
        Ok(())
    }
}
