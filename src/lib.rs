//! Suspicious Money Flow Library
//!
//! Batch pipeline that loads transfer records, builds a directed transaction
//! graph, scores every transfer with anomaly models and reports the ones
//! worth a closer look.

pub mod cleaning;
pub mod config;
pub mod error;
pub mod feature_extractor;
pub mod graph;
pub mod ingest;
pub mod metrics;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod report;
pub mod types;

pub use config::AppConfig;
pub use error::{PipelineError, Result, Stage, StageError};
pub use feature_extractor::FeatureExtractor;
pub use graph::TransactionGraph;
pub use models::inference::DetectionEngine;
pub use pipeline::{Pipeline, RunReport};
pub use types::{alert::SuspicionFlag, transaction::Transaction};
