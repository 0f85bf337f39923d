//! Stage orchestration for one batch run.
//!
//! Stages run in order (ingestion, cleaning, graph build, graph analysis,
//! scoring, classification, reporting) inside a single `run` span. Nothing is
//! written until every earlier stage has succeeded, and the reporting stage
//! commits all files of the run as one batch.

use crate::cleaning::clean;
use crate::config::AppConfig;
use crate::error::{PipelineError, Result, Stage, StageContext, StageError};
use crate::feature_extractor::FeatureExtractor;
use crate::graph::{
    build_graph, degree_centrality, detect_communities, modularity, top_central, write_graphml,
    TransactionGraph,
};
use crate::ingest::load_transactions;
use crate::metrics::RunMetrics;
use crate::models::random_forest::{evaluate, train_test_split};
use crate::models::{ClassificationReport, DetectionEngine, ModelStore, RandomForest};
use crate::output::OutputBatch;
use crate::report::{
    assemble_report, write_flags_json, write_nodes_csv, write_transactions_csv, GraphMetrics,
    Report, RiskScorer,
};
use crate::types::transaction::TransactionTable;
use ndarray::{Array2, Axis};
use std::time::Instant;
use tracing::{info, info_span, warn};
use uuid::Uuid;

/// Model name of the persisted classifier
pub const RANDOM_FOREST: &str = "random_forest";

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub table: TransactionTable,
    pub report: Report,
    /// Most central nodes, highest first
    pub top_central: Vec<(String, f64)>,
    pub classification: Option<ClassificationReport>,
    pub metrics: RunMetrics,
}

/// Batch pipeline driven by an [`AppConfig`]
pub struct Pipeline {
    config: AppConfig,
}

impl Pipeline {
    /// Create a pipeline; the configuration is validated first
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Run every stage once over the configured input
    pub fn run(&self) -> std::result::Result<RunReport, StageError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", run_id = %run_id);
        let _guard = span.enter();

        let config = &self.config;
        let mut metrics = RunMetrics::new();
        info!(input = %config.input.path.display(), "Starting pipeline run");

        // Ingestion
        let started = Instant::now();
        let delimiter = config
            .input
            .delimiter_byte()
            .map_err(|e| PipelineError::format(e.to_string()))
            .in_stage(Stage::Ingestion)?;
        let raw = load_transactions(&config.input.path, delimiter).in_stage(Stage::Ingestion)?;
        metrics.rows_loaded = raw.len();
        metrics.record_stage(Stage::Ingestion, started.elapsed());

        // Cleaning
        let started = Instant::now();
        let cleaned = clean(raw, &config.cleaning).in_stage(Stage::Cleaning)?;
        metrics.rows_incomplete = cleaned.incomplete_removed;
        metrics.rows_non_positive = cleaned.non_positive_removed;
        let table = cleaned.table;
        metrics.record_stage(Stage::Cleaning, started.elapsed());

        // Graph build
        let started = Instant::now();
        let graph = build_graph(&table, config.graph.edge_policy).in_stage(Stage::GraphBuild)?;
        metrics.nodes = graph.node_count();
        metrics.edges = graph.edge_count();
        metrics.record_stage(Stage::GraphBuild, started.elapsed());

        // Graph analysis
        let started = Instant::now();
        let centrality = degree_centrality(&graph);
        let partition = detect_communities(&graph);
        metrics.communities = partition.len();
        metrics.modularity = modularity(&graph, &partition);
        let top = top_central(&centrality, config.graph.top_central);
        for (rank, (node, value)) in top.iter().enumerate() {
            info!(rank = rank + 1, node = %node, centrality = value, "Central node");
        }
        info!(
            communities = metrics.communities,
            modularity = metrics.modularity,
            "Communities detected"
        );
        metrics.record_stage(Stage::GraphAnalysis, started.elapsed());

        // Scoring
        let started = Instant::now();
        let detection = &config.detection;
        let store = ModelStore::new(&config.output.models_dir);
        let extractor = FeatureExtractor::new(detection.features.clone());
        let features = extractor.extract(&table).in_stage(Stage::Scoring)?;
        info!(
            rows = features.nrows(),
            features = ?extractor.feature_names(),
            "Feature matrix extracted"
        );

        let mut engine = DetectionEngine::new(
            detection.strategy,
            detection.isolation_forest.clone(),
            detection.autoencoder.clone(),
        );
        if detection.reuse_models {
            let loaded = engine.load_models(&store).in_stage(Stage::Scoring)?;
            info!(loaded, "Reusing fitted models");
        }
        engine.fit(&features).in_stage(Stage::Scoring)?;
        let scores = engine.score(&features).in_stage(Stage::Scoring)?;
        metrics.rows_scored = scores.len();
        metrics.anomalies = scores.anomaly_count();
        metrics.record_stage(Stage::Scoring, started.elapsed());

        // Classification
        let started = Instant::now();
        let classifier = self
            .train_classifier(&table, &features)
            .in_stage(Stage::Classification)?;
        metrics.record_stage(Stage::Classification, started.elapsed());

        // Reporting
        let started = Instant::now();
        let scorer = RiskScorer::new(
            detection.weights.clone(),
            detection.threshold,
            detection.risk_levels.clone(),
        );
        let graph_metrics = GraphMetrics {
            graph: &graph,
            centrality: &centrality,
            partition: &partition,
        };
        let report = assemble_report(&table, &graph_metrics, &scores, &scorer);
        for row in &report.transactions {
            metrics.record_risk(row.risk_score);
        }
        for flag in &report.flags {
            metrics.record_flag(flag.risk_level);
        }

        // Reports and model artifacts land together or not at all
        let written = self
            .stage_outputs(&table, &report, &graph)
            .and_then(|mut batch| {
                engine.stage_models(&store, &mut batch)?;
                if let Some((forest, _)) = &classifier {
                    store.stage(&mut batch, RANDOM_FOREST, forest)?;
                }
                info!(files = batch.len(), "Outputs staged");
                batch.commit()
            })
            .in_stage(Stage::Reporting)?;
        for path in &written {
            info!(path = %path.display(), "Output written");
        }
        metrics.record_stage(Stage::Reporting, started.elapsed());

        info!(
            flags = metrics.flags,
            anomalies = metrics.anomalies,
            elapsed_ms = metrics.total_time().as_millis() as u64,
            "Pipeline run complete"
        );

        Ok(RunReport {
            run_id,
            table,
            report,
            top_central: top,
            classification: classifier.map(|(_, evaluation)| evaluation),
            metrics,
        })
    }

    fn stage_outputs(
        &self,
        table: &TransactionTable,
        report: &Report,
        graph: &TransactionGraph,
    ) -> Result<OutputBatch> {
        let output = &self.config.output;
        let mut batch = OutputBatch::new();
        batch.stage(output.transactions_path(), |out| {
            write_transactions_csv(out, table, &report.transactions)
        })?;
        batch.stage(output.nodes_path(), |out| write_nodes_csv(out, &report.nodes))?;
        batch.stage(output.flags_path(), |out| write_flags_json(out, &report.flags))?;
        batch.stage(output.graphml_path(), |out| write_graphml(graph, out))?;
        Ok(batch)
    }

    /// Train and evaluate the random forest when enabled and labels are present
    fn train_classifier(
        &self,
        table: &TransactionTable,
        features: &Array2<f64>,
    ) -> Result<Option<(RandomForest, ClassificationReport)>> {
        let settings = &self.config.classifier;
        if !settings.enabled {
            return Ok(None);
        }
        if table.extra_index(&settings.label_column).is_none() {
            warn!(
                column = %settings.label_column,
                "Label column not present, skipping classifier"
            );
            return Ok(None);
        }

        let labels = FeatureExtractor::extract_labels(table, &settings.label_column)?;
        let (train, test) =
            train_test_split(labels.len(), settings.test_fraction, settings.forest.seed);

        let x_train = features.select(Axis(0), &train);
        let y_train: Vec<u8> = train.iter().map(|&i| labels[i]).collect();
        let x_test = features.select(Axis(0), &test);
        let y_test: Vec<u8> = test.iter().map(|&i| labels[i]).collect();

        let mut forest = RandomForest::new(settings.forest.clone());
        forest.fit(&x_train, &y_train)?;
        let evaluation = evaluate(&forest, &x_test, &y_test)?;

        info!(
            train_rows = train.len(),
            test_rows = test.len(),
            accuracy = evaluation.accuracy,
            precision = evaluation.precision,
            recall = evaluation.recall,
            f1 = evaluation.f1,
            "Classifier evaluated"
        );
        Ok(Some((forest, evaluation)))
    }
}
