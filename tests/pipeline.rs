//! End-to-end runs of the pipeline over temporary directories

use std::fs;
use std::path::Path;
use suspicious_money_flow::config::AppConfig;
use suspicious_money_flow::graph::EdgePolicy;
use suspicious_money_flow::models::DetectionStrategy;
use suspicious_money_flow::types::RiskLevel;
use suspicious_money_flow::{Pipeline, Stage};

const TRANSFERS: &str = "\
sender,receiver,amount,time,frequency,is_suspicious
acct_0001,acct_0002,120.50,2024-01-02 10:15:00,2,0
acct_0002,acct_0003,89.99,2024-01-02 11:40:00,1,0
acct_0003,acct_0001,240.00,2024-01-03 09:05:00,3,0
acct_0004,acct_0005,56.25,2024-01-03 14:30:00,1,0
acct_0005,acct_0006,310.10,2024-01-04 16:45:00,2,0
acct_0006,acct_0004,75.00,2024-01-05 08:20:00,1,0
acct_0007,acct_0008,199.99,2024-01-05 12:10:00,4,0
acct_0008,acct_0009,45.00,2024-01-06 13:55:00,1,0
acct_0009,acct_0007,130.00,2024-01-06 17:25:00,2,0
acct_0001,acct_0004,220.00,2024-01-07 10:00:00,1,0
acct_0002,acct_0005,60.00,2024-01-07 15:35:00,2,0
acct_0003,acct_0006,95.75,2024-01-08 09:50:00,1,0
acct_0010,mule_001,18500.00,2024-01-08 02:14:00,22,1
mule_001,mule_002,18000.00,2024-01-08 03:02:00,25,1
mule_002,mule_003,17500.00,2024-01-08 03:47:00,31,1
mule_003,acct_0011,17000.00,2024-01-08 04:30:00,18,1
acct_0011,acct_0012,150.00,2024-01-09 11:15:00,2,0
acct_0012,acct_0010,88.00,2024-01-09 12:45:00,1,0
acct_0007,acct_0002,66.60,2024-01-10 10:05:00,3,0
acct_0008,acct_0003,,2024-01-10 11:20:00,1,0
acct_0009,acct_0001,140.00,2024-01-10 18:00:00,2,0
";

fn test_config(dir: &Path) -> AppConfig {
    fs::write(dir.join("transactions.csv"), TRANSFERS).unwrap();

    let mut config = AppConfig::default();
    config.input.path = dir.join("transactions.csv");
    config.output.dir = dir.join("output");
    config.output.models_dir = dir.join("models");
    config.detection.threshold = 0.9;
    config.detection.isolation_forest.contamination = 0.1;
    config.detection.autoencoder.epochs = 20;
    config.classifier.forest.num_trees = 20;
    config
}

#[test]
fn test_full_run_writes_reports() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let output = config.output.clone();

    let run = Pipeline::new(config).unwrap().run().unwrap();

    assert_eq!(run.metrics.rows_loaded, 21);
    assert_eq!(run.metrics.rows_incomplete, 1);
    assert_eq!(run.metrics.rows_scored, 20);
    assert_eq!(run.metrics.nodes, 15);
    assert_eq!(run.metrics.edges, 20);
    assert_eq!(run.report.transactions.len(), 20);
    assert_eq!(run.report.nodes.len(), 15);
    assert!(run.classification.is_some());
    assert!((run.table.records.iter().map(|r| r.amount).fold(0.0, f64::max) - 1.0).abs() < 1e-12);

    // Only transfers through the mule ring stand out
    assert!(!run.report.flags.is_empty());
    for flag in &run.report.flags {
        assert!(
            flag.sender.starts_with("mule") || flag.receiver.starts_with("mule"),
            "unexpected flag {} -> {}",
            flag.sender,
            flag.receiver
        );
    }

    let scored = fs::read_to_string(output.transactions_path()).unwrap();
    let header = scored.lines().next().unwrap();
    assert!(header.starts_with("sender,receiver,amount,time,frequency,is_suspicious,anomaly_score"));
    assert!(header.ends_with("risk_score,risk_level"));
    assert_eq!(scored.lines().count(), 21);

    let nodes = fs::read_to_string(output.nodes_path()).unwrap();
    assert_eq!(nodes.lines().count(), 16);

    let flags: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(output.flags_path()).unwrap()).unwrap();
    assert_eq!(flags.as_array().unwrap().len(), run.report.flags.len());

    let graphml = fs::read_to_string(output.graphml_path()).unwrap();
    assert!(graphml.contains(r#"<node id="mule_001"/>"#));
    assert!(graphml.contains(r#"<edge source="mule_001" target="mule_002">"#));

    for model in ["isolation_forest", "autoencoder", "random_forest"] {
        assert!(dir.path().join("models").join(format!("{}.json", model)).exists());
    }
}

#[test]
fn test_reused_models_give_same_scores() {
    let dir = tempfile::tempdir().unwrap();
    let first = Pipeline::new(test_config(dir.path())).unwrap().run().unwrap();

    let mut config = test_config(dir.path());
    config.detection.reuse_models = true;
    let second = Pipeline::new(config).unwrap().run().unwrap();

    let scores = |run: &suspicious_money_flow::RunReport| {
        run.report
            .transactions
            .iter()
            .map(|t| (t.isolation_score, t.anomaly, t.risk_level))
            .collect::<Vec<(Option<f64>, Option<i8>, RiskLevel)>>()
    };
    assert_eq!(scores(&first), scores(&second));
}

#[test]
fn test_semicolon_input_without_time() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("transfers.csv"),
        "sender;receiver;amount\nA;B;-10\nA;B;30\nB;C;20\nC;A;40\n",
    )
    .unwrap();

    let mut config = AppConfig::default();
    config.input.path = dir.path().join("transfers.csv");
    config.input.delimiter = ';';
    config.graph.edge_policy = EdgePolicy::LastWrite;
    config.detection.strategy = DetectionStrategy::IsolationForest;
    config.detection.isolation_forest.contamination = 0.25;
    config.output.dir = dir.path().join("output");
    config.output.models_dir = dir.path().join("models");

    let run = Pipeline::new(config).unwrap().run().unwrap();

    assert_eq!(run.metrics.edges, 3);
    assert_eq!(run.metrics.communities, 1);
    assert!(run.classification.is_none());
    assert!(run.report.transactions.iter().all(|t| t.anomaly_score.is_none()));
    // |-10| / 40
    assert!((run.table.records[0].amount - 0.25).abs() < 1e-12);
    assert!(!dir.path().join("models").join("autoencoder.json").exists());
}

#[test]
fn test_missing_column_fails_before_output() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("bad.csv"), "sender,receiver,value\nA,B,1\n").unwrap();

    let mut config = AppConfig::default();
    config.input.path = dir.path().join("bad.csv");
    config.output.dir = dir.path().join("output");

    let err = Pipeline::new(config).unwrap().run().unwrap_err();
    assert_eq!(err.stage, Stage::Ingestion);
    assert_eq!(err.source.kind(), "FormatError");
    assert!(err.to_string().contains("amount"));
    assert!(!dir.path().join("output").exists());
}

#[test]
fn test_failed_write_leaves_no_partial_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let output = config.output.clone();
    // The GraphML target is taken by a directory, so the last report rename fails
    fs::create_dir_all(output.graphml_path()).unwrap();

    let err = Pipeline::new(config).unwrap().run().unwrap_err();

    assert_eq!(err.stage, Stage::Reporting);
    assert_eq!(err.source.kind(), "IoError");
    assert!(!output.transactions_path().exists());
    assert!(!output.nodes_path().exists());
    assert!(!output.flags_path().exists());
    assert!(!dir.path().join("models").exists());
    assert_eq!(fs::read_dir(&output.dir).unwrap().count(), 1);
}
