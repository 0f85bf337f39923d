//! Joins per-record anomaly scores with per-node graph metrics.
//!
//! Assembly is pure. The `write_*` functions encode into any writer; the
//! pipeline points them at an [`OutputBatch`](crate::output::OutputBatch).

use crate::error::Result;
use crate::graph::{CentralityMap, Partition, TransactionGraph};
use crate::models::aggregator::scale_by_max;
use crate::models::{ScoreAggregator, ScoreSet};
use crate::types::alert::{RiskLevel, RiskLevelThresholds, SuspicionFlag};
use crate::types::transaction::TransactionTable;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use tracing::debug;

/// Signal name for graph centrality
pub const CENTRALITY_SIGNAL: &str = "centrality";

/// Columns appended to the source columns in the transaction report
pub const TRANSACTION_SCORE_COLUMNS: [&str; 9] = [
    "anomaly_score",
    "isolation_score",
    "anomaly",
    "sender_centrality",
    "receiver_centrality",
    "sender_community",
    "receiver_community",
    "risk_score",
    "risk_level",
];

/// Turns normalized signals into a risk score, level and flag decision
#[derive(Debug, Clone)]
pub struct RiskScorer {
    aggregator: ScoreAggregator,
    threshold: f64,
    levels: RiskLevelThresholds,
}

impl RiskScorer {
    pub fn new(weights: BTreeMap<String, f64>, threshold: f64, levels: RiskLevelThresholds) -> Self {
        Self {
            aggregator: ScoreAggregator::new(weights),
            threshold,
            levels,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn risk(&self, signals: &BTreeMap<String, f64>) -> (f64, RiskLevel) {
        let score = self.aggregator.aggregate(signals);
        (score, RiskLevel::from_score(score, &self.levels))
    }

    /// Signals at or above the flag threshold, as `name:score`
    pub fn triggered(&self, signals: &BTreeMap<String, f64>) -> Vec<String> {
        signals
            .iter()
            .filter(|(_, &score)| score >= self.threshold)
            .map(|(name, score)| format!("{}:{:.2}", name, score))
            .collect()
    }
}

impl Default for RiskScorer {
    fn default() -> Self {
        Self {
            aggregator: ScoreAggregator::default(),
            threshold: 0.6,
            levels: RiskLevelThresholds::default(),
        }
    }
}

/// Scores and graph metrics for one record of the cleaned table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredTransaction {
    pub record_index: usize,
    /// Autoencoder reconstruction error
    pub anomaly_score: Option<f64>,
    pub isolation_score: Option<f64>,
    /// Isolation forest label, -1 anomaly or 1 normal
    pub anomaly: Option<i8>,
    pub sender_centrality: f64,
    pub receiver_centrality: f64,
    pub sender_community: Option<usize>,
    pub receiver_community: Option<usize>,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
}

/// Per-node row of the node report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRow {
    pub node: String,
    pub in_degree: usize,
    pub out_degree: usize,
    pub centrality: f64,
    pub community: Option<usize>,
    pub total_inflow: f64,
    pub total_outflow: f64,
    /// Flagged transfers sent or received by this node
    pub flagged_transfers: usize,
}

/// Everything the reporting stage writes
#[derive(Debug, Clone)]
pub struct Report {
    pub transactions: Vec<ScoredTransaction>,
    pub nodes: Vec<NodeRow>,
    pub flags: Vec<SuspicionFlag>,
}

/// Graph-side inputs of the report
pub struct GraphMetrics<'a> {
    pub graph: &'a TransactionGraph,
    pub centrality: &'a CentralityMap,
    pub partition: &'a Partition,
}

/// Build the transaction report, node report and flags.
///
/// `scores` must hold one entry per record of `table` for every model that ran.
pub fn assemble_report(
    table: &TransactionTable,
    metrics: &GraphMetrics<'_>,
    scores: &ScoreSet,
    scorer: &RiskScorer,
) -> Report {
    let mut signals = scores.normalized_signals();
    signals.resize_with(table.len(), BTreeMap::new);

    let centrality_of = |node: &str| metrics.centrality.get(node).copied().unwrap_or(0.0);

    // Directed degree centrality reaches 2.0, so the signal is scaled by the run maximum
    let endpoint_centrality: Vec<f64> = table
        .records
        .iter()
        .map(|r| centrality_of(&r.sender).max(centrality_of(&r.receiver)))
        .collect();
    let centrality_signal = scale_by_max(&endpoint_centrality);

    let mut transactions = Vec::with_capacity(table.len());
    let mut flags = Vec::new();
    let mut flagged_by_node: HashMap<&str, usize> = HashMap::new();

    let rows = table.records.iter().zip(signals).zip(centrality_signal);
    for (idx, ((record, mut record_signals), centrality)) in rows.enumerate() {
        let sender_centrality = centrality_of(&record.sender);
        let receiver_centrality = centrality_of(&record.receiver);
        record_signals.insert(CENTRALITY_SIGNAL.to_string(), centrality);

        let (risk_score, risk_level) = scorer.risk(&record_signals);
        let labelled = scores.is_labelled_anomaly(idx);

        if risk_score >= scorer.threshold() || labelled {
            let mut triggered = scorer.triggered(&record_signals);
            if labelled {
                triggered.push("isolation_forest:label".to_string());
            }

            debug!(
                record = idx,
                sender = %record.sender,
                receiver = %record.receiver,
                risk_score,
                risk_level = %risk_level.as_str(),
                "Transfer flagged"
            );

            *flagged_by_node.entry(record.sender.as_str()).or_insert(0) += 1;
            if record.receiver != record.sender {
                *flagged_by_node.entry(record.receiver.as_str()).or_insert(0) += 1;
            }

            flags.push(
                SuspicionFlag::new(
                    idx,
                    record.sender.clone(),
                    record.receiver.clone(),
                    record.amount,
                    risk_score,
                    risk_level,
                )
                .with_signals(record_signals, triggered),
            );
        }

        transactions.push(ScoredTransaction {
            record_index: idx,
            anomaly_score: scores.autoencoder.as_ref().and_then(|s| s.get(idx).copied()),
            isolation_score: scores
                .isolation_scores
                .as_ref()
                .and_then(|s| s.get(idx).copied()),
            anomaly: scores
                .isolation_labels
                .as_ref()
                .and_then(|s| s.get(idx).copied()),
            sender_centrality,
            receiver_centrality,
            sender_community: metrics.partition.community_of(&record.sender),
            receiver_community: metrics.partition.community_of(&record.receiver),
            risk_score,
            risk_level,
        });
    }

    let nodes = metrics
        .graph
        .nodes()
        .map(|node| NodeRow {
            node: node.to_string(),
            in_degree: metrics.graph.in_degree(node),
            out_degree: metrics.graph.out_degree(node),
            centrality: centrality_of(node),
            community: metrics.partition.community_of(node),
            total_inflow: metrics.graph.total_inflow(node),
            total_outflow: metrics.graph.total_outflow(node),
            flagged_transfers: flagged_by_node.get(node).copied().unwrap_or(0),
        })
        .collect();

    Report {
        transactions,
        nodes,
        flags,
    }
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Write source columns plus score columns, one row per record
pub fn write_transactions_csv<W: Write>(
    out: W,
    table: &TransactionTable,
    rows: &[ScoredTransaction],
) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);

    let mut header: Vec<&str> = table.headers.iter().map(String::as_str).collect();
    header.extend(TRANSACTION_SCORE_COLUMNS);
    writer.write_record(&header)?;

    for row in rows {
        let record = &table.records[row.record_index];
        let mut fields: Vec<String> = table
            .headers
            .iter()
            .map(|column| table.value(record, column).unwrap_or_default())
            .collect();
        fields.extend([
            optional(row.anomaly_score),
            optional(row.isolation_score),
            optional(row.anomaly),
            row.sender_centrality.to_string(),
            row.receiver_centrality.to_string(),
            optional(row.sender_community),
            optional(row.receiver_community),
            row.risk_score.to_string(),
            row.risk_level.as_str().to_string(),
        ]);
        writer.write_record(&fields)?;
    }

    writer.flush()?;
    debug!(rows = rows.len(), "Transaction report encoded");
    Ok(())
}

/// Write the per-node report
pub fn write_nodes_csv<W: Write>(out: W, nodes: &[NodeRow]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    for node in nodes {
        writer.serialize(node)?;
    }
    writer.flush()?;
    debug!(nodes = nodes.len(), "Node report encoded");
    Ok(())
}

/// Write flagged transfers as a JSON array
pub fn write_flags_json<W: Write>(out: W, flags: &[SuspicionFlag]) -> Result<()> {
    serde_json::to_writer_pretty(out, flags)?;
    debug!(flags = flags.len(), "Flags encoded");
    Ok(())
}
