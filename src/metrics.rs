//! Run statistics for the money flow pipeline.

use crate::error::Stage;
use crate::types::alert::RiskLevel;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

/// Statistics collected over one pipeline run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunMetrics {
    /// Rows read from the source
    pub rows_loaded: usize,
    /// Rows dropped for missing values
    pub rows_incomplete: usize,
    /// Rows dropped for non-positive amounts
    pub rows_non_positive: usize,
    /// Rows that reached scoring
    pub rows_scored: usize,
    pub nodes: usize,
    pub edges: usize,
    pub communities: usize,
    pub modularity: f64,
    /// Records labelled -1 by the isolation forest
    pub anomalies: usize,
    pub flags: usize,
    flags_by_level: BTreeMap<RiskLevel, usize>,
    /// Risk score buckets of width 0.1
    score_buckets: [usize; 10],
    /// Wall time per stage, in run order
    stage_times: Vec<(String, Duration)>,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record how long a stage took
    pub fn record_stage(&mut self, stage: Stage, elapsed: Duration) {
        self.stage_times.push((stage.to_string(), elapsed));
    }

    /// Record one record's risk score
    pub fn record_risk(&mut self, risk_score: f64) {
        let bucket = (risk_score.clamp(0.0, 1.0) * 10.0).min(9.0) as usize;
        self.score_buckets[bucket] += 1;
    }

    /// Record a flagged transfer
    pub fn record_flag(&mut self, level: RiskLevel) {
        self.flags += 1;
        *self.flags_by_level.entry(level).or_insert(0) += 1;
    }

    pub fn total_time(&self) -> Duration {
        self.stage_times.iter().map(|(_, d)| *d).sum()
    }

    /// Fraction of scored rows that were flagged, in percent
    pub fn flag_rate(&self) -> f64 {
        if self.rows_scored > 0 {
            (self.flags as f64 / self.rows_scored as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║          SUSPICIOUS MONEY FLOW - RUN SUMMARY                 ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Rows Loaded:      {:>8}  │  Incomplete Dropped: {:>8} ║",
            self.rows_loaded, self.rows_incomplete
        );
        info!(
            "║ Rows Scored:      {:>8}  │  Non-positive Dropped: {:>6} ║",
            self.rows_scored, self.rows_non_positive
        );
        info!(
            "║ Nodes: {:>8}  Edges: {:>8}  Communities: {:>8}      ║",
            self.nodes, self.edges, self.communities
        );
        info!(
            "║ Modularity: {:>6.3}  │  Anomalies: {:>6}  │  Flagged: {:>6}  ║",
            self.modularity, self.anomalies, self.flags
        );
        info!(
            "║ Flag Rate: {:>6.2}%  │  Total Time (ms): {:>10.2}            ║",
            self.flag_rate(),
            self.total_time().as_secs_f64() * 1000.0
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Stage Times (ms):                                            ║");
        for (stage, elapsed) in &self.stage_times {
            info!(
                "║   {:16}: {:>10.2}                                 ║",
                stage,
                elapsed.as_secs_f64() * 1000.0
            );
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Flags by Risk Level:                                         ║");
        for (level, count) in &self.flags_by_level {
            let pct = if self.flags > 0 {
                (*count as f64 / self.flags as f64) * 100.0
            } else {
                0.0
            };
            info!(
                "║   {:10}: {:>6} ({:>5.1}%)                                ║",
                level.as_str(),
                count,
                pct
            );
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Risk Score Distribution:                                     ║");
        let total: usize = self.score_buckets.iter().sum();
        for (i, &count) in self.score_buckets.iter().enumerate() {
            let pct = if total > 0 { (count as f64 / total as f64) * 100.0 } else { 0.0 };
            let bar: String = "█".repeat(((pct / 2.0) as usize).min(20));
            info!(
                "║   {:.1}-{:.1}: {:>6} ({:>5.1}%) {}",
                i as f64 / 10.0,
                (i + 1) as f64 / 10.0,
                count,
                pct,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let mut metrics = RunMetrics::new();
        metrics.rows_scored = 4;

        metrics.record_risk(0.05);
        metrics.record_risk(0.55);
        metrics.record_risk(1.0);
        metrics.record_flag(RiskLevel::High);
        metrics.record_flag(RiskLevel::Critical);

        assert_eq!(metrics.flags, 2);
        assert_eq!(metrics.flags_by_level.get(&RiskLevel::High), Some(&1));
        assert_eq!(metrics.score_buckets[0], 1);
        assert_eq!(metrics.score_buckets[5], 1);
        assert_eq!(metrics.score_buckets[9], 1);
        assert!((metrics.flag_rate() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_stage_times() {
        let mut metrics = RunMetrics::new();
        metrics.record_stage(Stage::Ingestion, Duration::from_millis(5));
        metrics.record_stage(Stage::GraphBuild, Duration::from_millis(7));

        assert_eq!(metrics.stage_times[1].0, "graph-build");
        assert_eq!(metrics.total_time(), Duration::from_millis(12));
    }
}
