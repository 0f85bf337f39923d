//! Suspicious Money Flow - Main Entry Point
//!
//! Loads configuration, runs the batch pipeline once over the configured
//! transfer file, and logs a run summary.
//!
//! Usage: `suspicious-money-flow [config-path]`

use anyhow::{Context, Result};
use std::path::Path;
use suspicious_money_flow::config::{AppConfig, LogFormat, LoggingConfig, DEFAULT_CONFIG_PATH};
use suspicious_money_flow::Pipeline;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(
        format!("suspicious_money_flow={}", logging.level)
            .parse()
            .with_context(|| format!("Invalid log level '{}'", logging.level))?,
    );

    match logging.format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    Ok(())
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let explicit = args.get(1).map(String::as_str);
    let config_path = explicit.unwrap_or(DEFAULT_CONFIG_PATH);

    // Without an explicit path a missing default file means built-in defaults
    let use_defaults = explicit.is_none() && !Path::new(config_path).exists();
    let config = match explicit {
        _ if use_defaults => AppConfig::default(),
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };

    init_tracing(&config.logging)?;
    info!("Starting Suspicious Money Flow pipeline");
    if use_defaults {
        warn!(path = %config_path, "Configuration file not found, using defaults");
    } else {
        info!(path = %config_path, "Configuration loaded successfully");
    }
    info!(
        "Detection threshold: {:.2}, Risk levels: medium>={:.2}, high>={:.2}, critical>={:.2}",
        config.detection.threshold,
        config.detection.risk_levels.medium,
        config.detection.risk_levels.high,
        config.detection.risk_levels.critical
    );
    info!(
        strategy = ?config.detection.strategy,
        features = ?config.detection.features,
        edge_policy = ?config.graph.edge_policy,
        "Pipeline settings"
    );

    let pipeline = Pipeline::new(config)?;
    match pipeline.run() {
        Ok(run) => {
            run.metrics.print_summary();
            if let Some(evaluation) = &run.classification {
                info!(
                    "Classifier: accuracy={:.3} precision={:.3} recall={:.3} f1={:.3}",
                    evaluation.accuracy, evaluation.precision, evaluation.recall, evaluation.f1
                );
            }
            info!(
                run_id = %run.run_id,
                output = %pipeline.config().output.dir.display(),
                "Reports written"
            );
            Ok(())
        }
        Err(e) => {
            error!(
                stage = %e.stage,
                kind = e.source.kind(),
                error = %e.source,
                "Pipeline run failed"
            );
            std::process::exit(1);
        }
    }
}
