//! Error types for the money flow pipeline

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors raised by individual pipeline stages
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Input source does not exist
    #[error("input not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Missing or malformed required column
    #[error("format error: {0}")]
    Format(String),

    /// Normalization over a table whose amounts are all zero
    #[error("cannot normalize amounts: maximum amount is zero")]
    DivideByZero,

    /// Feature width at score time differs from fit time
    #[error("feature shape mismatch: model fitted on {expected} columns, got {actual}")]
    Shape { expected: usize, actual: usize },

    /// Model used before `fit`
    #[error("model '{0}' has not been fitted")]
    NotFitted(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Taxonomy name surfaced to the user when a run fails
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::NotFound(_) => "NotFoundError",
            PipelineError::Format(_) => "FormatError",
            PipelineError::DivideByZero => "DivideByZeroError",
            PipelineError::Shape { .. } => "ShapeError",
            PipelineError::NotFitted(_) => "NotFittedError",
            PipelineError::Io(_) => "IoError",
            PipelineError::Csv(_) => "CsvError",
            PipelineError::Json(_) => "JsonError",
        }
    }

    pub(crate) fn format(msg: impl Into<String>) -> Self {
        PipelineError::Format(msg.into())
    }
}

/// Pipeline stage, used to report where a run aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ingestion,
    Cleaning,
    GraphBuild,
    GraphAnalysis,
    Scoring,
    Classification,
    Reporting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Ingestion => "ingestion",
            Stage::Cleaning => "cleaning",
            Stage::GraphBuild => "graph-build",
            Stage::GraphAnalysis => "graph-analysis",
            Stage::Scoring => "scoring",
            Stage::Classification => "classification",
            Stage::Reporting => "reporting",
        };
        f.write_str(name)
    }
}

/// A stage failure as seen by the pipeline driver
#[derive(Debug, Error)]
#[error("{stage} stage failed ({kind}): {source}", kind = .source.kind())]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: PipelineError,
}

/// Attach the failing stage to a stage result
pub(crate) trait StageContext<T> {
    fn in_stage(self, stage: Stage) -> std::result::Result<T, StageError>;
}

impl<T> StageContext<T> for Result<T> {
    fn in_stage(self, stage: Stage) -> std::result::Result<T, StageError> {
        self.map_err(|source| StageError { stage, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(PipelineError::DivideByZero.kind(), "DivideByZeroError");
        assert_eq!(
            PipelineError::Shape { expected: 2, actual: 3 }.kind(),
            "ShapeError"
        );
        assert_eq!(PipelineError::format("missing sender").kind(), "FormatError");
    }

    #[test]
    fn test_stage_error_message() {
        let err: Result<()> = Err(PipelineError::NotFound(PathBuf::from("missing.csv")));
        let staged = err.in_stage(Stage::Ingestion).unwrap_err();

        let message = staged.to_string();
        assert!(message.contains("ingestion"));
        assert!(message.contains("NotFoundError"));
        assert!(message.contains("missing.csv"));
    }
}
