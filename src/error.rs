use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid test name '{0}', expected <class>#<method>")]
    InvalidTestName(String),

    #[error("Mutants log not found: {}", .0.display())]
    MissingMutantsLog(PathBuf),

    #[error("Coverage parsing error: {0}")]
    Coverage(String),

    #[error("Baseline run of {test} failed ({reason}); refusing to compare mutants against it")]
    FailingBaseline { test: String, reason: String },

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Run {0} not found in database")]
    RunNotFound(i64),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
