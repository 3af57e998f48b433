use thiserror::Error;

#[derive(Error, Debug)]
pub enum HedmError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Parse error in {path} line {line}: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },

    #[error("Observed catalog error: {0}")]
    Catalog(String),

    #[error("Dimension mismatch: expected {expected}, got {got} ({context})")]
    DimensionMismatch {
        expected: usize,
        got: usize,
        context: String,
    },

    #[error("Solver failed at iteration {iteration}: {message}")]
    Solver { iteration: usize, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type HedmResult<T> = Result<T, HedmError>;
