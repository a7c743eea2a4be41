use thiserror::Error;

/// Error type used by operations in this crate.
#[derive(Debug, Error)]
pub enum DitherError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("operation requires at least one point")]
    EmptyPointSet,
    #[error("point {index} has dimension {found}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("dataset has {points} points but k = {k}; add more data or decrease k")]
    TooFewPoints { points: usize, k: usize },
    #[error("metric '{metric}' needs at least {required} dimensions, points have {found}")]
    MetricDimension {
        metric: String,
        required: usize,
        found: usize,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    ParseFloat(#[from] std::num::ParseFloatError),
    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

/// Convenient alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, DitherError>;
