use thiserror::Error;

use crate::metric::Metric;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Metric {metric} is not supported by the {backend} index")]
    UnsupportedMetric { backend: &'static str, metric: Metric },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Index is not ready: build or prepare it before querying")]
    IndexNotReady,

    #[error("Corpus is empty: no answered questions to index")]
    EmptyCorpus,

    #[error("Invalid pooling input for {strategy}: {reason}")]
    InvalidPoolingInput { strategy: &'static str, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Corrupt index blob: {0}")]
    CorruptIndex(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    External(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
