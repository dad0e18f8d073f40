use thiserror::Error;

/// Every failure the engine can report.
///
/// There is no recoverable tier: each variant means the run should stop.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Matrix shapes do not line up for the requested operation.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),
    /// The pipeline/loss pairing cannot be differentiated.
    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),
    /// A loader failed to open, read, or decode its backing data.
    #[error("loader error: {0}")]
    Loader(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
    /// A shared lock was poisoned or a worker thread panicked.
    #[error("concurrency error: {0}")]
    Concurrency(String),
}

pub type Result<T> = std::result::Result<T, Error>;
