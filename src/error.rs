use thiserror::Error;

/// Typed failure taxonomy shared across the pipeline. File-scoped errors are
/// recovered by the orchestrator (skip and continue); the rest abort the run.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("transport error talking to {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("rate limited by embedding provider, retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("permanent provider error: {0}")]
    Permanent(String),

    #[error("local state at {path} is corrupt: {reason}")]
    CorruptState { path: String, reason: String },

    #[error("could not read file {path}: {source}")]
    FileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("upsert of {file_path} partially failed: {reason}")]
    PartialUpsert { file_path: String, reason: String },

    #[error("another indexing operation holds the lock at {lock_path}")]
    ConcurrentIndexing { lock_path: String },

    #[error("indexing operation was cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IndexError {
    /// Whether a caller should retry this error with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IndexError::Transport { .. } | IndexError::RateLimited { .. })
    }
}

impl From<reqwest::Error> for IndexError {
    fn from(e: reqwest::Error) -> Self {
        let endpoint = e.url().map(|u| u.to_string()).unwrap_or_default();
        IndexError::Transport { endpoint, source: e.into() }
    }
}

impl From<git2::Error> for IndexError {
    fn from(e: git2::Error) -> Self {
        IndexError::Other(anyhow::anyhow!("git error: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
