use thiserror::Error;

#[derive(Debug, Error)]
pub enum UsageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Returned before any network call when today's tokens already exceed
    /// the configured ceiling.
    #[error("daily token quota exceeded: {used} of {limit} tokens used today")]
    QuotaExceeded { used: u64, limit: u64 },
}

pub type Result<T> = std::result::Result<T, UsageError>;
