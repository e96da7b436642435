use thiserror::Error;

use super::entities::SessionId;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("invalid stored value: {0}")]
    InvalidData(String),

    #[error("{0} not found")]
    SessionNotFound(SessionId),
}

pub type StorageResult<T> = Result<T, StorageError>;
