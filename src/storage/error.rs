//! Error types for repository operations

use thiserror::Error;

/// Result type alias for repository operations
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Errors that can occur while talking to the durable store
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The requested row does not exist
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// Database connection failed
    #[error("failed to connect to repository: {0}")]
    ConnectionFailed(String),

    /// Database query failed
    #[error("repository query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("database migration failed: {0}")]
    MigrationFailed(String),

    /// A stored value could not be decoded into the domain model
    #[error("stored value could not be decoded: {0}")]
    SerializationError(String),

    /// The store refused to serve requests (closed or unreachable)
    #[error("repository unavailable: {0}")]
    Unavailable(String),

    /// I/O error (file access, etc.)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) => RepositoryError::IoError(io_err),
            sqlx::Error::PoolClosed => RepositoryError::Unavailable("pool closed".to_string()),
            sqlx::Error::PoolTimedOut => {
                RepositoryError::Unavailable("timed out acquiring connection".to_string())
            }
            _ => RepositoryError::QueryFailed(err.to_string()),
        }
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::migrate::MigrateError> for RepositoryError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        RepositoryError::MigrationFailed(err.to_string())
    }
}
