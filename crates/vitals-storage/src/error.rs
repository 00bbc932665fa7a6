use sea_orm::{DbErr, RuntimeErr};

/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use vitals_storage::error::StorageError;
///
/// let err = StorageError::NotFound {
///     kind: "gauge",
///     id: "Alloc".to_string(),
/// };
/// assert!(err.to_string().contains("Alloc"));
/// assert!(!err.is_transient());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested metric has never been written.
    #[error("Storage: {kind} {id:?} not found")]
    NotFound { kind: &'static str, id: String },

    /// A database error. Whether it is worth retrying depends on the cause,
    /// see [`StorageError::is_transient`].
    #[error("Storage: database error: {0}")]
    Db(#[from] DbErr),

    /// Snapshot file access failed.
    #[error("Storage: I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot could not be encoded or decoded.
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Schema, configuration or data problem that retrying cannot fix.
    #[error("Storage: {0}")]
    Permanent(String),
}

impl StorageError {
    /// Connection-level failures and lock conflicts are transient; everything
    /// else, including constraint violations and missing rows, is not.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Db(err) => db_err_is_transient(err),
            _ => false,
        }
    }
}

fn db_err_is_transient(err: &DbErr) -> bool {
    match err {
        DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => true,
        DbErr::Exec(RuntimeErr::SqlxError(e)) | DbErr::Query(RuntimeErr::SqlxError(e)) => {
            sqlx_is_transient(e)
        }
        _ => false,
    }
}

fn sqlx_is_transient(err: &sea_orm::sqlx::Error) -> bool {
    use sea_orm::sqlx::Error;
    match err {
        Error::Io(_) | Error::PoolTimedOut | Error::PoolClosed | Error::WorkerCrashed => true,
        // Postgres class 08 (connection exception), serialization failure,
        // deadlock; SQLite busy/locked.
        Error::Database(db) => db.code().is_some_and(|code| {
            code.starts_with("08") || code == "40001" || code == "40P01" || code == "5" || code == "6"
        }),
        _ => false,
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
