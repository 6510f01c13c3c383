//! Errors surfaced by repository ports.

use thiserror::Error;

/// Errors from the persistent store.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Row not found")]
    RowNotFound,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DatabaseError {
    /// Whether retrying the operation could succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionFailed(_) | Self::QueryFailed(_))
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::RowNotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() || db.is_foreign_key_violation() => {
                Self::ConstraintViolation(db.to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::ConnectionFailed(err.to_string())
            }
            other => Self::QueryFailed(other.to_string()),
        }
    }
}

impl From<uuid::Error> for DatabaseError {
    fn from(err: uuid::Error) -> Self {
        Self::Serialization(format!("invalid uuid: {err}"))
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<chrono::ParseError> for DatabaseError {
    fn from(err: chrono::ParseError) -> Self {
        Self::Serialization(format!("invalid datetime: {err}"))
    }
}
