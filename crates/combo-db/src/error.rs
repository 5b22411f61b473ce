//! # Storage Errors
//!
//! `DbError` covers everything the repositories can fail with: sqlx
//! failures classified by SQLite constraint kind, undecodable rows, and
//! domain rejections ([`CoreError`]) raised inside a transaction, which
//! roll that transaction back. combo-engine wraps these again and decides
//! which are retryable through [`DbError::is_transient`].

use combo_core::CoreError;
use thiserror::Error;

/// Repository failure.
#[derive(Debug, Error)]
pub enum DbError {
    /// No row for this id.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A bundle id inserted twice, or one variant listed twice in a bundle.
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// A CHECK failed, typically a reservation counter going negative.
    #[error("Constraint violation: {message}")]
    ConstraintViolation { message: String },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Any other SQLite error, including lock contention.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Operation not allowed in the entity's current state, such as
    /// adding lines to a paid order.
    #[error("{entity} {id} is {state}: {reason}")]
    InvalidState {
        entity: String,
        id: String,
        state: String,
        reason: String,
    },

    /// A stored row could not be decoded into a domain value.
    #[error("Corrupt {entity} row: {reason}")]
    Corrupt { entity: String, reason: String },

    /// Timed out waiting for a pooled connection.
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// A domain rule rejected the write.
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn corrupt(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        DbError::Corrupt {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    /// Lock contention and pool pressure; the same call may succeed later.
    pub fn is_transient(&self) -> bool {
        match self {
            DbError::PoolExhausted | DbError::ConnectionFailed(_) => true,
            DbError::QueryFailed(msg) => msg.contains("database is locked") || msg.contains("busy"),
            _ => false,
        }
    }
}

/// Sorts a SQLite error message by the constraint that fired.
fn classify_sqlite_message(msg: &str) -> DbError {
    if let Some(field) = msg.strip_prefix("UNIQUE constraint failed: ") {
        return DbError::duplicate(field, "unknown");
    }
    if msg.starts_with("FOREIGN KEY constraint failed") {
        return DbError::ForeignKeyViolation { message: msg.to_string() };
    }
    if msg.starts_with("CHECK constraint failed") {
        return DbError::ConstraintViolation { message: msg.to_string() };
    }
    DbError::QueryFailed(msg.to_string())
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("row", "unknown"),
            sqlx::Error::Database(db_err) => classify_sqlite_message(db_err.message()),
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("pool closed".to_string()),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::corrupt("column", format!("{}: {}", index, source))
            }
            other => DbError::Internal(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::corrupt("json document", err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;
