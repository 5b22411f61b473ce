//! # Engine Error Types
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Engine Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │    Domain       │  │     Storage             │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Core(...)      │  │  Database(DbError)      │ │
//! │  │  ConfigLoad...  │  │  Configuration, │  │  transient → retry      │ │
//! │  │                 │  │  Integrity,     │  │  everything else → stop │ │
//! │  │                 │  │  Drift, ...     │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐                                                   │
//! │  │    Runtime      │                                                   │
//! │  │  ChannelError   │                                                   │
//! │  │  ShuttingDown   │                                                   │
//! │  │  TaskFailed     │                                                   │
//! │  └─────────────────┘                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use combo_core::CoreError;
use combo_db::DbError;
use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    // =========================================================================
    // Domain Errors
    // =========================================================================
    /// A bundle rule rejected the operation.
    #[error(transparent)]
    Core(CoreError),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    #[error("Database error: {0}")]
    Database(DbError),

    // =========================================================================
    // Runtime Errors
    // =========================================================================
    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Engine is shutting down")]
    ShuttingDown,

    /// A spawned task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        EngineError::Core(err)
    }
}

/// Domain rejections raised inside a storage transaction surface as
/// [`EngineError::Core`], not as database errors.
impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Core(core) => EngineError::Core(core),
            other => EngineError::Database(other),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        EngineError::TaskFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl EngineError {
    /// Returns true if the operation can be retried as-is.
    ///
    /// Only transient storage failures qualify. Domain rejections will
    /// fail the same way until the data changes.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Database(db) => db.is_transient(),
            EngineError::TaskFailed(_) => true,
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem, either
    /// of the engine or of a bundle definition.
    pub fn is_config_error(&self) -> bool {
        match self {
            EngineError::InvalidConfig(_) | EngineError::ConfigLoadFailed(_) => true,
            EngineError::Core(core) => core.is_configuration(),
            _ => false,
        }
    }

    /// Returns the domain error, if this is one.
    pub fn as_core(&self) -> Option<&CoreError> {
        match self {
            EngineError::Core(core) => Some(core),
            _ => None,
        }
    }
}
