//! Error types for the fleet sync engine

use thiserror::Error;

/// Result type alias for sync engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the sync engine
#[derive(Debug, Error)]
pub enum Error {
    /// Request or plugin configuration rejected
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found (plugin, result, schedule)
    #[error("not found: {0}")]
    NotFound(String),

    /// Plugin name already registered
    #[error("duplicate plugin name: {0}")]
    DuplicateName(String),

    /// Plugin failed to initialize and was not registered
    #[error("plugin initialization failed: {0}")]
    Initialization(String),

    /// Path escapes the allowed download directory
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Nothing to serve for the requested result
    #[error("unprocessable: {0}")]
    UnprocessableEntity(String),

    /// Plugin export/import/preview failed
    #[error("plugin execution failed: {0}")]
    PluginExecution(String),

    /// Audit record could not be written
    #[error("history persistence failed: {0}")]
    HistoryPersistence(String),

    /// Operation aborted by its cancellation token
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Operation exceeded its deadline
    #[error("timed out: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Stable machine-readable code for this error
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::DuplicateName(_) => "duplicate_name",
            Self::Initialization(_) => "initialization_error",
            Self::Forbidden(_) => "forbidden",
            Self::UnprocessableEntity(_) => "unprocessable_entity",
            Self::PluginExecution(_) => "plugin_execution_error",
            Self::HistoryPersistence(_) => "history_persistence_error",
            Self::Cancelled(_) => "cancelled",
            Self::Timeout(_) => "timeout",
            Self::Config(_) => "config_error",
            Self::Database(_) | Self::Sqlite(_) => "database_error",
            Self::Io(_) => "io_error",
            Self::Serialization(_) | Self::Yaml(_) | Self::Toml(_) => "serialization_error",
        }
    }
}
