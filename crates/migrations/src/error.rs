//! Error types for the migration engine

use std::path::PathBuf;
use thiserror::Error;
use trellis_core::ConfigError;

/// Result type alias for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Errors raised while discovering, loading, applying or reverting migrations
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Invalid migration file name '{file_name}': {reason}")]
    InvalidFileName { file_name: String, reason: String },

    #[error("Migration '{file_name}' is defined twice: {} and {}", .first.display(), .second.display())]
    DuplicateMigration {
        file_name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("Migration file not found: {file_name}")]
    FileNotFound { file_name: String },

    #[error("Cannot load migration class '{class_name}' for {file_name}: {reason}")]
    ClassLoad {
        file_name: String,
        class_name: String,
        reason: String,
    },

    #[error("Statement #{index} of {file_name} failed: {message}")]
    QueryExecution {
        file_name: String,
        index: usize,
        statement: String,
        message: String,
        rolled_back: bool,
    },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Connection '{connection}' is unavailable: {message}")]
    Connection { connection: String, message: String },

    #[error("Ledger error: {message}")]
    Ledger { message: String },

    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl MigrationError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MigrationError::Io {
            path: path.into(),
            source,
        }
    }

    /// Number of statements that completed before this error and are still
    /// in effect, when known
    pub fn statements_completed(&self) -> usize {
        match self {
            MigrationError::QueryExecution {
                index,
                rolled_back: false,
                ..
            } => *index,
            _ => 0,
        }
    }
}
