//! Error types for the migration system.

use std::path::PathBuf;

use keel_schema::SchemaError;

/// Errors that can occur during migration operations.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// A migration name has no leading decimal ordering prefix.
    #[error("Migration name '{0}' does not start with a numeric ordering prefix")]
    NameFormat(String),

    /// Two local migrations share a name.
    #[error("Migration '{0}' is defined more than once")]
    DuplicateMigration(String),

    /// The ledger table could not be created or seeded.
    #[error("Failed to bootstrap the migration ledger: {0}")]
    LedgerBootstrap(String),

    /// The ledger changed between read and write.
    #[error("Migration ledger was modified concurrently; refusing to overwrite it")]
    LedgerConflict,

    /// The up script of an applied migration changed outside development.
    #[error("Up migration '{0}' changed! This is not allowed outside development")]
    UpChangedOutsideDevelopment(String),

    /// A migration script failed to execute.
    #[error("Migration '{name}' failed: {source}")]
    ScriptExecution {
        /// Name of the migration.
        name: String,
        /// The SQL text that failed.
        script: String,
        /// Underlying failure.
        #[source]
        source: Box<MigrateError>,
    },

    /// A migration definition failed to compile.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Database error during migration execution.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error (reading migration files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse a migration file.
    #[error("Failed to parse migration file '{path}': {message}")]
    ParseError {
        /// Path to the migration file.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// A migration directory contains a file that is not a migration.
    #[error("Unknown migration file type: {0}")]
    UnknownFileType(PathBuf),

    /// A builder source file has neither a registry entry nor a build artifact.
    #[error("Migration '{0}' has a source file but no registered definition or build artifact")]
    UnregisteredMigration(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failure reported by a non-database backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
