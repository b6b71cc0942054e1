//! Error types for schema compilation.

/// Errors raised while compiling a migration definition to SQL.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// A column spec is incomplete or contradictory.
    #[error("Invalid column '{column}': {message}")]
    ColumnSpecValidation {
        /// Column name, or `<unnamed>` when no name was given.
        column: String,
        /// What is wrong with the spec.
        message: String,
    },

    /// A default value cannot be rendered as a safe SQL literal.
    #[error("Cannot quote value {value}: {reason}")]
    ValueQuoting {
        /// Debug rendering of the rejected value.
        value: String,
        /// Why the value was rejected.
        reason: &'static str,
    },

    /// `description` was called more than once on one migration.
    #[error("Cannot specify multiple descriptions")]
    MultipleDescription,

    /// A converter definition could not be serialized.
    #[error("Converter definition error: {0}")]
    Converter(#[from] serde_json::Error),
}

/// Result type for schema compilation.
pub type Result<T> = std::result::Result<T, SchemaError>;
