//! Immutable column definition builder.
//!
//! Every setter consumes the spec and returns a new one, so a partially built
//! spec can be cloned and specialised without aliasing.

use crate::converter::ConverterDefinition;
use crate::error::{Result, SchemaError};
use crate::quote::DefaultValue;

/// Description of a single column, compiled to a column-definition fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    name: Option<String>,
    column_type: Option<String>,
    nullable: bool,
    unique: bool,
    default: Option<DefaultValue>,
    references: Option<String>,
    comment: Option<String>,
}

impl ColumnSpec {
    /// Creates an empty spec. It cannot be serialized until a name and a type
    /// (or a referenced table) are set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            name: None,
            column_type: None,
            nullable: false,
            unique: false,
            default: None,
            references: None,
            comment: None,
        }
    }

    /// Sets the column name, converted to `snake_case`.
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(to_snake_case(name));
        self
    }

    /// Sets the SQL type keyword (e.g. `text`, `timestamptz`).
    #[must_use]
    pub fn column_type(mut self, column_type: impl Into<String>) -> Self {
        self.column_type = Some(column_type.into());
        self
    }

    /// Allows NULL values. Columns are `not null` otherwise.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Adds a UNIQUE constraint.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default(mut self, value: impl Into<DefaultValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Sets a raw SQL expression as default (e.g. `now()`).
    #[must_use]
    pub fn default_expr(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(DefaultValue::Expression(expr.into()));
        self
    }

    /// Makes this an `integer` foreign key to `table (id)`.
    #[must_use]
    pub fn references(mut self, table: impl Into<String>) -> Self {
        self.references = Some(table.into());
        self
    }

    /// Attaches a column comment.
    #[must_use]
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Attaches a converter definition, stored as the column comment.
    ///
    /// # Errors
    ///
    /// Fails if the definition cannot be serialized.
    pub fn converter(self, definition: &ConverterDefinition) -> Result<Self> {
        let comment = definition.to_comment()?;
        Ok(self.comment(comment))
    }

    /// Returns the canonical column name, if set.
    #[must_use]
    pub fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the column comment, if set.
    #[must_use]
    pub fn get_comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Returns the name, failing if it was never set.
    pub(crate) fn require_name(&self) -> Result<&str> {
        self.name.as_deref().ok_or_else(|| self.invalid("Column name not specified"))
    }

    /// Compiles the spec to a column-definition fragment.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::ColumnSpecValidation`] when the name is missing or
    /// when not exactly one of type and reference is set, and
    /// [`SchemaError::ValueQuoting`] when the default cannot be rendered.
    pub fn serialize(&self) -> Result<String> {
        let name = self.require_name()?;
        let type_sql = match (&self.column_type, &self.references) {
            (Some(_), Some(_)) => {
                return Err(self.invalid("Cannot specify both references and type"));
            }
            (None, None) => {
                return Err(self.invalid("Column type nor referenced table not specified"));
            }
            (Some(column_type), None) => column_type.clone(),
            (None, Some(table)) => format!("integer references \"{table}\" (id)"),
        };

        let mut parts = vec![format!("\"{name}\""), type_sql];
        if !self.nullable {
            parts.push(String::from("not null"));
        }
        if self.unique {
            parts.push(String::from("unique"));
        }
        if let Some(ref default) = self.default {
            parts.push(format!("default {}", default.to_sql()?));
        }
        Ok(parts.join(" "))
    }

    fn invalid(&self, message: &str) -> SchemaError {
        SchemaError::ColumnSpecValidation {
            column: self.name.clone().unwrap_or_else(|| String::from("<unnamed>")),
            message: message.to_string(),
        }
    }
}

/// Converts `camelCase`, `PascalCase`, `kebab-case` and spaced names to
/// `snake_case`.
#[must_use]
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let chars: Vec<char> = name.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if c == '-' || c == ' ' {
            if !out.ends_with('_') {
                out.push('_');
            }
        } else if c.is_uppercase() {
            let prev = if i > 0 { Some(chars[i - 1]) } else { None };
            let prev_lower = prev.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit());
            let prev_upper = prev.is_some_and(char::is_uppercase);
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let boundary = prev_lower || (prev_upper && next_lower);
            if boundary && !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

// =============================================================================
// Shorthand Functions for Common Types
// =============================================================================

/// Column constructor handed to table callbacks.
#[must_use]
pub fn column(name: &str) -> ColumnSpec {
    ColumnSpec::new().name(name)
}

/// Creates a `text` column.
#[must_use]
pub fn text(name: &str) -> ColumnSpec {
    column(name).column_type("text")
}

/// Creates an `integer` column.
#[must_use]
pub fn integer(name: &str) -> ColumnSpec {
    column(name).column_type("integer")
}

/// Creates a `bigint` column.
#[must_use]
pub fn bigint(name: &str) -> ColumnSpec {
    column(name).column_type("bigint")
}

/// Creates a `boolean` column.
#[must_use]
pub fn boolean(name: &str) -> ColumnSpec {
    column(name).column_type("boolean")
}

/// Creates a `timestamptz` column.
#[must_use]
pub fn timestamptz(name: &str) -> ColumnSpec {
    column(name).column_type("timestamptz")
}

/// Creates a `jsonb` column.
#[must_use]
pub fn jsonb(name: &str) -> ColumnSpec {
    column(name).column_type("jsonb")
}
