//! Declarative migration builder.
//!
//! A [`Specifier`] collects `{up, down}` fragment pairs in declaration order.
//! Compiling joins the `up` fragments in that order and the `down` fragments in
//! reverse, so composite changes are undone last-applied-first.

use crate::column::{column, to_snake_case, ColumnSpec};
use crate::converter::ConverterDefinition;
use crate::error::{Result, SchemaError};
use crate::quote::dollar_quote;

/// Description used when a migration never calls [`Specifier::description`].
pub const DEFAULT_DESCRIPTION: &str = "No description specified";

/// Column constructor passed to table callbacks.
pub type ColumnFactory = fn(&str) -> ColumnSpec;

/// A forward/reverse SQL fragment pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaOperation {
    /// Forward SQL.
    pub up: String,
    /// Reverse SQL.
    pub down: String,
}

impl SchemaOperation {
    /// Creates an operation from its two halves.
    #[must_use]
    pub fn new(up: impl Into<String>, down: impl Into<String>) -> Self {
        Self {
            up: up.into(),
            down: down.into(),
        }
    }

    /// Returns the structural inverse (up and down swapped).
    #[must_use]
    pub fn inverse(self) -> Self {
        Self {
            up: self.down,
            down: self.up,
        }
    }
}

/// The compiled script of one migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledMigration {
    /// Human-readable summary.
    pub description: String,
    /// Forward script.
    pub up: String,
    /// Reverse script.
    pub down: String,
}

/// One or several columns returned from a table callback.
pub trait IntoColumns {
    /// Converts into a list of column specs.
    fn into_columns(self) -> Vec<ColumnSpec>;
}

impl IntoColumns for ColumnSpec {
    fn into_columns(self) -> Vec<ColumnSpec> {
        vec![self]
    }
}

impl IntoColumns for Vec<ColumnSpec> {
    fn into_columns(self) -> Vec<ColumnSpec> {
        self
    }
}

impl<const N: usize> IntoColumns for [ColumnSpec; N] {
    fn into_columns(self) -> Vec<ColumnSpec> {
        self.into()
    }
}

/// Accumulates schema operations for a single migration.
#[derive(Debug, Default)]
pub struct Specifier {
    operations: Vec<SchemaOperation>,
    description: Option<String>,
}

impl Specifier {
    /// Creates an empty specifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the migration description.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::MultipleDescription`] when called twice.
    pub fn description(&mut self, description: impl Into<String>) -> Result<()> {
        if self.description.is_some() {
            return Err(SchemaError::MultipleDescription);
        }
        self.description = Some(description.into());
        Ok(())
    }

    /// Creates a table with an `id serial primary key` column followed by the
    /// given columns. Reverse is `drop table`.
    ///
    /// # Errors
    ///
    /// Fails if any column spec is invalid.
    pub fn create_table<C, F>(&mut self, name: &str, columns: F) -> Result<()>
    where
        C: IntoColumns,
        F: FnOnce(ColumnFactory) -> C,
    {
        let op = create_table_operation(name, columns(column).into_columns())?;
        self.operations.push(op);
        Ok(())
    }

    /// Drops a table whose shape is documented by `columns`. Reverse recreates it.
    ///
    /// # Errors
    ///
    /// Fails if any column spec is invalid.
    pub fn drop_table<C, F>(&mut self, name: &str, columns: F) -> Result<()>
    where
        C: IntoColumns,
        F: FnOnce(ColumnFactory) -> C,
    {
        let op = create_table_operation(name, columns(column).into_columns())?;
        self.operations.push(op.inverse());
        Ok(())
    }

    /// Starts altering an existing table.
    pub fn alter_table(&mut self, name: &str) -> AlterTable<'_> {
        AlterTable {
            table: name.to_string(),
            operations: &mut self.operations,
        }
    }

    /// Inserts a caller-supplied operation verbatim.
    pub fn raw(&mut self, operation: SchemaOperation) {
        self.operations.push(operation);
    }

    /// Returns the operations declared so far, in declaration order.
    #[must_use]
    pub fn operations(&self) -> &[SchemaOperation] {
        &self.operations
    }

    /// Compiles the declared operations into one migration script.
    #[must_use]
    pub fn compile(self) -> CompiledMigration {
        let up = self
            .operations
            .iter()
            .map(|op| op.up.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let down = self
            .operations
            .iter()
            .rev()
            .map(|op| op.down.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        CompiledMigration {
            description: self
                .description
                .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
            up,
            down,
        }
    }
}

/// Runs `specification` against a fresh [`Specifier`] and compiles the result.
///
/// # Example
///
/// ```rust
/// use keel_schema::migration;
///
/// let compiled = migration(|t| {
///     t.description("Create users")?;
///     t.create_table("user_table", |c| c("name").column_type("text"))?;
///     Ok(())
/// })
/// .unwrap();
///
/// assert_eq!(compiled.down, "drop table \"user_table\";");
/// ```
///
/// # Errors
///
/// Propagates any error raised by the specification.
pub fn migration<F>(specification: F) -> Result<CompiledMigration>
where
    F: FnOnce(&mut Specifier) -> Result<()>,
{
    let mut specifier = Specifier::new();
    specification(&mut specifier)?;
    Ok(specifier.compile())
}

/// Alterations to one table.
#[derive(Debug)]
pub struct AlterTable<'a> {
    table: String,
    operations: &'a mut Vec<SchemaOperation>,
}

impl AlterTable<'_> {
    /// Adds a column. If the column carries a comment, a second up-only
    /// operation sets it; dropping the column discards the comment anyway.
    ///
    /// # Errors
    ///
    /// Fails if the column spec is invalid.
    pub fn add_column<F>(&mut self, spec: F) -> Result<&mut Self>
    where
        F: FnOnce(ColumnFactory) -> ColumnSpec,
    {
        let col = spec(column);
        let name = col.require_name()?.to_string();
        self.operations.push(SchemaOperation::new(
            format!(
                "alter table \"{}\" add column {};",
                self.table,
                col.serialize()?
            ),
            format!("alter table \"{}\" drop column \"{name}\";", self.table),
        ));
        if let Some(comment) = col.get_comment() {
            self.operations.push(SchemaOperation::new(
                comment_statement(&self.table, &name, Some(comment)),
                "",
            ));
        }
        Ok(self)
    }

    /// Drops a column. Reverse adds it back with its documented definition.
    ///
    /// # Errors
    ///
    /// Fails if the column spec is invalid.
    pub fn drop_column<F>(&mut self, spec: F) -> Result<&mut Self>
    where
        F: FnOnce(ColumnFactory) -> ColumnSpec,
    {
        let col = spec(column);
        let name = col.require_name()?.to_string();
        let mut down = format!(
            "alter table \"{}\" add column {};",
            self.table,
            col.serialize()?
        );
        if let Some(comment) = col.get_comment() {
            down.push('\n');
            down.push_str(&comment_statement(&self.table, &name, Some(comment)));
        }
        self.operations.push(SchemaOperation::new(
            format!("alter table \"{}\" drop column \"{name}\";", self.table),
            down,
        ));
        Ok(self)
    }

    /// Starts altering one column of this table.
    pub fn alter_column(&mut self, name: &str) -> AlterColumn<'_> {
        AlterColumn {
            table: &self.table,
            column: to_snake_case(name),
            operations: &mut *self.operations,
        }
    }
}

/// Alterations to one column.
#[derive(Debug)]
pub struct AlterColumn<'a> {
    table: &'a str,
    column: String,
    operations: &'a mut Vec<SchemaOperation>,
}

impl AlterColumn<'_> {
    /// Sets the column comment (`None` clears it). Reverse restores `previous`.
    pub fn set_comment(&mut self, value: Option<&str>, previous: Option<&str>) -> &mut Self {
        self.operations.push(SchemaOperation::new(
            comment_statement(self.table, &self.column, value),
            comment_statement(self.table, &self.column, previous),
        ));
        self
    }

    /// Stores a converter definition as the column comment. Reverse restores
    /// the previous definition, or clears the comment.
    ///
    /// # Errors
    ///
    /// Fails if either definition cannot be serialized.
    pub fn set_converter(
        &mut self,
        definition: Option<&ConverterDefinition>,
        previous: Option<&ConverterDefinition>,
    ) -> Result<&mut Self> {
        let value = definition.map(ConverterDefinition::to_comment).transpose()?;
        let previous = previous.map(ConverterDefinition::to_comment).transpose()?;
        Ok(self.set_comment(value.as_deref(), previous.as_deref()))
    }
}

fn create_table_operation(name: &str, columns: Vec<ColumnSpec>) -> Result<SchemaOperation> {
    let mut definitions = vec![String::from("  id serial primary key")];
    let mut comments = Vec::new();
    for col in &columns {
        definitions.push(format!("  {}", col.serialize()?));
        if let Some(comment) = col.get_comment() {
            comments.push(comment_statement(name, col.require_name()?, Some(comment)));
        }
    }

    let mut up = format!("create table \"{name}\" (\n{}\n);", definitions.join(",\n"));
    for statement in comments {
        up.push('\n');
        up.push_str(&statement);
    }
    Ok(SchemaOperation::new(up, format!("drop table \"{name}\";")))
}

fn comment_statement(table: &str, column: &str, comment: Option<&str>) -> String {
    let value = comment.map_or_else(|| String::from("null"), dollar_quote);
    format!("comment on column \"{table}\".\"{column}\" is {value};")
}
