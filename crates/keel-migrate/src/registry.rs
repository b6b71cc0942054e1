//! Static registry of builder-defined migrations.
//!
//! Migrations written with the schema DSL are registered here by name and
//! compiled on demand. The loader consults the registry when it meets a `.rs`
//! source file in a migration directory.

use std::collections::BTreeMap;

use keel_schema::{migration, Specifier};

use crate::error::Result;
use crate::ledger::MigrationRecord;

/// Function that declares a migration's operations.
pub type Definition = fn(&mut Specifier) -> keel_schema::Result<()>;

/// A migration defined in Rust code.
///
/// # Example
///
/// ```rust
/// use keel_migrate::prelude::*;
///
/// pub struct Migration0001;
///
/// impl DefinedMigration for Migration0001 {
///     const NAME: &'static str = "0001_users";
///
///     fn define(t: &mut Specifier) -> keel_schema::Result<()> {
///         t.description("Users table")?;
///         t.create_table("user_table", |c| c("name").column_type("text"))
///     }
/// }
///
/// let mut registry = Registry::new();
/// registry.register::<Migration0001>();
/// assert!(registry.contains("0001_users"));
/// ```
pub trait DefinedMigration {
    /// Migration name, starting with its ordering prefix.
    const NAME: &'static str;

    /// Declares the migration's operations.
    fn define(t: &mut Specifier) -> keel_schema::Result<()>;
}

/// Name-to-definition map, resolved at startup.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    definitions: BTreeMap<String, Definition>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a migration type.
    pub fn register<M: DefinedMigration>(&mut self) -> &mut Self {
        self.register_fn(M::NAME, M::define)
    }

    /// Registers a definition function under `name`. A later registration
    /// under the same name replaces the earlier one.
    pub fn register_fn(&mut self, name: impl Into<String>, definition: Definition) -> &mut Self {
        self.definitions.insert(name.into(), definition);
        self
    }

    /// Returns whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Returns the registered names, sorted lexicographically.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    /// Returns the number of registered migrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Returns whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Compiles the migration registered under `name`.
    ///
    /// Returns `Ok(None)` if nothing is registered under that name.
    ///
    /// # Errors
    ///
    /// Propagates the definition's schema error.
    pub fn compile(&self, name: &str) -> Result<Option<MigrationRecord>> {
        let Some(definition) = self.definitions.get(name) else {
            return Ok(None);
        };
        let compiled = migration(*definition)?;
        Ok(Some(MigrationRecord::from_compiled(name, compiled)))
    }

    /// Compiles every registered migration.
    ///
    /// # Errors
    ///
    /// Fails on the first definition that does not compile.
    pub fn records(&self) -> Result<Vec<MigrationRecord>> {
        self.definitions
            .iter()
            .map(|(name, definition)| {
                let compiled = migration(*definition)?;
                Ok(MigrationRecord::from_compiled(name.as_str(), compiled))
            })
            .collect()
    }
}
