//! The migration ledger.
//!
//! The ledger is the list of applied migrations, stored as one JSON document
//! (`{"list": [...]}`) in the single row of the `migration` table. List order is
//! application order; canonical order is derived from names when needed.

use chrono::{DateTime, Utc};
use keel_schema::CompiledMigration;
use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

/// Name of the table holding the ledger document.
pub const LEDGER_TABLE: &str = "migration";

/// SQL to create the ledger table (PostgreSQL).
pub const CREATE_LEDGER_TABLE_SQL: &str = "CREATE TABLE migration ( data jsonb );";

/// A migration as recorded in the ledger, or as defined locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Unique name; starts with the ordering prefix.
    pub name: String,
    /// Forward script.
    pub up: String,
    /// Reverse script.
    pub down: String,
    /// Human-readable summary.
    pub description: String,
    /// When the migration was recorded. Never compared for drift.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
}

impl MigrationRecord {
    /// Creates a record without an application timestamp.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        up: impl Into<String>,
        down: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            up: up.into(),
            down: down.into(),
            description: description.into(),
            applied_at: None,
        }
    }

    /// Creates a record from a compiled builder migration.
    #[must_use]
    pub fn from_compiled(name: impl Into<String>, compiled: CompiledMigration) -> Self {
        Self::new(name, compiled.up, compiled.down, compiled.description)
    }

    /// Returns a copy stamped with the given application time.
    #[must_use]
    pub fn applied(mut self, at: DateTime<Utc>) -> Self {
        self.applied_at = Some(at);
        self
    }

    /// Returns whether the reverse script or description differ.
    #[must_use]
    pub fn descriptor_differs(&self, other: &Self) -> bool {
        self.down != other.down || self.description != other.description
    }
}

/// Serialized form of the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerDocument {
    /// Applied migrations in application order.
    pub list: Vec<MigrationRecord>,
}

/// Applied migrations in application order. Names are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    records: Vec<MigrationRecord>,
}

impl Ledger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a ledger from records, rejecting duplicate names.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::DuplicateMigration`] on a repeated name.
    pub fn from_records(records: Vec<MigrationRecord>) -> Result<Self> {
        let mut ledger = Self::new();
        for record in records {
            ledger.push(record)?;
        }
        Ok(ledger)
    }

    /// Returns the records in application order.
    #[must_use]
    pub fn records(&self) -> &[MigrationRecord] {
        &self.records
    }

    /// Returns the number of applied migrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns whether no migration has been applied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Looks up a record by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&MigrationRecord> {
        self.records.iter().find(|r| r.name == name)
    }

    /// Returns whether a record with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Appends a record.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::DuplicateMigration`] if the name is taken.
    pub fn push(&mut self, record: MigrationRecord) -> Result<()> {
        if self.contains(&record.name) {
            return Err(MigrateError::DuplicateMigration(record.name));
        }
        self.records.push(record);
        Ok(())
    }

    /// Replaces the record with the same name in place, keeping its position.
    /// Returns `false` if no such record exists.
    pub fn replace(&mut self, record: MigrationRecord) -> bool {
        match self.records.iter_mut().find(|r| r.name == record.name) {
            Some(slot) => {
                *slot = record;
                true
            }
            None => false,
        }
    }

    /// Removes a record by name, returning it.
    pub fn remove(&mut self, name: &str) -> Option<MigrationRecord> {
        let index = self.records.iter().position(|r| r.name == name)?;
        Some(self.records.remove(index))
    }

    /// Converts to the serialized document form.
    #[must_use]
    pub fn to_document(&self) -> LedgerDocument {
        LedgerDocument {
            list: self.records.clone(),
        }
    }
}

impl TryFrom<LedgerDocument> for Ledger {
    type Error = MigrateError;

    fn try_from(document: LedgerDocument) -> Result<Self> {
        Self::from_records(document.list)
    }
}

/// Persistent storage for the ledger.
///
/// Writes are compare-and-swap: a write only succeeds if the stored ledger
/// still equals the one the caller last read. A single writer is assumed;
/// the check turns a concurrent run into a [`MigrateError::LedgerConflict`]
/// instead of a silent overwrite.
#[allow(async_fn_in_trait)]
pub trait LedgerStore {
    /// Loads the ledger, creating and seeding the storage if it is missing.
    async fn load_ledger(&mut self) -> Result<Ledger>;

    /// Replaces the stored ledger `expected` with `next`.
    async fn swap_ledger(&mut self, expected: &Ledger, next: &Ledger) -> Result<()>;
}
