//! In-process backend.
//!
//! Records every executed script instead of running it, and keeps the ledger
//! in memory. Transactions and savepoints snapshot the recorded state and
//! restore it on rollback, so the engine's replay protocol behaves exactly as
//! it does against PostgreSQL. Scripts registered with
//! [`MemoryBackend::fail_on`] fail when executed.

use std::collections::HashSet;

use tracing::debug;

use super::ScriptExecutor;
use crate::error::{MigrateError, Result};
use crate::ledger::{Ledger, LedgerStore};

#[derive(Debug, Clone)]
struct Snapshot {
    savepoint: Option<String>,
    executed: usize,
    ledger: Option<Ledger>,
}

/// Backend that executes nothing and remembers everything.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    ledger: Option<Ledger>,
    executed: Vec<String>,
    failed: Vec<String>,
    failing: HashSet<String>,
    snapshots: Vec<Snapshot>,
    ledger_writes: usize,
    bootstrapped: bool,
}

impl MemoryBackend {
    /// Creates a backend with no ledger table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend whose ledger table already holds `ledger`.
    #[must_use]
    pub fn with_ledger(ledger: Ledger) -> Self {
        Self {
            ledger: Some(ledger),
            ..Self::default()
        }
    }

    /// Makes execution of exactly this script fail.
    #[must_use]
    pub fn fail_on(mut self, sql: impl Into<String>) -> Self {
        self.failing.insert(sql.into());
        self
    }

    /// Scripts executed successfully and not rolled back, in order.
    #[must_use]
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    /// Scripts whose execution failed, in order.
    #[must_use]
    pub fn failed(&self) -> &[String] {
        &self.failed
    }

    /// Forgets the execution log.
    pub fn clear_executed(&mut self) {
        self.executed.clear();
        self.failed.clear();
    }

    /// The stored ledger, or `None` if the table was never created.
    #[must_use]
    pub fn ledger(&self) -> Option<&Ledger> {
        self.ledger.as_ref()
    }

    /// Number of committed or in-flight ledger writes.
    #[must_use]
    pub fn ledger_writes(&self) -> usize {
        self.ledger_writes
    }

    /// Whether `load_ledger` had to create the ledger.
    #[must_use]
    pub fn bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    /// Whether a transaction is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        !self.snapshots.is_empty()
    }

    fn snapshot(&self, savepoint: Option<String>) -> Snapshot {
        Snapshot {
            savepoint,
            executed: self.executed.len(),
            ledger: self.ledger.clone(),
        }
    }

    fn restore(&mut self, snapshot: &Snapshot) {
        self.executed.truncate(snapshot.executed);
        self.ledger.clone_from(&snapshot.ledger);
    }

    fn savepoint_index(&self, name: &str) -> Result<usize> {
        self.snapshots
            .iter()
            .rposition(|s| s.savepoint.as_deref() == Some(name))
            .ok_or_else(|| MigrateError::Backend(format!("savepoint {name} does not exist")))
    }

    fn require_transaction(&self) -> Result<()> {
        if self.in_transaction() {
            Ok(())
        } else {
            Err(MigrateError::Backend(String::from("no transaction in progress")))
        }
    }
}

impl ScriptExecutor for MemoryBackend {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        debug!(sql = %sql, "Executing SQL");
        if self.failing.contains(sql) {
            self.failed.push(sql.to_string());
            return Err(MigrateError::Backend(format!("script failed: {sql}")));
        }
        self.executed.push(sql.to_string());
        Ok(())
    }

    async fn begin(&mut self) -> Result<()> {
        if self.in_transaction() {
            return Err(MigrateError::Backend(String::from(
                "transaction already in progress",
            )));
        }
        let snapshot = self.snapshot(None);
        self.snapshots.push(snapshot);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.require_transaction()?;
        self.snapshots.clear();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.require_transaction()?;
        let start = self.snapshots.remove(0);
        self.restore(&start);
        self.snapshots.clear();
        Ok(())
    }

    async fn savepoint(&mut self, name: &str) -> Result<()> {
        self.require_transaction()?;
        let snapshot = self.snapshot(Some(name.to_string()));
        self.snapshots.push(snapshot);
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        let index = self.savepoint_index(name)?;
        let snapshot = self.snapshots[index].clone();
        self.restore(&snapshot);
        self.snapshots.truncate(index + 1);
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<()> {
        let index = self.savepoint_index(name)?;
        self.snapshots.truncate(index);
        Ok(())
    }
}

impl LedgerStore for MemoryBackend {
    async fn load_ledger(&mut self) -> Result<Ledger> {
        if let Some(ref ledger) = self.ledger {
            return Ok(ledger.clone());
        }
        self.bootstrapped = true;
        self.ledger = Some(Ledger::new());
        Ok(Ledger::new())
    }

    async fn swap_ledger(&mut self, expected: &Ledger, next: &Ledger) -> Result<()> {
        match self.ledger {
            Some(ref current) if current == expected => {
                self.ledger = Some(next.clone());
                self.ledger_writes += 1;
                Ok(())
            }
            Some(_) => Err(MigrateError::LedgerConflict),
            None => Err(MigrateError::Backend(String::from(
                "ledger table does not exist",
            ))),
        }
    }
}
