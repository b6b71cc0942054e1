//! Database backends.
//!
//! A backend executes raw migration scripts and persists the ledger. The
//! engine needs both on the same connection so the development replay can
//! revert, reapply and record a migration in one transaction.

pub mod memory;
mod postgres;

pub use memory::MemoryBackend;
pub use postgres::PgBackend;

use crate::error::Result;

/// Executes raw SQL scripts, one at a time.
///
/// The transaction methods default to plain SQL statements, which is what
/// PostgreSQL expects. Backends that do not speak SQL override them.
#[allow(async_fn_in_trait)]
pub trait ScriptExecutor {
    /// Executes a script, which may contain several statements.
    async fn execute(&mut self, sql: &str) -> Result<()>;

    /// Opens a transaction.
    async fn begin(&mut self) -> Result<()> {
        self.execute("BEGIN").await
    }

    /// Commits the open transaction.
    async fn commit(&mut self) -> Result<()> {
        self.execute("COMMIT").await
    }

    /// Rolls back the open transaction.
    async fn rollback(&mut self) -> Result<()> {
        self.execute("ROLLBACK").await
    }

    /// Marks a savepoint inside the open transaction.
    async fn savepoint(&mut self, name: &str) -> Result<()> {
        self.execute(&format!("SAVEPOINT {name}")).await
    }

    /// Undoes everything executed since the savepoint, keeping the savepoint.
    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        self.execute(&format!("ROLLBACK TO SAVEPOINT {name}")).await
    }

    /// Forgets a savepoint, keeping its effects.
    async fn release_savepoint(&mut self, name: &str) -> Result<()> {
        self.execute(&format!("RELEASE SAVEPOINT {name}")).await
    }
}
