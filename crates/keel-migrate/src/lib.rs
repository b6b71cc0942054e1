//! Ledger-based PostgreSQL migrations.
//!
//! `keel-migrate` keeps a ledger of applied migrations in the database and
//! reconciles it with the migrations found locally:
//!
//! - **New** migrations are applied in canonical order (numeric name prefix,
//!   then the rest of the name).
//! - **Orphans**, recorded but no longer present locally, are reverted in
//!   development mode and reported otherwise.
//! - The **last** migration is checked for drift. In development a changed
//!   `up` is replayed (revert, reapply, record) in one transaction.
//!
//! Migrations come from script files with `-- up` / `-- down` sections or from
//! [`keel_schema`] definitions listed in a [`registry::Registry`].
//!
//! # Example
//!
//! ```rust
//! use keel_migrate::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let migrations = vec![MigrationRecord::new(
//!     "0001_init",
//!     "create table a (id int);",
//!     "drop table a;",
//!     "Initial table",
//! )];
//!
//! let mut reconciler = Reconciler::new(MemoryBackend::new(), ReconcileOptions::new());
//! let report = reconciler.run(migrations.clone()).await.unwrap();
//! assert_eq!(report.applied, ["0001_init"]);
//!
//! // Nothing left to do.
//! let report = reconciler.run(migrations).await.unwrap();
//! assert!(report.is_noop());
//! # }
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Apply migrations from ./migrations
//! keel-migrate --database postgres://localhost/app migrate
//!
//! # Replay a changed last migration while iterating locally
//! keel-migrate migrate --source migrations --build target/migrations --development
//!
//! # Compare local migrations with the ledger
//! keel-migrate status
//! ```

pub mod backend;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod loader;
pub mod order;
pub mod registry;
pub mod status;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::backend::{MemoryBackend, PgBackend, ScriptExecutor};
    pub use crate::engine::{ReconcileOptions, ReconcileReport, Reconciler};
    pub use crate::error::{MigrateError, Result};
    pub use crate::ledger::{Ledger, LedgerDocument, LedgerStore, MigrationRecord};
    pub use crate::loader::{load_migrations, DirectoryKind, MigrationDirectory};
    pub use crate::order::{compare_names, sort_migrations};
    pub use crate::registry::{DefinedMigration, Registry};
    pub use crate::status::{MigrationState, MigrationStatus};
    pub use keel_schema::{ColumnSpec, ConverterDefinition, SchemaOperation, Specifier};
}
