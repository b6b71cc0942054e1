//! Reconciliation engine.
//!
//! Brings the database in line with the local migration set:
//!
//! 1. **Orphans** (ledger entries with no local migration) are reported. In
//!    development they are reverted with their stored `down`, in ledger order.
//! 2. **New** migrations are applied in canonical order.
//! 3. The **last** local migration is checked for drift. A changed `up` is
//!    replayed in development and fatal otherwise; a changed `down` or
//!    description only refreshes the ledger entry.
//!
//! The ledger is persisted after every mutation, so an interrupted run leaves
//! it matching what was actually applied. Only the development replay is
//! transactional.

use std::collections::HashSet;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::backend::ScriptExecutor;
use crate::error::{MigrateError, Result};
use crate::ledger::{Ledger, LedgerStore, MigrationRecord};
use crate::order::sort_migrations;
use crate::status::{status, MigrationStatus};

/// Savepoint guarding the stored `down` during a replay.
const REPLAY_SAVEPOINT: &str = "keel_replay_stored_down";

/// Options for a reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Allows reverting orphans and replaying changed migrations.
    pub development: bool,
}

impl ReconcileOptions {
    /// Production defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables development mode.
    #[must_use]
    pub fn development(mut self, enabled: bool) -> Self {
        self.development = enabled;
        self
    }
}

/// What a run did, by migration name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Local migrations found in the ledger, in canonical order.
    pub already_applied: Vec<String>,
    /// Newly applied migrations, in application order.
    pub applied: Vec<String>,
    /// Orphans reverted in development, in revert order.
    pub reverted: Vec<String>,
    /// Orphans left in place outside development.
    pub orphaned: Vec<String>,
    /// Migrations reverted and reapplied because their `up` changed.
    pub replayed: Vec<String>,
    /// Migrations whose ledger entry was refreshed without running SQL.
    pub refreshed: Vec<String>,
}

impl ReconcileReport {
    /// Returns whether the run executed no migration SQL at all.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty() && self.reverted.is_empty() && self.replayed.is_empty()
    }
}

/// Applies local migrations to a backend that executes scripts and stores the
/// ledger on the same connection.
pub struct Reconciler<B> {
    backend: B,
    options: ReconcileOptions,
}

impl<B: ScriptExecutor + LedgerStore> Reconciler<B> {
    /// Creates a reconciler.
    pub fn new(backend: B, options: ReconcileOptions) -> Self {
        Self { backend, options }
    }

    /// Returns the options.
    #[must_use]
    pub fn options(&self) -> ReconcileOptions {
        self.options
    }

    /// Returns the backend.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the backend mutably.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Consumes the reconciler, returning the backend.
    pub fn into_inner(self) -> B {
        self.backend
    }

    /// Reports the state of every local and recorded migration without
    /// changing anything except bootstrapping a missing ledger.
    ///
    /// # Errors
    ///
    /// Fails on malformed or duplicate names, or if the ledger cannot be read.
    pub async fn status(&mut self, migrations: &[MigrationRecord]) -> Result<Vec<MigrationStatus>> {
        let ledger = self.backend.load_ledger().await?;
        status(migrations, &ledger)
    }

    /// Reconciles the database with `migrations`, which may be in any order.
    ///
    /// # Errors
    ///
    /// Any failure aborts the run. Ledger writes made before the failure are
    /// kept.
    pub async fn run(&mut self, migrations: Vec<MigrationRecord>) -> Result<ReconcileReport> {
        let migrations = sort_migrations(migrations)?;
        let mut ledger = self.backend.load_ledger().await?;
        let mut report = ReconcileReport::default();

        self.handle_orphans(&migrations, &mut ledger, &mut report)
            .await?;

        let mut already_run = 0;
        let count = migrations.len();
        for (index, migration) in migrations.into_iter().enumerate() {
            let last = index + 1 == count;
            if let Some(stored) = ledger.get(&migration.name).cloned() {
                // Only the newest migration is compared; older scripts may be
                // regenerated with harmless differences.
                if last {
                    self.reconcile_last(stored, &migration, &mut ledger, &mut report)
                        .await?;
                }
                report.already_applied.push(migration.name);
                already_run += 1;
                continue;
            }

            log_already_run(&mut already_run);
            self.apply(migration, &mut ledger, &mut report).await?;
        }
        log_already_run(&mut already_run);

        Ok(report)
    }

    async fn handle_orphans(
        &mut self,
        migrations: &[MigrationRecord],
        ledger: &mut Ledger,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let local: HashSet<&str> = migrations.iter().map(|m| m.name.as_str()).collect();
        let orphans: Vec<MigrationRecord> = ledger
            .records()
            .iter()
            .filter(|record| !local.contains(record.name.as_str()))
            .cloned()
            .collect();

        for orphan in orphans {
            warn!(name = %orphan.name, "Migration does not exist locally");
            if !self.options.development {
                report.orphaned.push(orphan.name);
                continue;
            }

            info!(name = %orphan.name, "Development mode, running down migration");
            self.execute_script(&orphan.name, &orphan.down).await?;

            let mut next = ledger.clone();
            next.remove(&orphan.name);
            self.persist(ledger, next).await?;
            report.reverted.push(orphan.name);
        }
        Ok(())
    }

    async fn reconcile_last(
        &mut self,
        stored: MigrationRecord,
        current: &MigrationRecord,
        ledger: &mut Ledger,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        if stored.up != current.up {
            if !self.options.development {
                return Err(MigrateError::UpChangedOutsideDevelopment(
                    current.name.clone(),
                ));
            }
            self.replay(&stored, current, ledger).await?;
            report.replayed.push(current.name.clone());
            return Ok(());
        }

        if stored.descriptor_differs(current) {
            info!(name = %current.name, "Migration down or description changed, updating ledger");
            let mut refreshed = current.clone();
            refreshed.applied_at = stored.applied_at;
            let mut next = ledger.clone();
            next.replace(refreshed);
            self.persist(ledger, next).await?;
            report.refreshed.push(current.name.clone());
        }
        Ok(())
    }

    async fn replay(
        &mut self,
        stored: &MigrationRecord,
        current: &MigrationRecord,
        ledger: &mut Ledger,
    ) -> Result<()> {
        info!(
            name = %current.name,
            "Up migration changed, running down migration and following it with up again"
        );

        self.backend.begin().await?;
        match self.replay_in_transaction(stored, current, ledger).await {
            Ok(next) => {
                self.backend.commit().await?;
                *ledger = next;
                info!(name = %current.name, "Migration replayed successfully");
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.backend.rollback().await {
                    error!(name = %current.name, error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn replay_in_transaction(
        &mut self,
        stored: &MigrationRecord,
        current: &MigrationRecord,
        ledger: &Ledger,
    ) -> Result<Ledger> {
        info!(name = %current.name, "Running down from database");
        self.backend.savepoint(REPLAY_SAVEPOINT).await?;
        match self.backend.execute(&stored.down).await {
            Ok(()) => self.backend.release_savepoint(REPLAY_SAVEPOINT).await?,
            Err(e) => {
                warn!(name = %current.name, error = %e, "Down from database failed, running down from disk");
                self.backend.rollback_to_savepoint(REPLAY_SAVEPOINT).await?;
                self.backend.release_savepoint(REPLAY_SAVEPOINT).await?;
                self.execute_script(&current.name, &current.down).await?;
            }
        }

        info!(name = %current.name, "Running up");
        self.execute_script(&current.name, &current.up).await?;

        let mut next = ledger.clone();
        next.replace(current.clone().applied(Utc::now()));
        self.backend.swap_ledger(ledger, &next).await?;
        Ok(next)
    }

    async fn apply(
        &mut self,
        migration: MigrationRecord,
        ledger: &mut Ledger,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        info!(
            name = %migration.name,
            description = %migration.description,
            "Running migration"
        );
        self.execute_script(&migration.name, &migration.up).await?;

        let name = migration.name.clone();
        let mut next = ledger.clone();
        next.push(migration.applied(Utc::now()))?;
        self.persist(ledger, next).await?;

        info!(name = %name, "Migration applied successfully");
        report.applied.push(name);
        Ok(())
    }

    async fn execute_script(&mut self, name: &str, script: &str) -> Result<()> {
        if let Err(source) = self.backend.execute(script).await {
            error!(name = %name, script = %script, "Migration script failed");
            return Err(MigrateError::ScriptExecution {
                name: name.to_string(),
                script: script.to_string(),
                source: Box::new(source),
            });
        }
        Ok(())
    }

    async fn persist(&mut self, ledger: &mut Ledger, next: Ledger) -> Result<()> {
        self.backend.swap_ledger(ledger, &next).await?;
        *ledger = next;
        Ok(())
    }
}

fn log_already_run(count: &mut usize) {
    if *count > 0 {
        let plural = if *count > 1 { "s" } else { "" };
        info!("{count} migration{plural} were already run");
        *count = 0;
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use tracing::Level;

    use super::*;
    use crate::backend::MemoryBackend;

    fn record(name: &str, up: &str, down: &str) -> MigrationRecord {
        MigrationRecord::new(name, up, down, format!("{name} description"))
    }

    fn ledger_of(records: Vec<MigrationRecord>) -> Ledger {
        Ledger::from_records(records).unwrap()
    }

    fn names(ledger: &Ledger) -> Vec<&str> {
        ledger.records().iter().map(|r| r.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_applies_in_canonical_order() {
        let mut reconciler = Reconciler::new(MemoryBackend::new(), ReconcileOptions::new());
        let report = reconciler
            .run(vec![
                record("10_c", "c;", "-c;"),
                record("2_b", "b;", "-b;"),
                record("1_a", "a;", "-a;"),
            ])
            .await
            .unwrap();

        assert_eq!(report.applied, ["1_a", "2_b", "10_c"]);
        let backend = reconciler.into_inner();
        assert_eq!(backend.executed(), ["a;", "b;", "c;"]);
        assert_eq!(names(backend.ledger().unwrap()), ["1_a", "2_b", "10_c"]);
        assert_eq!(backend.ledger_writes(), 3);
        assert!(backend
            .ledger()
            .unwrap()
            .records()
            .iter()
            .all(|r| r.applied_at.is_some()));
    }

    #[tokio::test]
    async fn test_older_migration_not_compared() {
        let ledger = ledger_of(vec![record("1_a", "old;", "-a;"), record("2_b", "b;", "-b;")]);
        let mut reconciler = Reconciler::new(MemoryBackend::with_ledger(ledger), ReconcileOptions::new());

        let report = reconciler
            .run(vec![record("1_a", "new;", "-a;"), record("2_b", "b;", "-b;")])
            .await
            .unwrap();

        assert_eq!(report.already_applied, ["1_a", "2_b"]);
        assert!(report.is_noop());
        let backend = reconciler.into_inner();
        assert_eq!(backend.ledger().unwrap().get("1_a").unwrap().up, "old;");
        assert_eq!(backend.ledger_writes(), 0);
    }

    #[tokio::test]
    async fn test_orphans_reverted_in_ledger_order() {
        let ledger = ledger_of(vec![
            record("1_a", "a;", "-a;"),
            record("2_b", "b;", "-b;"),
            record("3_c", "c;", "-c;"),
        ]);
        let options = ReconcileOptions::new().development(true);
        let mut reconciler = Reconciler::new(MemoryBackend::with_ledger(ledger), options);

        let report = reconciler.run(vec![record("1_a", "a;", "-a;")]).await.unwrap();

        assert_eq!(report.reverted, ["2_b", "3_c"]);
        let backend = reconciler.into_inner();
        assert_eq!(backend.executed(), ["-b;", "-c;"]);
        assert_eq!(names(backend.ledger().unwrap()), ["1_a"]);
        assert_eq!(backend.ledger_writes(), 2);
    }

    #[tokio::test]
    async fn test_orphans_kept_outside_development() {
        let ledger = ledger_of(vec![record("1_a", "a;", "-a;"), record("2_b", "b;", "-b;")]);
        let mut reconciler = Reconciler::new(MemoryBackend::with_ledger(ledger), ReconcileOptions::new());

        let report = reconciler.run(vec![record("1_a", "a;", "-a;")]).await.unwrap();

        assert_eq!(report.orphaned, ["2_b"]);
        assert!(report.reverted.is_empty());
        let backend = reconciler.into_inner();
        assert!(backend.executed().is_empty());
        assert_eq!(names(backend.ledger().unwrap()), ["1_a", "2_b"]);
    }

    #[tokio::test]
    async fn test_descriptor_refresh_keeps_timestamp() {
        let applied_at = Utc::now() - chrono::Duration::days(3);
        let stored = record("1_a", "a;", "-a;").applied(applied_at);
        let mut reconciler = Reconciler::new(
            MemoryBackend::with_ledger(ledger_of(vec![stored])),
            ReconcileOptions::new(),
        );

        let mut current = record("1_a", "a;", "drop a;");
        current.description = "Renamed".to_string();
        let report = reconciler.run(vec![current]).await.unwrap();

        assert_eq!(report.refreshed, ["1_a"]);
        let backend = reconciler.into_inner();
        assert!(backend.executed().is_empty());
        let entry = backend.ledger().unwrap().get("1_a").unwrap();
        assert_eq!(entry.down, "drop a;");
        assert_eq!(entry.description, "Renamed");
        assert_eq!(entry.applied_at, Some(applied_at));
    }

    #[tokio::test]
    async fn test_empty_up_is_applied() {
        fn empty(_: &mut keel_schema::Specifier) -> keel_schema::Result<()> {
            Ok(())
        }
        let mut registry = crate::registry::Registry::new();
        registry.register_fn("0001_empty", empty);
        let mut reconciler = Reconciler::new(MemoryBackend::new(), ReconcileOptions::new());

        let report = reconciler.run(registry.records().unwrap()).await.unwrap();

        assert_eq!(report.applied, ["0001_empty"]);
        let backend = reconciler.into_inner();
        assert_eq!(backend.executed(), [""]);
        assert!(backend.ledger().unwrap().contains("0001_empty"));
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Runs the reconciler and returns the batching and application events.
    async fn batch_events(stored: &[&str], local: &[&str]) -> Vec<String> {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .without_time()
            .with_target(false)
            .with_max_level(Level::INFO)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let ledger = ledger_of(stored.iter().map(|n| record(n, "x;", "-x;")).collect());
        let mut reconciler = Reconciler::new(MemoryBackend::with_ledger(ledger), ReconcileOptions::new());
        reconciler
            .run(local.iter().map(|n| record(n, "x;", "-x;")).collect())
            .await
            .unwrap();

        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        output
            .lines()
            .filter_map(|line| line.trim().strip_prefix("INFO "))
            .filter(|message| {
                message.contains("were already run") || message.starts_with("Running migration")
            })
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_already_run_logged_before_new_and_at_end() {
        let events = batch_events(&["1_a", "3_c"], &["1_a", "2_b", "3_c"]).await;

        assert_eq!(events.len(), 3, "{events:?}");
        assert_eq!(events[0], "1 migration were already run");
        assert!(events[1].starts_with("Running migration"));
        assert!(events[1].contains("name=2_b"));
        assert_eq!(events[2], "1 migration were already run");
    }

    #[tokio::test]
    async fn test_already_run_count_is_batched() {
        let events = batch_events(&["1_a", "2_b"], &["1_a", "2_b", "3_c"]).await;

        assert_eq!(events.len(), 2, "{events:?}");
        assert_eq!(events[0], "2 migrations were already run");
        assert!(events[1].contains("name=3_c"));

        let events = batch_events(&["1_a", "2_b"], &["1_a", "2_b"]).await;
        assert_eq!(events, ["2 migrations were already run"]);
    }

    #[tokio::test]
    async fn test_failed_script_surfaces_text() {
        let backend = MemoryBackend::new().fail_on("broken;");
        let mut reconciler = Reconciler::new(backend, ReconcileOptions::new());

        let result = reconciler
            .run(vec![record("1_a", "a;", "-a;"), record("2_b", "broken;", "-b;")])
            .await;

        match result {
            Err(MigrateError::ScriptExecution { name, script, .. }) => {
                assert_eq!(name, "2_b");
                assert_eq!(script, "broken;");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        // The first migration stays recorded.
        let backend = reconciler.into_inner();
        assert_eq!(names(backend.ledger().unwrap()), ["1_a"]);
    }

    #[tokio::test]
    async fn test_failed_replay_rolls_back() {
        let ledger = ledger_of(vec![record("1_a", "old;", "-old;")]);
        let backend = MemoryBackend::with_ledger(ledger.clone()).fail_on("new;");
        let options = ReconcileOptions::new().development(true);
        let mut reconciler = Reconciler::new(backend, options);

        let result = reconciler.run(vec![record("1_a", "new;", "-new;")]).await;

        assert!(matches!(result, Err(MigrateError::ScriptExecution { .. })));
        let backend = reconciler.into_inner();
        assert!(backend.executed().is_empty());
        assert_eq!(backend.ledger(), Some(&ledger));
        assert!(!backend.in_transaction());
    }

    #[tokio::test]
    async fn test_duplicate_local_names_rejected() {
        let mut reconciler = Reconciler::new(MemoryBackend::new(), ReconcileOptions::new());
        let result = reconciler
            .run(vec![record("1_a", "a;", "-a;"), record("1_a", "b;", "-b;")])
            .await;
        assert!(matches!(result, Err(MigrateError::DuplicateMigration(_))));
        assert!(reconciler.backend().executed().is_empty());
    }
}
