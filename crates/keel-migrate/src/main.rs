//! keel-migrate CLI
//!
//! Command-line tool for reconciling a PostgreSQL database with a migrations
//! directory.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use keel_migrate::loader::read_migration_file;
use keel_migrate::prelude::*;

/// Ledger-based PostgreSQL migrations.
#[derive(Parser)]
#[command(name = "keel-migrate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// PostgreSQL connection string.
    #[arg(short, long, env = "DATABASE_URL", global = true)]
    database: Option<String>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Directories {
    /// Directory with migration scripts and sources.
    #[arg(short, long = "source")]
    source: Vec<PathBuf>,

    /// Directory with artifacts compiled from `.rs` sources.
    #[arg(short, long = "build")]
    build: Vec<PathBuf>,
}

impl Directories {
    fn resolve(&self) -> Vec<MigrationDirectory> {
        let mut directories: Vec<MigrationDirectory> = if self.source.is_empty() {
            vec![MigrationDirectory::source("migrations")]
        } else {
            self.source.iter().map(MigrationDirectory::source).collect()
        };
        directories.extend(self.build.iter().map(MigrationDirectory::build));
        directories
    }

    fn load(&self) -> Result<Vec<MigrationRecord>> {
        load_migrations(&self.resolve(), &Registry::new())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Apply new migrations and reconcile the ledger.
    Migrate {
        #[command(flatten)]
        directories: Directories,

        /// Revert orphans and replay a changed last migration.
        #[arg(long, env = "KEEL_DEVELOPMENT")]
        development: bool,
    },

    /// Show each migration's state relative to the ledger.
    Status {
        #[command(flatten)]
        directories: Directories,
    },

    /// Print the stored ledger document.
    Ledger,

    /// Create the ledger table if it does not exist.
    Init,

    /// Parse a migration script or build artifact and print its sections.
    Render {
        /// Script or artifact file.
        file: PathBuf,
    },
}

async fn connect(database: Option<&str>) -> anyhow::Result<PgBackend> {
    let url = database.ok_or_else(|| {
        anyhow::anyhow!("a database URL is required (--database or DATABASE_URL)")
    })?;
    Ok(PgBackend::connect(url).await?)
}

fn render(file: &Path) -> anyhow::Result<()> {
    let record = read_migration_file(file)?;
    println!("name:        {}", record.name);
    println!("description: {}", record.description);
    println!();
    println!("{}", record.up.trim_end());
    println!();
    println!("{}", record.down.trim_end());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let database = cli.database.as_deref();
    match cli.command {
        Commands::Render { file } => render(&file)?,

        Commands::Init => {
            let mut backend = connect(database).await?;
            info!("Initializing migration ledger...");
            let ledger = backend.load_ledger().await?;
            info!(migrations = ledger.len(), "Migration ledger ready.");
            backend.close().await?;
        }

        Commands::Ledger => {
            let mut backend = connect(database).await?;
            let ledger = backend.load_ledger().await?;
            println!("{}", serde_json::to_string_pretty(&ledger.to_document())?);
            backend.close().await?;
        }

        Commands::Status { directories } => {
            let migrations = directories.load()?;
            let mut reconciler = Reconciler::new(connect(database).await?, ReconcileOptions::new());
            let report = reconciler.status(&migrations).await?;

            if report.is_empty() {
                println!("No migrations found.");
            }
            for entry in &report {
                let applied_at = entry
                    .applied_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_default();
                println!(
                    "[{:<8}] {}  {}  {}",
                    entry.state, entry.name, entry.description, applied_at
                );
            }
            reconciler.into_inner().close().await?;
        }

        Commands::Migrate {
            directories,
            development,
        } => {
            let migrations = directories.load()?;
            info!(count = migrations.len(), "Loaded migrations");
            if development {
                info!("Development mode - orphans are reverted and changed migrations replayed.");
            }

            let options = ReconcileOptions::new().development(development);
            let mut reconciler = Reconciler::new(connect(database).await?, options);
            let report = reconciler.run(migrations).await?;

            info!(
                applied = report.applied.len(),
                reverted = report.reverted.len(),
                replayed = report.replayed.len(),
                refreshed = report.refreshed.len(),
                "Migrations complete."
            );
            for name in &report.orphaned {
                info!(name = %name, "Orphaned migration left in place");
            }
            reconciler.into_inner().close().await?;
        }
    }

    Ok(())
}
