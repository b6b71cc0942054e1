//! Example: Blog Application Migrations
//!
//! Defines a blog schema with the builder DSL, reconciles it against the
//! in-memory backend, then edits the newest migration and replays it the way
//! development mode would against a real database.
//!
//! Run with: cargo run --example blog_migrations -p keel-migrate

use keel_migrate::prelude::*;

// =============================================================================
// Migration Definitions
// =============================================================================

/// Initial migration: users
struct Migration0001;

impl DefinedMigration for Migration0001 {
    const NAME: &'static str = "0001_create_users";

    fn define(t: &mut Specifier) -> keel_schema::Result<()> {
        t.description("Create users")?;
        t.create_table("user_account", |c| {
            vec![
                c("userName").column_type("text").unique(),
                c("email").column_type("text").comment("Primary e-mail"),
                c("isActive").column_type("boolean").default(true),
                c("createdAt").column_type("timestamptz").default_expr("now()"),
            ]
        })
    }
}

/// Second migration: posts
struct Migration0002;

impl DefinedMigration for Migration0002 {
    const NAME: &'static str = "0002_create_posts";

    fn define(t: &mut Specifier) -> keel_schema::Result<()> {
        t.description("Create posts")?;
        let status = ConverterDefinition::enumeration([("draft", 0), ("published", 1)]);
        let status = keel_schema::integer("status").default(0).converter(&status)?;
        t.create_table("post", |c| {
            vec![
                c("title").column_type("text"),
                c("body").column_type("text").nullable(),
                c("author").references("user_account"),
                status,
            ]
        })
    }
}

/// Third migration: post summary, edited below
fn summary_v1(t: &mut Specifier) -> keel_schema::Result<()> {
    t.description("Add post summary")?;
    t.alter_table("post")
        .add_column(|c| c("summary").column_type("text").nullable())?;
    Ok(())
}

fn summary_v2(t: &mut Specifier) -> keel_schema::Result<()> {
    t.description("Add post summary")?;
    t.alter_table("post").add_column(|c| {
        c("summary")
            .column_type("text")
            .nullable()
            .comment("Shown in listings")
    })?;
    Ok(())
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    println!("{}", "=".repeat(70));
    println!(" KEEL-MIGRATE: Blog Application Example");
    println!("{}", "=".repeat(70));
    println!();

    let mut registry = Registry::new();
    registry
        .register::<Migration0001>()
        .register::<Migration0002>()
        .register_fn("0003_post_summary", summary_v1);

    // Step 1: Show generated SQL
    println!("[1] Generated SQL:");
    println!("{}", "-".repeat(70));
    let migrations = registry.records()?;
    for migration in &migrations {
        println!("\n-- Migration: {} ({})", migration.name, migration.description);
        println!("{}", migration.up);
    }
    println!("{}", "-".repeat(70));
    println!();

    // Step 2: Apply everything
    println!("[2] Applying migrations...\n");
    let mut reconciler = Reconciler::new(
        MemoryBackend::new(),
        ReconcileOptions::new().development(true),
    );
    let report = reconciler.run(migrations.clone()).await?;
    for name in &report.applied {
        println!("    [X] {name}");
    }
    println!();

    // Step 3: Running again is a no-op
    println!("[3] Running again...\n");
    let report = reconciler.run(migrations).await?;
    println!(
        "    {} already applied, nothing executed: {}\n",
        report.already_applied.len(),
        report.is_noop()
    );

    // Step 4: Edit the newest migration and replay it
    println!("[4] Editing 0003_post_summary and replaying...\n");
    registry.register_fn("0003_post_summary", summary_v2);
    reconciler.backend_mut().clear_executed();
    let report = reconciler.run(registry.records()?).await?;
    for name in &report.replayed {
        println!("    replayed {name}");
    }
    for sql in reconciler.backend().executed() {
        println!("    > {}", sql.replace('\n', "\n      "));
    }
    println!();

    // Step 5: Status
    println!("[5] Final state:\n");
    for entry in reconciler.status(&registry.records()?).await? {
        println!("    [{:<8}] {}  {}", entry.state, entry.name, entry.description);
    }
    println!();

    // Step 6: Stored ledger document
    println!("[6] Ledger document:\n");
    let ledger = reconciler.backend_mut().load_ledger().await?;
    println!("{}", serde_json::to_string_pretty(&ledger.to_document())?);

    Ok(())
}
