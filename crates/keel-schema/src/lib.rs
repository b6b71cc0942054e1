//! Declarative schema changes compiled to paired PostgreSQL scripts.
//!
//! `keel-schema` turns table and column operations into a forward (`up`) and a
//! reverse (`down`) script. The reverse is derived automatically: every
//! operation carries its own inverse and the inverses are emitted in reverse
//! declaration order.
//!
//! # Example
//!
//! ```rust
//! use keel_schema::{migration, ConverterDefinition};
//!
//! let status = ConverterDefinition::enumeration([("active", 1), ("banned", 2)]);
//!
//! let compiled = migration(|t| {
//!     t.description("Users and their e-mails")?;
//!     t.create_table("user_table", |c| c("name").column_type("text"))?;
//!     t.create_table("user_email", |c| {
//!         vec![
//!             c("value").column_type("text").unique(),
//!             c("user").references("user_table"),
//!         ]
//!     })?;
//!     t.alter_table("user_email")
//!         .add_column(|c| c("normalized").column_type("text").nullable())?;
//!     t.alter_table("user_table")
//!         .alter_column("status")
//!         .set_converter(Some(&status), None)?;
//!     Ok(())
//! })
//! .unwrap();
//!
//! assert!(compiled.up.starts_with("create table \"user_table\""));
//! assert!(compiled.down.ends_with("drop table \"user_table\";"));
//! ```

pub mod column;
pub mod converter;
pub mod error;
pub mod quote;
pub mod specifier;

pub use column::{bigint, boolean, column, integer, jsonb, text, timestamptz, ColumnSpec};
pub use converter::ConverterDefinition;
pub use error::{Result, SchemaError};
pub use quote::{dollar_quote, DefaultValue};
pub use specifier::{
    migration, AlterColumn, AlterTable, ColumnFactory, CompiledMigration, IntoColumns,
    SchemaOperation, Specifier, DEFAULT_DESCRIPTION,
};
