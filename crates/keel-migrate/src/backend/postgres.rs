//! PostgreSQL backend.

use sqlx::postgres::PgConnection;
use sqlx::types::Json;
use sqlx::Connection;
use tracing::{debug, info};

use super::ScriptExecutor;
use crate::error::{MigrateError, Result};
use crate::ledger::{Ledger, LedgerDocument, LedgerStore, CREATE_LEDGER_TABLE_SQL};

/// SQLSTATE for "relation does not exist".
const UNDEFINED_TABLE: &str = "42P01";

/// Runs migrations against PostgreSQL over a single connection.
pub struct PgBackend {
    conn: PgConnection,
}

impl PgBackend {
    /// Connects to the database at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let conn = PgConnection::connect(url).await?;
        Ok(Self { conn })
    }

    /// Wraps an existing connection.
    #[must_use]
    pub fn from_connection(conn: PgConnection) -> Self {
        Self { conn }
    }

    /// Closes the connection.
    pub async fn close(self) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }

    async fn bootstrap(&mut self, create_table: bool) -> Result<Ledger> {
        if create_table {
            info!("Creating migration ledger table");
            sqlx::raw_sql(CREATE_LEDGER_TABLE_SQL)
                .execute(&mut self.conn)
                .await
                .map_err(|e| MigrateError::LedgerBootstrap(e.to_string()))?;
        }
        sqlx::query("INSERT INTO migration (data) VALUES ($1)")
            .bind(Json(LedgerDocument::default()))
            .execute(&mut self.conn)
            .await
            .map_err(|e| MigrateError::LedgerBootstrap(e.to_string()))?;
        Ok(Ledger::new())
    }
}

impl ScriptExecutor for PgBackend {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        debug!(sql = %sql, "Executing SQL");
        sqlx::raw_sql(sql).execute(&mut self.conn).await?;
        Ok(())
    }
}

impl LedgerStore for PgBackend {
    async fn load_ledger(&mut self) -> Result<Ledger> {
        let row: std::result::Result<Option<(Json<LedgerDocument>,)>, sqlx::Error> =
            sqlx::query_as("SELECT data FROM migration LIMIT 1")
                .fetch_optional(&mut self.conn)
                .await;

        match row {
            Ok(Some((Json(document),))) => Ledger::try_from(document),
            Ok(None) => self.bootstrap(false).await,
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(UNDEFINED_TABLE) => {
                self.bootstrap(true).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn swap_ledger(&mut self, expected: &Ledger, next: &Ledger) -> Result<()> {
        let result = sqlx::query("UPDATE migration SET data = $1 WHERE data = $2")
            .bind(Json(next.to_document()))
            .bind(Json(expected.to_document()))
            .execute(&mut self.conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(MigrateError::LedgerConflict);
        }
        Ok(())
    }
}
