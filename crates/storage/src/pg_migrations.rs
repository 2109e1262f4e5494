//! Bootstrap DDL for the step ledger.
//!
//! This is the one place `IF NOT EXISTS` is used: the ledger is internal
//! bookkeeping, not a plan step, and has nothing to record about itself.

use iati_migrate_core::LEDGER_TABLE;
use sqlx::PgPool;

use crate::error::StorageError;

pub(crate) fn ledger_table(schema: &str) -> String {
    format!("\"{}\".{LEDGER_TABLE}", schema.replace('"', "\"\""))
}

/// Create the ledger table in `schema` if needed.
pub(crate) async fn ensure_ledger_table(pool: &PgPool, schema: &str) -> Result<(), StorageError> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            step_id TEXT PRIMARY KEY,
            checksum TEXT NOT NULL,
            rows_affected BIGINT NOT NULL DEFAULT 0,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            applied_by TEXT
        )
        "#,
        ledger_table(schema)
    ))
    .execute(pool)
    .await?;

    tracing::debug!(schema, table = LEDGER_TABLE, "ledger table ready");
    Ok(())
}
