use async_trait::async_trait;
use chrono::{DateTime, Utc};
use iati_migrate_core::{LEDGER_TABLE, LedgerEntry};
use sqlx::Row;

use super::PgSchema;
use crate::error::StorageError;
use crate::pg_migrations::{ensure_ledger_table, ledger_table};
use crate::traits::LedgerStore;

impl PgSchema {
    async fn ledger_present(&self) -> Result<bool, StorageError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = $1 AND table_name = $2
            )",
        )
        .bind(&self.schema)
        .bind(LEDGER_TABLE)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

#[async_trait]
impl LedgerStore for PgSchema {
    async fn ensure_ledger(&self) -> Result<(), StorageError> {
        ensure_ledger_table(&self.pool, &self.schema).await
    }

    async fn ledger_entries(&self) -> Result<Vec<LedgerEntry>, StorageError> {
        if !self.ledger_present().await? {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT step_id, checksum, rows_affected, applied_at, applied_by \
             FROM {} ORDER BY applied_at, step_id",
            ledger_table(&self.schema)
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(LedgerEntry {
                    step_id: row.try_get("step_id")?,
                    checksum: row.try_get("checksum")?,
                    rows_affected: row.try_get("rows_affected")?,
                    applied_at: row.try_get::<DateTime<Utc>, _>("applied_at")?,
                    applied_by: row.try_get("applied_by")?,
                })
            })
            .collect()
    }

    async fn record_step(
        &self,
        step_id: &str,
        checksum: &str,
        rows_affected: u64,
        applied_by: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(&format!(
            "INSERT INTO {} (step_id, checksum, rows_affected, applied_at, applied_by) \
             VALUES ($1, $2, $3, NOW(), $4) \
             ON CONFLICT (step_id) DO UPDATE SET checksum = EXCLUDED.checksum, \
             rows_affected = EXCLUDED.rows_affected, applied_at = EXCLUDED.applied_at, \
             applied_by = EXCLUDED.applied_by",
            ledger_table(&self.schema)
        ))
        .bind(step_id)
        .bind(checksum)
        .bind(i64::try_from(rows_affected).unwrap_or(i64::MAX))
        .bind(applied_by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn forget_step(&self, step_id: &str) -> Result<bool, StorageError> {
        if !self.ledger_present().await? {
            return Ok(false);
        }
        let result =
            sqlx::query(&format!("DELETE FROM {} WHERE step_id = $1", ledger_table(&self.schema)))
                .bind(step_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}
