use async_trait::async_trait;
use chrono::{DateTime, Utc};
use iati_migrate_core::{
    BackfillSpec, CheckExpr, DedupSpec, Ident, IdentifierRow, Rename, RepairPredicate, TableRef,
};
use sqlx::Row;

use super::{PgSchema, sql};
use crate::error::StorageError;
use crate::traits::{DataStore, DuplicateGroup, ForeignKeyRef};

impl PgSchema {
    async fn count(&self, query: &str) -> Result<u64, StorageError> {
        let n: i64 = sqlx::query_scalar(query).fetch_one(&self.pool).await?;
        Ok(u64::try_from(n).unwrap_or(0))
    }
}

#[async_trait]
impl DataStore for PgSchema {
    async fn count_matching(
        &self,
        table: &TableRef,
        column: &Ident,
        predicate: &RepairPredicate,
    ) -> Result<u64, StorageError> {
        self.count(&sql::count_where(&self.schema, table, &sql::predicate(column, predicate)))
            .await
    }

    async fn count_check_violations(
        &self,
        table: &TableRef,
        check: &CheckExpr,
    ) -> Result<u64, StorageError> {
        let condition = format!("NOT ({})", sql::check_expr(check));
        self.count(&sql::count_where(&self.schema, table, &condition)).await
    }

    async fn count_orphans(&self, fk: ForeignKeyRef<'_>) -> Result<u64, StorageError> {
        self.count(&sql::count_orphans(&self.schema, fk)).await
    }

    async fn find_duplicates(
        &self,
        table: &TableRef,
        columns: &[Ident],
        limit: usize,
    ) -> Result<Vec<DuplicateGroup>, StorageError> {
        let query = sql::find_duplicates(&self.schema, table, columns, limit);
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                let values = (0..columns.len())
                    .map(|i| row.try_get::<Option<String>, _>(i))
                    .collect::<Result<Vec<_>, _>>()?;
                let count: i64 = row.try_get("n")?;
                Ok(DuplicateGroup { values, count: u64::try_from(count).unwrap_or(0) })
            })
            .collect()
    }

    async fn count_duplicate_rows(
        &self,
        table: &TableRef,
        columns: &[Ident],
    ) -> Result<u64, StorageError> {
        self.count(&sql::count_duplicate_rows(&self.schema, table, columns)).await
    }

    async fn backfill(&self, spec: &BackfillSpec) -> Result<u64, StorageError> {
        let query = sql::backfill(&self.schema, spec);
        tracing::debug!(sql = %query, "running backfill");
        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn load_identifier_rows(
        &self,
        spec: &DedupSpec,
    ) -> Result<Vec<IdentifierRow>, StorageError> {
        let query = format!(
            "SELECT {}::text AS key, {}::text AS value, {}::timestamptz AS created_at \
             FROM {} WHERE {} IS NOT NULL",
            spec.key_column.quoted(),
            spec.column.quoted(),
            spec.created_column.quoted(),
            spec.table.quoted_in(&self.schema),
            spec.column.quoted(),
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                Ok(IdentifierRow {
                    key: row.try_get("key")?,
                    value: row.try_get("value")?,
                    created_at: row.try_get::<Option<DateTime<Utc>>, _>("created_at")?,
                })
            })
            .collect()
    }

    async fn apply_renames(
        &self,
        spec: &DedupSpec,
        renames: &[Rename],
    ) -> Result<u64, StorageError> {
        if renames.is_empty() {
            return Ok(0);
        }
        let query = format!(
            "UPDATE {} SET {col} = $1 WHERE {}::text = $2 AND {col}::text = $3",
            spec.table.quoted_in(&self.schema),
            spec.key_column.quoted(),
            col = spec.column.quoted(),
        );

        let mut tx = self.pool.begin().await?;
        let mut updated: u64 = 0;
        for rename in renames {
            let result = sqlx::query(&query)
                .bind(&rename.to)
                .bind(&rename.key)
                .bind(&rename.from)
                .execute(&mut *tx)
                .await?;
            updated += result.rows_affected();
        }
        tx.commit().await?;
        Ok(updated)
    }
}
