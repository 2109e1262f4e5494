use async_trait::async_trait;
use iati_migrate_core::{Ident, TableRef};

use super::PgSchema;
use crate::error::StorageError;
use crate::traits::SchemaCatalog;

#[async_trait]
impl SchemaCatalog for PgSchema {
    fn default_schema(&self) -> &str {
        &self.schema
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool, StorageError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = $1 AND table_name = $2
            )",
        )
        .bind(table.schema_or(&self.schema))
        .bind(table.name.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn column_exists(&self, table: &TableRef, column: &Ident) -> Result<bool, StorageError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                SELECT 1 FROM information_schema.columns
                WHERE table_schema = $1 AND table_name = $2 AND column_name = $3
            )",
        )
        .bind(table.schema_or(&self.schema))
        .bind(table.name.as_str())
        .bind(column.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn constraint_exists(
        &self,
        constraint: &Ident,
        schema: Option<&Ident>,
    ) -> Result<bool, StorageError> {
        // pg_constraint, not information_schema: the latter hides constraints on
        // tables the current role has no privileges on.
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                SELECT 1 FROM pg_catalog.pg_constraint c
                JOIN pg_catalog.pg_namespace n ON n.oid = c.connamespace
                WHERE n.nspname = $1 AND c.conname = $2
            )",
        )
        .bind(schema.map_or(self.schema.as_str(), Ident::as_str))
        .bind(constraint.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn index_exists(
        &self,
        index: &Ident,
        schema: Option<&Ident>,
    ) -> Result<bool, StorageError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                SELECT 1 FROM pg_catalog.pg_indexes WHERE schemaname = $1 AND indexname = $2
            )",
        )
        .bind(schema.map_or(self.schema.as_str(), Ident::as_str))
        .bind(index.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}
