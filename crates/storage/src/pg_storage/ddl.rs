//! DDL runs inside a transaction so a failed statement (or a failed comment
//! after a successful `ALTER`) leaves nothing behind.

use async_trait::async_trait;
use iati_migrate_core::{CheckExpr, ColumnDef, Ident, TableRef, TypeDecl};

use super::{PgSchema, sql};
use crate::error::StorageError;
use crate::traits::{ForeignKeyRef, SchemaDdl};

impl PgSchema {
    async fn execute_in_tx(&self, statements: &[String]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        for statement in statements {
            tracing::debug!(sql = %statement, "executing DDL");
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl SchemaDdl for PgSchema {
    async fn add_column(
        &self,
        table: &TableRef,
        column: &Ident,
        type_decl: &TypeDecl,
        comment: Option<&str>,
    ) -> Result<(), StorageError> {
        let mut statements = vec![sql::add_column(&self.schema, table, column, type_decl)];
        if let Some(comment) = comment {
            statements.push(sql::comment_on_column(&self.schema, table, column, comment));
        }
        self.execute_in_tx(&statements).await
    }

    async fn add_unique_constraint(
        &self,
        table: &TableRef,
        constraint: &Ident,
        columns: &[Ident],
    ) -> Result<(), StorageError> {
        self.execute_in_tx(&[sql::add_unique(&self.schema, table, constraint, columns)]).await
    }

    async fn add_foreign_key(&self, fk: ForeignKeyRef<'_>) -> Result<(), StorageError> {
        self.execute_in_tx(&[sql::add_foreign_key(&self.schema, fk)]).await
    }

    async fn add_check_constraint(
        &self,
        table: &TableRef,
        constraint: &Ident,
        check: &CheckExpr,
    ) -> Result<(), StorageError> {
        self.execute_in_tx(&[sql::add_check(&self.schema, table, constraint, check)]).await
    }

    async fn create_index(
        &self,
        table: &TableRef,
        index: &Ident,
        columns: &[Ident],
        unique: bool,
    ) -> Result<(), StorageError> {
        self.execute_in_tx(&[sql::create_index(&self.schema, table, index, columns, unique)]).await
    }

    async fn create_table(
        &self,
        table: &TableRef,
        columns: &[ColumnDef],
        primary_key: &[Ident],
    ) -> Result<(), StorageError> {
        let mut statements = vec![sql::create_table(&self.schema, table, columns, primary_key)];
        for column in columns {
            if let Some(comment) = &column.comment {
                statements.push(sql::comment_on_column(&self.schema, table, &column.name, comment));
            }
        }
        self.execute_in_tx(&statements).await
    }
}
