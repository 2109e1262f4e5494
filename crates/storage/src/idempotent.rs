//! Idempotent schema mutator.
//!
//! Each `*_if_missing` operation checks the catalog, aborts if the table it
//! needs is absent or existing data would violate the change, and otherwise
//! applies the DDL. A duplicate-object error from the DDL itself is reported
//! as already applied when a re-probe finds the object (another run got
//! there between check and act), and as `NameConflict` when it does not.

use async_trait::async_trait;
use iati_migrate_core::{
    CheckExpr, ColumnDef, Ident, StepOutcome, TableRef, TypeDecl, VIOLATION_SAMPLE_LIMIT,
};

use crate::error::StorageError;
use crate::traits::{DataStore, DuplicateGroup, ForeignKeyRef, SchemaCatalog, SchemaDdl};

/// Treat a lost creation race as success, but only if the object the step
/// wanted is now present. A duplicate-name error with the object still
/// missing means the name belongs to something else.
async fn settle<F>(
    result: Result<(), StorageError>,
    what: &str,
    present: F,
) -> Result<StepOutcome, StorageError>
where
    F: Future<Output = Result<bool, StorageError>> + Send,
{
    match result {
        Ok(()) => Ok(StepOutcome::applied(0)),
        Err(StorageError::AlreadyExists(detail)) => {
            if present.await? {
                tracing::info!(object = what, "created concurrently, treating as already applied");
                Ok(StepOutcome::already_applied(format!("{what} already exists")))
            } else {
                tracing::warn!(object = what, %detail, "name is taken by a different object");
                Err(StorageError::NameConflict { what: what.to_owned(), detail })
            }
        },
        Err(err) => Err(err),
    }
}

#[async_trait]
pub trait IdempotentSchema: SchemaCatalog + SchemaDdl + DataStore {
    async fn require_table(&self, table: &TableRef) -> Result<(), StorageError> {
        if self.table_exists(table).await? {
            Ok(())
        } else {
            Err(StorageError::missing("table", table.key_in(self.default_schema())))
        }
    }

    async fn require_column(&self, table: &TableRef, column: &Ident) -> Result<(), StorageError> {
        if self.column_exists(table, column).await? {
            Ok(())
        } else {
            Err(StorageError::missing(
                "column",
                format!("{}.{column}", table.key_in(self.default_schema())),
            ))
        }
    }

    /// The most frequent duplicate groups, rendered for an error message.
    async fn duplicate_sample(
        &self,
        table: &TableRef,
        columns: &[Ident],
    ) -> Result<Vec<String>, StorageError> {
        let groups = self.find_duplicates(table, columns, VIOLATION_SAMPLE_LIMIT).await?;
        Ok(groups.iter().map(DuplicateGroup::describe).collect())
    }

    async fn add_column_if_missing(
        &self,
        table: &TableRef,
        column: &Ident,
        type_decl: &TypeDecl,
        comment: Option<&str>,
    ) -> Result<StepOutcome, StorageError> {
        let what = format!("column {table}.{column}");
        self.require_table(table).await?;
        if self.column_exists(table, column).await? {
            tracing::debug!(%table, %column, "column already present");
            return Ok(StepOutcome::already_applied(format!("{what} already exists")));
        }

        let outcome = settle(
            self.add_column(table, column, type_decl, comment).await,
            &what,
            self.column_exists(table, column),
        )
        .await?;
        if outcome.is_applied() {
            tracing::info!(%table, %column, type_decl = %type_decl, "added column");
        }
        Ok(outcome)
    }

    async fn add_unique_constraint_if_missing(
        &self,
        table: &TableRef,
        constraint: &Ident,
        columns: &[Ident],
    ) -> Result<StepOutcome, StorageError> {
        let what = format!("constraint {constraint}");
        if self.constraint_exists(constraint, table.schema.as_ref()).await? {
            return Ok(StepOutcome::already_applied(format!("{what} already exists")));
        }
        self.require_table(table).await?;
        for column in columns {
            self.require_column(table, column).await?;
        }

        let rows = self.count_duplicate_rows(table, columns).await?;
        if rows > 0 {
            tracing::warn!(%table, %constraint, rows, "duplicate values block unique constraint");
            return Err(StorageError::violation(
                format!("{table} has duplicate values for unique constraint {constraint}"),
                rows,
                self.duplicate_sample(table, columns).await?,
            ));
        }

        let outcome = settle(
            self.add_unique_constraint(table, constraint, columns).await,
            &what,
            self.constraint_exists(constraint, table.schema.as_ref()),
        )
        .await?;
        if outcome.is_applied() {
            tracing::info!(%table, %constraint, "added unique constraint");
        }
        Ok(outcome)
    }

    async fn add_foreign_key_if_missing(
        &self,
        fk: ForeignKeyRef<'_>,
    ) -> Result<StepOutcome, StorageError> {
        let what = format!("constraint {}", fk.constraint);
        if self.constraint_exists(fk.constraint, fk.table.schema.as_ref()).await? {
            return Ok(StepOutcome::already_applied(format!("{what} already exists")));
        }
        self.require_column(fk.table, fk.column).await?;
        self.require_table(fk.target_table).await?;
        self.require_column(fk.target_table, fk.target_column).await?;

        let orphans = self.count_orphans(fk).await?;
        if orphans > 0 {
            return Err(StorageError::violation(
                format!(
                    "{}.{} has values with no matching {}.{}",
                    fk.table, fk.column, fk.target_table, fk.target_column
                ),
                orphans,
                Vec::new(),
            ));
        }

        let outcome = settle(
            self.add_foreign_key(fk).await,
            &what,
            self.constraint_exists(fk.constraint, fk.table.schema.as_ref()),
        )
        .await?;
        if outcome.is_applied() {
            tracing::info!(
                table = %fk.table,
                constraint = %fk.constraint,
                on_delete = %fk.on_delete,
                "added foreign key"
            );
        }
        Ok(outcome)
    }

    async fn add_check_constraint_if_missing(
        &self,
        table: &TableRef,
        constraint: &Ident,
        check: &CheckExpr,
    ) -> Result<StepOutcome, StorageError> {
        let what = format!("constraint {constraint}");
        if self.constraint_exists(constraint, table.schema.as_ref()).await? {
            return Ok(StepOutcome::already_applied(format!("{what} already exists")));
        }
        self.require_table(table).await?;

        let violations = self.count_check_violations(table, check).await?;
        if violations > 0 {
            tracing::warn!(%table, %constraint, violations, "existing rows violate check");
            return Err(StorageError::violation(
                format!("{table} has rows violating check constraint {constraint}"),
                violations,
                Vec::new(),
            ));
        }

        let outcome = settle(
            self.add_check_constraint(table, constraint, check).await,
            &what,
            self.constraint_exists(constraint, table.schema.as_ref()),
        )
        .await?;
        if outcome.is_applied() {
            tracing::info!(%table, %constraint, "added check constraint");
        }
        Ok(outcome)
    }

    async fn create_index_if_missing(
        &self,
        table: &TableRef,
        index: &Ident,
        columns: &[Ident],
        unique: bool,
    ) -> Result<StepOutcome, StorageError> {
        let what = format!("index {index}");
        if self.index_exists(index, table.schema.as_ref()).await? {
            return Ok(StepOutcome::already_applied(format!("{what} already exists")));
        }
        self.require_table(table).await?;
        if unique {
            let rows = self.count_duplicate_rows(table, columns).await?;
            if rows > 0 {
                return Err(StorageError::violation(
                    format!("{table} has duplicate values for unique index {index}"),
                    rows,
                    self.duplicate_sample(table, columns).await?,
                ));
            }
        }

        let outcome = settle(
            self.create_index(table, index, columns, unique).await,
            &what,
            self.index_exists(index, table.schema.as_ref()),
        )
        .await?;
        if outcome.is_applied() {
            tracing::info!(%table, %index, unique, "created index");
        }
        Ok(outcome)
    }

    async fn create_table_if_missing(
        &self,
        table: &TableRef,
        columns: &[ColumnDef],
        primary_key: &[Ident],
    ) -> Result<StepOutcome, StorageError> {
        let what = format!("table {table}");
        if self.table_exists(table).await? {
            return Ok(StepOutcome::already_applied(format!("{what} already exists")));
        }

        let outcome = settle(
            self.create_table(table, columns, primary_key).await,
            &what,
            self.table_exists(table),
        )
        .await?;
        if outcome.is_applied() {
            tracing::info!(%table, columns = columns.len(), "created table");
        }
        Ok(outcome)
    }
}

impl<T: SchemaCatalog + SchemaDdl + DataStore> IdempotentSchema for T {}
