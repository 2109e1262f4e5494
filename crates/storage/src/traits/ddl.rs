use async_trait::async_trait;
use iati_migrate_core::{CheckExpr, ColumnDef, Ident, OnDelete, TableRef, TypeDecl};

use crate::error::StorageError;

/// Borrowed foreign key definition.
#[derive(Debug, Clone, Copy)]
pub struct ForeignKeyRef<'a> {
    pub table: &'a TableRef,
    pub constraint: &'a Ident,
    pub column: &'a Ident,
    pub target_table: &'a TableRef,
    pub target_column: &'a Ident,
    pub on_delete: OnDelete,
}

/// Unconditional schema changes.
///
/// Implementations do not check for existing objects: creating something
/// that already exists fails with [`StorageError::AlreadyExists`]. Each call
/// is atomic; a failure leaves no partial change behind.
#[async_trait]
pub trait SchemaDdl: Send + Sync {
    /// Add a column and, when given, its comment.
    async fn add_column(
        &self,
        table: &TableRef,
        column: &Ident,
        type_decl: &TypeDecl,
        comment: Option<&str>,
    ) -> Result<(), StorageError>;

    async fn add_unique_constraint(
        &self,
        table: &TableRef,
        constraint: &Ident,
        columns: &[Ident],
    ) -> Result<(), StorageError>;

    async fn add_foreign_key(&self, fk: ForeignKeyRef<'_>) -> Result<(), StorageError>;

    async fn add_check_constraint(
        &self,
        table: &TableRef,
        constraint: &Ident,
        check: &CheckExpr,
    ) -> Result<(), StorageError>;

    async fn create_index(
        &self,
        table: &TableRef,
        index: &Ident,
        columns: &[Ident],
        unique: bool,
    ) -> Result<(), StorageError>;

    async fn create_table(
        &self,
        table: &TableRef,
        columns: &[ColumnDef],
        primary_key: &[Ident],
    ) -> Result<(), StorageError>;
}
