//! Unified schema backend with enum dispatch.

use async_trait::async_trait;
use iati_migrate_core::{
    BackfillSpec, CheckExpr, ColumnDef, DedupSpec, Ident, IdentifierRow, LedgerEntry, Rename,
    RepairPredicate, TableRef, TypeDecl,
};

use crate::error::StorageError;
use crate::traits::{
    DataStore, DuplicateGroup, ForeignKeyRef, LedgerStore, SchemaCatalog, SchemaDdl,
};

macro_rules! dispatch {
    ($self:expr, $trait:path, $method:ident ( $($arg:expr),* $(,)? )) => {
        match $self {
            SchemaBackend::Postgres(s) => <crate::pg_storage::PgSchema as $trait>::$method(s, $($arg),*).await,
            #[cfg(any(test, feature = "memory"))]
            SchemaBackend::Memory(s) => <crate::memory::MemorySchema as $trait>::$method(s, $($arg),*).await,
        }
    };
}

#[derive(Clone, Debug)]
pub enum SchemaBackend {
    Postgres(crate::pg_storage::PgSchema),
    #[cfg(any(test, feature = "memory"))]
    Memory(crate::memory::MemorySchema),
}

impl SchemaBackend {
    pub async fn new_postgres(
        database_url: &str,
        schema: &str,
        max_connections: u32,
    ) -> Result<Self, StorageError> {
        Ok(Self::Postgres(
            crate::pg_storage::PgSchema::connect(database_url, schema, max_connections).await?,
        ))
    }

    #[cfg(any(test, feature = "memory"))]
    #[must_use]
    pub fn new_memory(schema: &str) -> Self {
        Self::Memory(crate::memory::MemorySchema::new(schema))
    }

    pub async fn close(&self) {
        match self {
            Self::Postgres(s) => s.close().await,
            #[cfg(any(test, feature = "memory"))]
            Self::Memory(_) => {},
        }
    }
}

// ── SchemaCatalog ────────────────────────────────────────────────

#[async_trait]
impl SchemaCatalog for SchemaBackend {
    fn default_schema(&self) -> &str {
        match self {
            Self::Postgres(s) => s.default_schema(),
            #[cfg(any(test, feature = "memory"))]
            Self::Memory(s) => s.default_schema(),
        }
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool, StorageError> {
        dispatch!(self, SchemaCatalog, table_exists(table))
    }

    async fn column_exists(&self, table: &TableRef, column: &Ident) -> Result<bool, StorageError> {
        dispatch!(self, SchemaCatalog, column_exists(table, column))
    }

    async fn constraint_exists(
        &self,
        constraint: &Ident,
        schema: Option<&Ident>,
    ) -> Result<bool, StorageError> {
        dispatch!(self, SchemaCatalog, constraint_exists(constraint, schema))
    }

    async fn index_exists(
        &self,
        index: &Ident,
        schema: Option<&Ident>,
    ) -> Result<bool, StorageError> {
        dispatch!(self, SchemaCatalog, index_exists(index, schema))
    }
}

// ── SchemaDdl ────────────────────────────────────────────────────

#[async_trait]
impl SchemaDdl for SchemaBackend {
    async fn add_column(
        &self,
        table: &TableRef,
        column: &Ident,
        type_decl: &TypeDecl,
        comment: Option<&str>,
    ) -> Result<(), StorageError> {
        dispatch!(self, SchemaDdl, add_column(table, column, type_decl, comment))
    }

    async fn add_unique_constraint(
        &self,
        table: &TableRef,
        constraint: &Ident,
        columns: &[Ident],
    ) -> Result<(), StorageError> {
        dispatch!(self, SchemaDdl, add_unique_constraint(table, constraint, columns))
    }

    async fn add_foreign_key(&self, fk: ForeignKeyRef<'_>) -> Result<(), StorageError> {
        dispatch!(self, SchemaDdl, add_foreign_key(fk))
    }

    async fn add_check_constraint(
        &self,
        table: &TableRef,
        constraint: &Ident,
        check: &CheckExpr,
    ) -> Result<(), StorageError> {
        dispatch!(self, SchemaDdl, add_check_constraint(table, constraint, check))
    }

    async fn create_index(
        &self,
        table: &TableRef,
        index: &Ident,
        columns: &[Ident],
        unique: bool,
    ) -> Result<(), StorageError> {
        dispatch!(self, SchemaDdl, create_index(table, index, columns, unique))
    }

    async fn create_table(
        &self,
        table: &TableRef,
        columns: &[ColumnDef],
        primary_key: &[Ident],
    ) -> Result<(), StorageError> {
        dispatch!(self, SchemaDdl, create_table(table, columns, primary_key))
    }
}

// ── DataStore ────────────────────────────────────────────────────

#[async_trait]
impl DataStore for SchemaBackend {
    async fn count_matching(
        &self,
        table: &TableRef,
        column: &Ident,
        predicate: &RepairPredicate,
    ) -> Result<u64, StorageError> {
        dispatch!(self, DataStore, count_matching(table, column, predicate))
    }

    async fn count_check_violations(
        &self,
        table: &TableRef,
        check: &CheckExpr,
    ) -> Result<u64, StorageError> {
        dispatch!(self, DataStore, count_check_violations(table, check))
    }

    async fn count_orphans(&self, fk: ForeignKeyRef<'_>) -> Result<u64, StorageError> {
        dispatch!(self, DataStore, count_orphans(fk))
    }

    async fn find_duplicates(
        &self,
        table: &TableRef,
        columns: &[Ident],
        limit: usize,
    ) -> Result<Vec<DuplicateGroup>, StorageError> {
        dispatch!(self, DataStore, find_duplicates(table, columns, limit))
    }

    async fn count_duplicate_rows(
        &self,
        table: &TableRef,
        columns: &[Ident],
    ) -> Result<u64, StorageError> {
        dispatch!(self, DataStore, count_duplicate_rows(table, columns))
    }

    async fn backfill(&self, spec: &BackfillSpec) -> Result<u64, StorageError> {
        dispatch!(self, DataStore, backfill(spec))
    }

    async fn load_identifier_rows(
        &self,
        spec: &DedupSpec,
    ) -> Result<Vec<IdentifierRow>, StorageError> {
        dispatch!(self, DataStore, load_identifier_rows(spec))
    }

    async fn apply_renames(
        &self,
        spec: &DedupSpec,
        renames: &[Rename],
    ) -> Result<u64, StorageError> {
        dispatch!(self, DataStore, apply_renames(spec, renames))
    }
}

// ── LedgerStore ──────────────────────────────────────────────────

#[async_trait]
impl LedgerStore for SchemaBackend {
    async fn ensure_ledger(&self) -> Result<(), StorageError> {
        dispatch!(self, LedgerStore, ensure_ledger())
    }

    async fn ledger_entries(&self) -> Result<Vec<LedgerEntry>, StorageError> {
        dispatch!(self, LedgerStore, ledger_entries())
    }

    async fn record_step(
        &self,
        step_id: &str,
        checksum: &str,
        rows_affected: u64,
        applied_by: &str,
    ) -> Result<(), StorageError> {
        dispatch!(self, LedgerStore, record_step(step_id, checksum, rows_affected, applied_by))
    }

    async fn forget_step(&self, step_id: &str) -> Result<bool, StorageError> {
        dispatch!(self, LedgerStore, forget_step(step_id))
    }
}
