use async_trait::async_trait;
use iati_migrate_core::{Ident, TableRef};

use crate::error::StorageError;

/// Read-only schema metadata.
///
/// Every probe answers `false` for objects that do not exist, including when
/// the table they would belong to is missing; only connection-level failures
/// are errors.
#[async_trait]
pub trait SchemaCatalog: Send + Sync {
    /// Schema that unqualified table references resolve against.
    fn default_schema(&self) -> &str;

    async fn table_exists(&self, table: &TableRef) -> Result<bool, StorageError>;

    async fn column_exists(&self, table: &TableRef, column: &Ident) -> Result<bool, StorageError>;

    /// Constraint names are unique per schema in practice; `schema` defaults
    /// to [`SchemaCatalog::default_schema`].
    async fn constraint_exists(
        &self,
        constraint: &Ident,
        schema: Option<&Ident>,
    ) -> Result<bool, StorageError>;

    async fn index_exists(&self, index: &Ident, schema: Option<&Ident>)
    -> Result<bool, StorageError>;
}
