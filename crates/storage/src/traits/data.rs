use async_trait::async_trait;
use iati_migrate_core::{
    BackfillSpec, CheckExpr, DedupSpec, Ident, IdentifierRow, Rename, RepairPredicate, TableRef,
};
use serde_json::json;

use super::ForeignKeyRef;
use crate::error::StorageError;

/// A set of column values shared by more than one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub values: Vec<Option<String>>,
    pub count: u64,
}

impl DuplicateGroup {
    /// `(a, b) x3` style rendering for diagnostics.
    #[must_use]
    pub fn describe(&self) -> String {
        let values: Vec<String> = self
            .values
            .iter()
            .map(|v| v.as_ref().map_or_else(|| "NULL".to_owned(), |s| json!(s).to_string()))
            .collect();
        format!("({}) x{}", values.join(", "), self.count)
    }
}

/// Row-level diagnostics and repairs.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Rows whose `column` matches `predicate`.
    async fn count_matching(
        &self,
        table: &TableRef,
        column: &Ident,
        predicate: &RepairPredicate,
    ) -> Result<u64, StorageError>;

    /// Rows that would make `check` fail. NULL results pass, as in Postgres.
    async fn count_check_violations(
        &self,
        table: &TableRef,
        check: &CheckExpr,
    ) -> Result<u64, StorageError>;

    /// Non-null `fk.column` values with no matching target row.
    async fn count_orphans(&self, fk: ForeignKeyRef<'_>) -> Result<u64, StorageError>;

    /// Value combinations (all columns non-null) occurring more than once,
    /// most frequent first, at most `limit` groups.
    async fn find_duplicates(
        &self,
        table: &TableRef,
        columns: &[Ident],
        limit: usize,
    ) -> Result<Vec<DuplicateGroup>, StorageError>;

    /// Total rows across all duplicate groups, with no group limit.
    async fn count_duplicate_rows(
        &self,
        table: &TableRef,
        columns: &[Ident],
    ) -> Result<u64, StorageError> {
        let groups = self.find_duplicates(table, columns, usize::MAX).await?;
        Ok(groups.iter().map(|g| g.count).sum())
    }

    /// Write `spec.value` into rows still matching `spec.when`. Returns rows updated.
    async fn backfill(&self, spec: &BackfillSpec) -> Result<u64, StorageError>;

    /// Every row with a non-null identifier, for dedup planning.
    async fn load_identifier_rows(&self, spec: &DedupSpec)
    -> Result<Vec<IdentifierRow>, StorageError>;

    /// Apply planned renames atomically. A rename only touches a row that
    /// still carries its old value. Returns rows updated.
    async fn apply_renames(&self, spec: &DedupSpec, renames: &[Rename])
    -> Result<u64, StorageError>;
}
