use std::sync::Arc;

use iati_migrate_core::{
    BackfillSpec, DedupSpec, Ident, Rename, RepairPredicate, StepOutcome, TableRef,
    duplicate_groups, plan_renames,
};
use iati_migrate_storage::traits::DataStore;
use iati_migrate_storage::{DuplicateGroup, SchemaBackend, StorageError};
use serde::Serialize;

/// Result of an identifier dedup pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DedupReport {
    /// Distinct values that occurred more than once.
    pub duplicate_values: usize,
    pub renames: Vec<Rename>,
    /// Rows actually rewritten. Zero for a dry run.
    pub rows_renamed: u64,
}

impl DedupReport {
    #[must_use]
    pub fn to_outcome(&self, spec: &DedupSpec) -> StepOutcome {
        if self.rows_renamed > 0 {
            StepOutcome::applied(self.rows_renamed)
        } else {
            StepOutcome::already_applied(format!("{}.{} has no duplicate values", spec.table, spec.column))
        }
    }
}

/// Row-level repairs: conditional backfills and identifier deduplication.
pub struct RepairService {
    backend: Arc<SchemaBackend>,
}

impl RepairService {
    #[must_use]
    pub fn new(backend: Arc<SchemaBackend>) -> Self {
        Self { backend }
    }

    /// Rewrite rows still matching `spec.when`. Rows already repaired are
    /// never touched, so a second run reports zero rows.
    pub async fn backfill(&self, spec: &BackfillSpec) -> Result<StepOutcome, StorageError> {
        let rows = self.backend.backfill(spec).await?;
        if rows == 0 {
            return Ok(StepOutcome::already_applied(format!(
                "no rows in {}.{} {}",
                spec.table, spec.column, spec.when
            )));
        }

        let remaining = self.backend.count_matching(&spec.table, &spec.column, &spec.when).await?;
        if remaining > 0 {
            tracing::warn!(
                table = %spec.table,
                column = %spec.column,
                remaining,
                "rows still match after backfill (source values were empty)"
            );
        }
        tracing::info!(table = %spec.table, column = %spec.column, rows, "backfill applied");
        Ok(StepOutcome::applied(rows))
    }

    /// Make `spec.column` unique by suffixing later duplicates. With
    /// `dry_run` the renames are planned and returned but not written.
    pub async fn dedup(&self, spec: &DedupSpec, dry_run: bool) -> Result<DedupReport, StorageError> {
        spec.validate()?;
        let rows = self.backend.load_identifier_rows(spec).await?;
        let duplicate_values = duplicate_groups(&rows).len();
        let renames = plan_renames(&rows, &spec.separator);
        tracing::debug!(
            table = %spec.table,
            column = %spec.column,
            rows = rows.len(),
            duplicate_values,
            planned = renames.len(),
            "dedup planned"
        );

        if dry_run || renames.is_empty() {
            return Ok(DedupReport { duplicate_values, renames, rows_renamed: 0 });
        }

        let rows_renamed = self.backend.apply_renames(spec, &renames).await?;
        if rows_renamed < renames.len() as u64 {
            tracing::warn!(
                planned = renames.len(),
                rows_renamed,
                "some rows changed since they were read; re-run dedup"
            );
        }
        tracing::info!(table = %spec.table, column = %spec.column, rows_renamed, "dedup applied");
        Ok(DedupReport { duplicate_values, renames, rows_renamed })
    }

    pub async fn find_duplicates(
        &self,
        table: &TableRef,
        columns: &[Ident],
        limit: usize,
    ) -> Result<Vec<DuplicateGroup>, StorageError> {
        self.backend.find_duplicates(table, columns, limit).await
    }

    pub async fn count_matching(
        &self,
        table: &TableRef,
        column: &Ident,
        predicate: &RepairPredicate,
    ) -> Result<u64, StorageError> {
        self.backend.count_matching(table, column, predicate).await
    }
}
