use async_trait::async_trait;
use iati_migrate_core::LedgerEntry;

use crate::error::StorageError;

/// Record of applied steps.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create the ledger table if it does not exist yet.
    async fn ensure_ledger(&self) -> Result<(), StorageError>;

    /// All entries, oldest first. Empty when the ledger table does not exist.
    async fn ledger_entries(&self) -> Result<Vec<LedgerEntry>, StorageError>;

    /// Insert or refresh the entry for `step_id`.
    async fn record_step(
        &self,
        step_id: &str,
        checksum: &str,
        rows_affected: u64,
        applied_by: &str,
    ) -> Result<(), StorageError>;

    /// Remove the entry for `step_id`. Returns whether one existed.
    async fn forget_step(&self, step_id: &str) -> Result<bool, StorageError>;
}
