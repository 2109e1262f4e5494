use crate::traits::LedgerStore;
use crate::MemorySchema;

#[tokio::test]
async fn entries_are_empty_before_the_ledger_exists() {
    let store = MemorySchema::default();
    assert!(store.ledger_entries().await.unwrap().is_empty());
    assert!(!store.forget_step("anything").await.unwrap());
}

#[tokio::test]
async fn record_step_upserts() {
    let store = MemorySchema::default();
    store.ensure_ledger().await.unwrap();
    store.ensure_ledger().await.unwrap();

    store.record_step("add-col", "abc", 0, "ops").await.unwrap();
    store.record_step("backfill", "def", 12, "ops").await.unwrap();
    store.record_step("add-col", "xyz", 0, "deploy").await.unwrap();

    let entries = store.ledger_entries().await.unwrap();
    assert_eq!(entries.len(), 2);
    let add_col = entries.iter().find(|e| e.step_id == "add-col").unwrap();
    assert_eq!(add_col.checksum, "xyz");
    assert_eq!(add_col.applied_by.as_deref(), Some("deploy"));
    assert_eq!(entries.iter().find(|e| e.step_id == "backfill").unwrap().rows_affected, 12);
}

#[tokio::test]
async fn forget_step_reports_whether_it_existed() {
    let store = MemorySchema::default();
    store.ensure_ledger().await.unwrap();
    store.record_step("add-col", "abc", 0, "ops").await.unwrap();

    assert!(store.forget_step("add-col").await.unwrap());
    assert!(!store.forget_step("add-col").await.unwrap());
    assert!(store.ledger_entries().await.unwrap().is_empty());
}
