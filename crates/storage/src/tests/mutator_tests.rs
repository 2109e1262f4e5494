//! Idempotent mutator behavior against the in-memory backend.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use iati_migrate_core::{
    BackfillSpec, BackfillValue, CheckExpr, ColumnDef, DedupSpec, Ident, IdentifierRow, OnDelete,
    Rename, RepairPredicate, StepOutcome, TableRef, TypeDecl,
};
use serde_json::json;

use super::{column, create_test_schema, decl, ident, insert_activity, table};
use crate::traits::{
    DataStore, DuplicateGroup, ForeignKeyRef, SchemaCatalog, SchemaDdl,
};
use crate::{IdempotentSchema, MemorySchema, StorageError};

#[tokio::test]
async fn add_column_twice_is_a_no_op_the_second_time() {
    let store = create_test_schema().await;
    let (t, c) = (table("activities"), ident("default_finance_type"));

    let first = store
        .add_column_if_missing(&t, &c, &decl("text"), Some("IATI FinanceType code"))
        .await
        .unwrap();
    assert_eq!(first, StepOutcome::Applied { rows_affected: 0 });

    let second = store.add_column_if_missing(&t, &c, &decl("text"), None).await.unwrap();
    assert_eq!(
        second,
        StepOutcome::AlreadyApplied {
            reason: "column activities.default_finance_type already exists".to_owned()
        }
    );

    assert!(store.column_exists(&t, &c).await.unwrap());
    assert_eq!(store.column_type("activities", "default_finance_type").await.unwrap(), "text");
    assert_eq!(
        store.column_comment("activities", "default_finance_type").await.unwrap().as_deref(),
        Some("IATI FinanceType code")
    );
}

#[tokio::test]
async fn probes_answer_false_for_missing_tables() {
    let store = create_test_schema().await;
    let missing = table("budgets");

    assert!(!store.table_exists(&missing).await.unwrap());
    assert!(!store.column_exists(&missing, &ident("id")).await.unwrap());
    assert!(!store.constraint_exists(&ident("budgets_pkey"), None).await.unwrap());
    assert!(!store.index_exists(&ident("budgets_pkey"), None).await.unwrap());
    assert!(!store.table_exists(&table("other.activities")).await.unwrap());
}

#[tokio::test]
async fn add_column_to_missing_table_fails_without_side_effects() {
    let store = create_test_schema().await;
    let err = store
        .add_column_if_missing(&table("budgets"), &ident("value"), &decl("numeric"), None)
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::MissingObject { kind: "table", .. }), "{err}");
    assert!(!store.table_exists(&table("budgets")).await.unwrap());
}

#[tokio::test]
async fn not_null_column_without_default_is_refused_on_populated_table() {
    let store = create_test_schema().await;
    insert_activity(&store, Some("XM-DAC-1"), "2024-01-01T00:00:00Z").await;

    let err = store
        .add_column_if_missing(&table("activities"), &ident("status"), &decl("text not null"), None)
        .await
        .unwrap_err();

    assert!(
        matches!(err, StorageError::PreconditionViolated { violating_rows: Some(1), .. }),
        "{err}"
    );
    assert!(!store.column_exists(&table("activities"), &ident("status")).await.unwrap());
}

#[tokio::test]
async fn not_null_column_with_default_fills_existing_rows() {
    let store = create_test_schema().await;
    store
        .insert_row("transactions", json!({ "currency": "USD", "value": 10 }))
        .await
        .unwrap();

    let outcome = store
        .add_column_if_missing(
            &table("transactions"),
            &ident("usd_convertible"),
            &decl("boolean not null default true"),
            None,
        )
        .await
        .unwrap();

    assert!(outcome.is_applied());
    let rows = store.rows("transactions").await.unwrap();
    assert_eq!(rows[0]["usd_convertible"], json!(true));
}

#[tokio::test]
async fn failed_check_reports_count_and_leaves_schema_unchanged() {
    let store = create_test_schema().await;
    for currency in ["USD", "EURO", "POUNDS", "XOF"] {
        store
            .insert_row("transactions", json!({ "currency": currency, "value": 1 }))
            .await
            .unwrap();
    }
    let check = CheckExpr::MaxLength { column: ident("currency"), max: 3 };
    let name = ident("transactions_currency_length");

    let err = store
        .add_check_constraint_if_missing(&table("transactions"), &name, &check)
        .await
        .unwrap_err();
    assert!(
        matches!(err, StorageError::PreconditionViolated { violating_rows: Some(2), .. }),
        "{err}"
    );
    assert!(!store.constraint_exists(&name, None).await.unwrap());

    let repaired = store
        .backfill(&BackfillSpec {
            table: table("transactions"),
            column: ident("currency"),
            value: BackfillValue::Truncated { max: 3 },
            when: RepairPredicate::LongerThan { max: 3 },
        })
        .await
        .unwrap();
    assert_eq!(repaired, 2);

    let outcome =
        store.add_check_constraint_if_missing(&table("transactions"), &name, &check).await.unwrap();
    assert!(outcome.is_applied());
    assert!(store.constraint_exists(&name, None).await.unwrap());

    let err = store
        .insert_row("transactions", json!({ "currency": "DOLLARS" }))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::PreconditionViolated { .. }), "{err}");
}

#[tokio::test]
async fn unique_constraint_is_blocked_by_duplicates_and_names_them() {
    let store = create_test_schema().await;
    insert_activity(&store, Some("XM-DAC-1"), "2024-01-01T00:00:00Z").await;
    insert_activity(&store, Some("XM-DAC-1"), "2024-02-01T00:00:00Z").await;
    insert_activity(&store, Some("XM-DAC-2"), "2024-02-01T00:00:00Z").await;
    insert_activity(&store, None, "2024-03-01T00:00:00Z").await;
    insert_activity(&store, None, "2024-03-01T00:00:00Z").await;
    let (t, name, cols) =
        (table("activities"), ident("activities_iati_identifier_key"), [ident("iati_identifier")]);

    let err = store.add_unique_constraint_if_missing(&t, &name, &cols).await.unwrap_err();
    match err {
        StorageError::PreconditionViolated { violating_rows, sample, .. } => {
            assert_eq!(violating_rows, Some(2));
            assert_eq!(sample, vec![r#"("XM-DAC-1") x2"#.to_owned()]);
        },
        other => panic!("unexpected error {other}"),
    }
    assert!(!store.constraint_exists(&name, None).await.unwrap());
}

#[tokio::test]
async fn unique_constraint_applies_once_and_then_enforces() {
    let store = create_test_schema().await;
    insert_activity(&store, Some("XM-DAC-1"), "2024-01-01T00:00:00Z").await;
    let (t, name, cols) =
        (table("activities"), ident("activities_iati_identifier_key"), [ident("iati_identifier")]);

    assert!(store.add_unique_constraint_if_missing(&t, &name, &cols).await.unwrap().is_applied());
    assert!(!store.add_unique_constraint_if_missing(&t, &name, &cols).await.unwrap().is_applied());

    let err = store
        .insert_row("activities", json!({ "iati_identifier": "XM-DAC-1" }))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::PreconditionViolated { .. }), "{err}");
}

#[tokio::test]
async fn foreign_key_is_blocked_by_orphans() {
    let store = create_test_schema().await;
    insert_activity(&store, Some("XM-DAC-1"), "2024-01-01T00:00:00Z").await;
    store.insert_row("transactions", json!({ "activity_id": 1 })).await.unwrap();
    store.insert_row("transactions", json!({ "activity_id": 99 })).await.unwrap();
    store.insert_row("transactions", json!({ "activity_id": null })).await.unwrap();

    let (t, c, col, tt, tc) = (
        table("transactions"),
        ident("transactions_activity_id_fkey"),
        ident("activity_id"),
        table("activities"),
        ident("id"),
    );
    let fk = ForeignKeyRef {
        table: &t,
        constraint: &c,
        column: &col,
        target_table: &tt,
        target_column: &tc,
        on_delete: OnDelete::Cascade,
    };

    let err = store.add_foreign_key_if_missing(fk).await.unwrap_err();
    assert!(
        matches!(err, StorageError::PreconditionViolated { violating_rows: Some(1), .. }),
        "{err}"
    );

    store
        .backfill(&BackfillSpec {
            table: t.clone(),
            column: col.clone(),
            value: BackfillValue::Null,
            when: RepairPredicate::Equals { value: "99".to_owned() },
        })
        .await
        .unwrap();
    assert!(store.add_foreign_key_if_missing(fk).await.unwrap().is_applied());
    assert!(!store.add_foreign_key_if_missing(fk).await.unwrap().is_applied());
}

#[tokio::test]
async fn create_table_and_index_are_idempotent() {
    let store = create_test_schema().await;
    let logs = table("import_logs");
    let columns = [
        column("id", "bigserial"),
        ColumnDef {
            name: ident("entity_type"),
            type_decl: decl("varchar(20) not null"),
            comment: Some("activities, organizations or users".to_owned()),
        },
        column("import_date", "timestamptz not null default now()"),
    ];

    assert!(store.create_table_if_missing(&logs, &columns, &[ident("id")]).await.unwrap().is_applied());
    assert!(!store.create_table_if_missing(&logs, &columns, &[ident("id")]).await.unwrap().is_applied());
    assert!(store.constraint_exists(&ident("import_logs_pkey"), None).await.unwrap());

    let index = ident("import_logs_import_date_idx");
    let cols = [ident("import_date")];
    assert!(store.create_index_if_missing(&logs, &index, &cols, false).await.unwrap().is_applied());
    assert!(!store.create_index_if_missing(&logs, &index, &cols, false).await.unwrap().is_applied());

    store.insert_row("import_logs", json!({ "entity_type": "activities" })).await.unwrap();
    let rows = store.rows("import_logs").await.unwrap();
    assert_eq!(rows[0]["id"], json!(1));
    assert!(rows[0]["import_date"].is_string());
}

#[tokio::test]
async fn raw_checks_are_not_evaluated_in_memory() {
    let store = create_test_schema().await;
    let err = store
        .add_check_constraint_if_missing(
            &table("transactions"),
            &ident("value_positive"),
            &CheckExpr::Raw { sql: "value > 0".to_owned() },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Unsupported(_)), "{err}");
}

/// Catalog whose first column, constraint or index probe misses, as if
/// another run created the object between the check and the DDL. Later
/// probes see the real state.
struct StaleCatalog {
    store: MemorySchema,
    stale: AtomicBool,
}

impl StaleCatalog {
    fn new(store: &MemorySchema) -> Self {
        Self { store: store.clone(), stale: AtomicBool::new(true) }
    }

    fn missed(&self) -> bool {
        self.stale.swap(false, Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemaCatalog for StaleCatalog {
    fn default_schema(&self) -> &str {
        self.store.default_schema()
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool, StorageError> {
        self.store.table_exists(table).await
    }

    async fn column_exists(&self, table: &TableRef, column: &Ident) -> Result<bool, StorageError> {
        if self.missed() {
            return Ok(false);
        }
        self.store.column_exists(table, column).await
    }

    async fn constraint_exists(
        &self,
        constraint: &Ident,
        schema: Option<&Ident>,
    ) -> Result<bool, StorageError> {
        if self.missed() {
            return Ok(false);
        }
        self.store.constraint_exists(constraint, schema).await
    }

    async fn index_exists(&self, index: &Ident, schema: Option<&Ident>) -> Result<bool, StorageError> {
        if self.missed() {
            return Ok(false);
        }
        self.store.index_exists(index, schema).await
    }
}

#[async_trait]
impl SchemaDdl for StaleCatalog {
    async fn add_column(
        &self,
        table: &TableRef,
        column: &Ident,
        type_decl: &TypeDecl,
        comment: Option<&str>,
    ) -> Result<(), StorageError> {
        self.store.add_column(table, column, type_decl, comment).await
    }

    async fn add_unique_constraint(
        &self,
        table: &TableRef,
        constraint: &Ident,
        columns: &[Ident],
    ) -> Result<(), StorageError> {
        self.store.add_unique_constraint(table, constraint, columns).await
    }

    async fn add_foreign_key(&self, fk: ForeignKeyRef<'_>) -> Result<(), StorageError> {
        self.store.add_foreign_key(fk).await
    }

    async fn add_check_constraint(
        &self,
        table: &TableRef,
        constraint: &Ident,
        check: &CheckExpr,
    ) -> Result<(), StorageError> {
        self.store.add_check_constraint(table, constraint, check).await
    }

    async fn create_index(
        &self,
        table: &TableRef,
        index: &Ident,
        columns: &[Ident],
        unique: bool,
    ) -> Result<(), StorageError> {
        self.store.create_index(table, index, columns, unique).await
    }

    async fn create_table(
        &self,
        table: &TableRef,
        columns: &[ColumnDef],
        primary_key: &[Ident],
    ) -> Result<(), StorageError> {
        self.store.create_table(table, columns, primary_key).await
    }
}

#[async_trait]
impl DataStore for StaleCatalog {
    async fn count_matching(
        &self,
        table: &TableRef,
        column: &Ident,
        predicate: &RepairPredicate,
    ) -> Result<u64, StorageError> {
        self.store.count_matching(table, column, predicate).await
    }

    async fn count_check_violations(
        &self,
        table: &TableRef,
        check: &CheckExpr,
    ) -> Result<u64, StorageError> {
        self.store.count_check_violations(table, check).await
    }

    async fn count_orphans(&self, fk: ForeignKeyRef<'_>) -> Result<u64, StorageError> {
        self.store.count_orphans(fk).await
    }

    async fn find_duplicates(
        &self,
        table: &TableRef,
        columns: &[Ident],
        limit: usize,
    ) -> Result<Vec<DuplicateGroup>, StorageError> {
        self.store.find_duplicates(table, columns, limit).await
    }

    async fn backfill(&self, spec: &BackfillSpec) -> Result<u64, StorageError> {
        self.store.backfill(spec).await
    }

    async fn load_identifier_rows(
        &self,
        spec: &DedupSpec,
    ) -> Result<Vec<IdentifierRow>, StorageError> {
        self.store.load_identifier_rows(spec).await
    }

    async fn apply_renames(
        &self,
        spec: &DedupSpec,
        renames: &[Rename],
    ) -> Result<u64, StorageError> {
        self.store.apply_renames(spec, renames).await
    }
}

#[tokio::test]
async fn losing_the_creation_race_counts_as_already_applied() {
    let store = create_test_schema().await;
    let (t, c) = (table("activities"), ident("default_finance_type"));

    store.add_column_if_missing(&t, &c, &decl("text"), None).await.unwrap();
    let outcome =
        StaleCatalog::new(&store).add_column_if_missing(&t, &c, &decl("text"), None).await.unwrap();
    assert_eq!(
        outcome,
        StepOutcome::AlreadyApplied {
            reason: "column activities.default_finance_type already exists".to_owned()
        }
    );

    let index = ident("activities_created_at_idx");
    store.create_index_if_missing(&t, &index, &[ident("created_at")], false).await.unwrap();
    let outcome = StaleCatalog::new(&store)
        .create_index_if_missing(&t, &index, &[ident("created_at")], false)
        .await
        .unwrap();
    assert!(!outcome.is_applied());
}

#[tokio::test]
async fn unique_constraint_named_like_a_plain_index_is_a_conflict() {
    let store = create_test_schema().await;
    let (t, name) = (table("activities"), ident("activities_iati_identifier_key"));
    store.create_index_if_missing(&t, &name, &[ident("title")], false).await.unwrap();

    let err = store
        .add_unique_constraint_if_missing(&t, &name, &[ident("iati_identifier")])
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NameConflict { .. }), "{err}");
    assert!(err.to_string().contains("constraint activities_iati_identifier_key"), "{err}");
    assert!(!store.constraint_exists(&name, None).await.unwrap());
}

#[tokio::test]
async fn table_named_like_an_index_is_a_conflict() {
    let store = create_test_schema().await;
    store
        .create_index_if_missing(&table("activities"), &ident("import_logs"), &[ident("title")], false)
        .await
        .unwrap();

    let err = store
        .create_table_if_missing(&table("import_logs"), &[column("id", "bigserial")], &[ident("id")])
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NameConflict { .. }), "{err}");
    assert!(!store.table_exists(&table("import_logs")).await.unwrap());
}

#[tokio::test]
async fn violating_row_count_covers_every_duplicate_group() {
    let store = create_test_schema().await;
    for n in 0..21 {
        let identifier = format!("XM-DAC-{n}");
        insert_activity(&store, Some(&identifier), "2024-01-01T00:00:00Z").await;
        insert_activity(&store, Some(&identifier), "2024-02-01T00:00:00Z").await;
    }
    let (t, cols) = (table("activities"), [ident("iati_identifier")]);

    let err = store
        .add_unique_constraint_if_missing(&t, &ident("activities_iati_identifier_key"), &cols)
        .await
        .unwrap_err();
    match err {
        StorageError::PreconditionViolated { violating_rows, sample, .. } => {
            assert_eq!(violating_rows, Some(42));
            assert_eq!(sample.len(), 20);
        },
        other => panic!("unexpected error {other}"),
    }

    let err = store
        .create_index_if_missing(&t, &ident("activities_iati_identifier_idx"), &cols, true)
        .await
        .unwrap_err();
    assert!(
        matches!(err, StorageError::PreconditionViolated { violating_rows: Some(42), .. }),
        "{err}"
    );
    assert_eq!(store.count_duplicate_rows(&t, &cols).await.unwrap(), 42);
}

#[tokio::test]
async fn concurrent_add_column_applies_exactly_once() {
    let store = create_test_schema().await;
    let (t, c) = (table("activities"), ident("default_finance_type"));

    let runs = (0..8).map(|_| {
        let (store, t, c) = (store.clone(), t.clone(), c.clone());
        tokio::spawn(async move { store.add_column_if_missing(&t, &c, &decl("text"), None).await })
    });
    let mut applied = 0;
    for run in runs.collect::<Vec<_>>() {
        if run.await.unwrap().unwrap().is_applied() {
            applied += 1;
        }
    }
    assert_eq!(applied, 1);
}
