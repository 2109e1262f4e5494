//! Integration tests for PgSchema.
//! Run with: DATABASE_URL=... cargo test -p iati-migrate-storage -- --ignored pg_

#![allow(clippy::unwrap_used, reason = "integration test code")]

use iati_migrate_core::{
    BackfillSpec, BackfillValue, CheckExpr, ColumnDef, DedupSpec, Ident, OnDelete,
    RepairPredicate, StepOutcome, TableRef, TypeDecl, plan_renames,
};
use iati_migrate_storage::traits::{DataStore, LedgerStore, SchemaCatalog, SchemaDdl};
use iati_migrate_storage::{ForeignKeyRef, IdempotentSchema, PgSchema, StorageError};
use uuid::Uuid;

/// Connect to a fresh schema so tests never see each other's objects.
async fn create_pg_schema() -> PgSchema {
    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for PgSchema integration tests");
    let schema = format!("iati_test_{}", Uuid::new_v4().simple());
    let store = PgSchema::connect(&url, &schema, 2).await.expect("Failed to connect to PostgreSQL");
    sqlx::query(&format!("CREATE SCHEMA \"{schema}\"")).execute(store.pool()).await.unwrap();
    store
        .create_table(
            &table("activities"),
            &[
                column("id", "bigserial"),
                column("iati_identifier", "varchar(150)"),
                column("title", "text"),
                column("created_at", "timestamptz default now()"),
            ],
            &[ident("id")],
        )
        .await
        .unwrap();
    store
}

async fn drop_schema(store: &PgSchema) {
    sqlx::query(&format!("DROP SCHEMA \"{}\" CASCADE", store.default_schema()))
        .execute(store.pool())
        .await
        .unwrap();
    store.close().await;
}

async fn exec(store: &PgSchema, sql: &str) {
    sqlx::query(&sql.replace("{schema}", store.default_schema()))
        .execute(store.pool())
        .await
        .unwrap();
}

fn ident(name: &str) -> Ident {
    Ident::new(name).unwrap()
}

fn table(name: &str) -> TableRef {
    name.parse().unwrap()
}

fn column(name: &str, type_decl: &str) -> ColumnDef {
    ColumnDef { name: ident(name), type_decl: TypeDecl::new(type_decl).unwrap(), comment: None }
}

#[tokio::test]
#[ignore]
async fn pg_add_column_is_idempotent() {
    let store = create_pg_schema().await;
    let (t, c, d) = (table("activities"), ident("default_finance_type"), TypeDecl::new("text").unwrap());

    let first = store.add_column_if_missing(&t, &c, &d, Some("FinanceType code")).await.unwrap();
    assert!(first.is_applied());
    let second = store.add_column_if_missing(&t, &c, &d, None).await.unwrap();
    assert!(matches!(second, StepOutcome::AlreadyApplied { .. }));
    assert!(store.column_exists(&t, &c).await.unwrap());

    drop_schema(&store).await;
}

#[tokio::test]
#[ignore]
async fn pg_duplicate_ddl_maps_to_already_exists() {
    let store = create_pg_schema().await;
    let (t, c, d) = (table("activities"), ident("title"), TypeDecl::new("text").unwrap());

    let err = store.add_column(&t, &c, &d, None).await.unwrap_err();
    assert!(err.is_already_exists(), "{err}");

    drop_schema(&store).await;
}

#[tokio::test]
#[ignore]
async fn pg_missing_table_is_reported() {
    let store = create_pg_schema().await;
    assert!(!store.column_exists(&table("budgets"), &ident("id")).await.unwrap());

    let err = store
        .add_column_if_missing(&table("budgets"), &ident("value"), &TypeDecl::new("numeric").unwrap(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::MissingObject { kind: "table", .. }), "{err}");

    drop_schema(&store).await;
}

#[tokio::test]
#[ignore]
async fn pg_check_violation_leaves_schema_unchanged() {
    let store = create_pg_schema().await;
    exec(&store, r#"INSERT INTO "{schema}".activities (title) VALUES ('ok'), (repeat('x', 400))"#).await;
    let (t, name) = (table("activities"), ident("activities_title_length"));
    let check = CheckExpr::MaxLength { column: ident("title"), max: 300 };

    let err = store.add_check_constraint_if_missing(&t, &name, &check).await.unwrap_err();
    assert!(matches!(err, StorageError::PreconditionViolated { violating_rows: Some(1), .. }), "{err}");
    assert!(!store.constraint_exists(&name, None).await.unwrap());

    let spec = BackfillSpec {
        table: t.clone(),
        column: ident("title"),
        value: BackfillValue::Truncated { max: 300 },
        when: RepairPredicate::LongerThan { max: 300 },
    };
    assert_eq!(store.backfill(&spec).await.unwrap(), 1);
    assert!(store.add_check_constraint_if_missing(&t, &name, &check).await.unwrap().is_applied());
    assert!(store.constraint_exists(&name, None).await.unwrap());

    drop_schema(&store).await;
}

#[tokio::test]
#[ignore]
async fn pg_dedup_then_unique_constraint() {
    let store = create_pg_schema().await;
    exec(
        &store,
        r#"INSERT INTO "{schema}".activities (iati_identifier, created_at) VALUES
           ('A', '2024-03-01'), ('A', '2024-01-01'), ('A', '2024-02-01'), (NULL, '2024-01-01')"#,
    )
    .await;
    let (t, name, cols) = (table("activities"), ident("activities_iati_identifier_key"), [ident("iati_identifier")]);

    let err = store.add_unique_constraint_if_missing(&t, &name, &cols).await.unwrap_err();
    assert!(matches!(err, StorageError::PreconditionViolated { violating_rows: Some(3), .. }), "{err}");

    let spec = DedupSpec::new(t.clone(), ident("iati_identifier"));
    let renames = plan_renames(&store.load_identifier_rows(&spec).await.unwrap(), "-");
    assert_eq!(store.apply_renames(&spec, &renames).await.unwrap(), 2);

    let first: String = sqlx::query_scalar(&format!(
        r#"SELECT iati_identifier FROM "{}".activities WHERE created_at = '2024-01-01'::timestamptz AND iati_identifier IS NOT NULL"#,
        store.default_schema()
    ))
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert_eq!(first, "A");

    assert!(store.add_unique_constraint_if_missing(&t, &name, &cols).await.unwrap().is_applied());
    assert!(!store.add_unique_constraint_if_missing(&t, &name, &cols).await.unwrap().is_applied());

    drop_schema(&store).await;
}

#[tokio::test]
#[ignore]
async fn pg_foreign_key_and_index() {
    let store = create_pg_schema().await;
    store
        .create_table(
            &table("transactions"),
            &[column("id", "bigserial"), column("activity_id", "bigint")],
            &[ident("id")],
        )
        .await
        .unwrap();
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
    assert!(store.add_foreign_key_if_missing(fk).await.unwrap().is_applied());
    assert!(!store.add_foreign_key_if_missing(fk).await.unwrap().is_applied());

    let index = ident("transactions_activity_id_idx");
    assert!(store.create_index_if_missing(&t, &index, &[col.clone()], false).await.unwrap().is_applied());
    assert!(store.index_exists(&index, None).await.unwrap());

    drop_schema(&store).await;
}

#[tokio::test]
#[ignore]
async fn pg_ledger_round_trip() {
    let store = create_pg_schema().await;
    assert!(store.ledger_entries().await.unwrap().is_empty());

    store.ensure_ledger().await.unwrap();
    store.record_step("add-col", "abc", 0, "ops").await.unwrap();
    store.record_step("add-col", "def", 3, "ops").await.unwrap();
    let entries = store.ledger_entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].checksum, "def");
    assert_eq!(entries[0].rows_affected, 3);

    assert!(store.forget_step("add-col").await.unwrap());
    assert!(store.ledger_entries().await.unwrap().is_empty());

    drop_schema(&store).await;
}

#[tokio::test]
#[ignore]
async fn pg_unique_constraint_over_a_plain_index_name_is_a_conflict() {
    let store = create_pg_schema().await;
    exec(&store, r#"CREATE INDEX activities_title_key ON "{schema}".activities (title)"#).await;
    let (t, name) = (table("activities"), ident("activities_title_key"));

    let err = store.add_unique_constraint_if_missing(&t, &name, &[ident("title")]).await.unwrap_err();
    assert!(matches!(err, StorageError::NameConflict { .. }), "{err}");
    assert!(!store.constraint_exists(&name, None).await.unwrap());

    drop_schema(&store).await;
}
