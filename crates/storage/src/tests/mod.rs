//! Test utilities and module declarations for storage tests.

use iati_migrate_core::{ColumnDef, Ident, TableRef, TypeDecl};
use serde_json::json;

use crate::MemorySchema;
use crate::traits::SchemaDdl;

pub fn ident(name: &str) -> Ident {
    Ident::new(name).unwrap()
}

pub fn table(name: &str) -> TableRef {
    name.parse().unwrap()
}

pub fn decl(type_decl: &str) -> TypeDecl {
    TypeDecl::new(type_decl).unwrap()
}

/// `activities` with `id`, `iati_identifier`, `title`, `created_at`, and
/// a `transactions` table with no constraints beyond its key.
pub async fn create_test_schema() -> MemorySchema {
    let store = MemorySchema::default();
    store
        .create_table(
            &table("activities"),
            &[
                column("id", "bigserial"),
                column("iati_identifier", "varchar(150)"),
                column("title", "text"),
                column("created_at", "timestamptz"),
            ],
            &[ident("id")],
        )
        .await
        .unwrap();
    store
        .create_table(
            &table("transactions"),
            &[
                column("id", "bigserial"),
                column("activity_id", "bigint"),
                column("currency", "varchar(3)"),
                column("value", "numeric(20,2)"),
            ],
            &[ident("id")],
        )
        .await
        .unwrap();
    store
}

pub fn column(name: &str, type_decl: &str) -> ColumnDef {
    ColumnDef { name: ident(name), type_decl: decl(type_decl), comment: None }
}

pub async fn insert_activity(store: &MemorySchema, identifier: Option<&str>, created_at: &str) {
    store
        .insert_row(
            "activities",
            json!({ "iati_identifier": identifier, "title": "Water supply", "created_at": created_at }),
        )
        .await
        .unwrap();
}

mod ledger_tests;
mod mutator_tests;
