//! Catalog probes and the one-off `add-column`.

use std::sync::Arc;

use anyhow::Result;
use clap::Subcommand;
use iati_migrate_core::{Ident, TableRef, TypeDecl};
use iati_migrate_storage::traits::SchemaCatalog;
use iati_migrate_storage::{IdempotentSchema, SchemaBackend};
use serde_json::json;

use super::print_json;

#[derive(Subcommand)]
pub(crate) enum CheckTarget {
    Table {
        table: String,
    },
    Column {
        table: String,
        column: String,
    },
    Constraint {
        name: String,
        #[arg(long)]
        schema: Option<String>,
    },
    Index {
        name: String,
        #[arg(long)]
        schema: Option<String>,
    },
}

pub(crate) async fn run(backend: &Arc<SchemaBackend>, target: CheckTarget, json: bool) -> Result<()> {
    let (what, exists) = match target {
        CheckTarget::Table { table } => {
            let table: TableRef = table.parse()?;
            (format!("table {table}"), backend.table_exists(&table).await?)
        },
        CheckTarget::Column { table, column } => {
            let (table, column): (TableRef, Ident) = (table.parse()?, column.parse()?);
            (format!("column {table}.{column}"), backend.column_exists(&table, &column).await?)
        },
        CheckTarget::Constraint { name, schema } => {
            let name: Ident = name.parse()?;
            let schema = schema.map(Ident::new).transpose()?;
            let exists = backend.constraint_exists(&name, schema.as_ref()).await?;
            (format!("constraint {name}"), exists)
        },
        CheckTarget::Index { name, schema } => {
            let name: Ident = name.parse()?;
            let schema = schema.map(Ident::new).transpose()?;
            (format!("index {name}"), backend.index_exists(&name, schema.as_ref()).await?)
        },
    };

    if json {
        return print_json(&json!({ "object": what, "exists": exists }));
    }
    println!("{what}: {}", if exists { "exists" } else { "missing" });
    Ok(())
}

pub(crate) async fn run_add_column(
    backend: &Arc<SchemaBackend>,
    table: &str,
    column: &str,
    type_decl: &str,
    comment: Option<&str>,
    json: bool,
) -> Result<()> {
    let table: TableRef = table.parse()?;
    let column: Ident = column.parse()?;
    let type_decl = TypeDecl::new(type_decl)?;

    let outcome = backend.add_column_if_missing(&table, &column, &type_decl, comment).await?;
    if json {
        return print_json(&outcome);
    }
    println!("add column {table}.{column} {type_decl}: {outcome}");
    Ok(())
}
