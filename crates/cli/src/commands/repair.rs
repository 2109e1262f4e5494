//! `dedup` and `duplicates`.

use std::sync::Arc;

use anyhow::Result;
use iati_migrate_core::{DedupSpec, Ident, TableRef};
use iati_migrate_service::RepairService;
use iati_migrate_storage::SchemaBackend;

use super::print_json;

pub(crate) struct DedupArgs {
    pub table: String,
    pub column: String,
    pub key_column: String,
    pub created_column: String,
    pub separator: String,
    pub dry_run: bool,
}

/// Build and validate the dedup settings. Needs no database.
pub(crate) fn dedup_spec(
    table: &str,
    column: &str,
    key_column: &str,
    created_column: &str,
    separator: &str,
) -> Result<DedupSpec> {
    let spec = DedupSpec {
        table: table.parse()?,
        column: column.parse()?,
        key_column: key_column.parse()?,
        created_column: created_column.parse()?,
        separator: separator.to_owned(),
    };
    spec.validate()?;
    Ok(spec)
}

pub(crate) async fn run_dedup(backend: &Arc<SchemaBackend>, args: DedupArgs, json: bool) -> Result<()> {
    let spec = dedup_spec(
        &args.table,
        &args.column,
        &args.key_column,
        &args.created_column,
        &args.separator,
    )?;
    let service = RepairService::new(Arc::clone(backend));
    let report = service.dedup(&spec, args.dry_run).await?;
    if json {
        return print_json(&report);
    }

    for rename in &report.renames {
        println!("  {} {}: {} -> {}", spec.key_column, rename.key, rename.from, rename.to);
    }
    if args.dry_run {
        println!(
            "{} duplicate values, {} rows would be renamed (dry run)",
            report.duplicate_values,
            report.renames.len()
        );
    } else {
        println!("{} duplicate values, {} rows renamed", report.duplicate_values, report.rows_renamed);
    }
    Ok(())
}

pub(crate) async fn run_duplicates(
    backend: &Arc<SchemaBackend>,
    table: &str,
    columns: &[String],
    limit: usize,
    json: bool,
) -> Result<()> {
    let table: TableRef = table.parse()?;
    let columns = columns.iter().map(Ident::new).collect::<Result<Vec<_>, _>>()?;

    let service = RepairService::new(Arc::clone(backend));
    let groups = service.find_duplicates(&table, &columns, limit).await?;
    if json {
        let rows: Vec<_> = groups
            .iter()
            .map(|g| serde_json::json!({ "values": g.values, "count": g.count }))
            .collect();
        return print_json(&rows);
    }

    if groups.is_empty() {
        println!("no duplicates in {table}");
        return Ok(());
    }
    for group in &groups {
        println!("  {}", group.describe());
    }
    Ok(())
}
