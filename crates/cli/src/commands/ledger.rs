use std::sync::Arc;

use anyhow::Result;
use clap::Subcommand;
use iati_migrate_core::Settings;
use iati_migrate_service::MigrationService;
use iati_migrate_storage::SchemaBackend;

use super::print_json;

#[derive(Subcommand)]
pub(crate) enum LedgerCommand {
    /// List recorded steps
    List,
    /// Remove a step's record so the next apply runs it again
    Forget { step_id: String },
}

pub(crate) async fn run(
    backend: &Arc<SchemaBackend>,
    settings: &Settings,
    command: LedgerCommand,
    json: bool,
) -> Result<()> {
    let service = MigrationService::from_settings(Arc::clone(backend), settings);
    match command {
        LedgerCommand::List => {
            let entries = service.ledger_entries().await?;
            if json {
                return print_json(&entries);
            }
            if entries.is_empty() {
                println!("ledger is empty");
            }
            for entry in &entries {
                println!(
                    "  {} {} by {} ({} rows) checksum {}",
                    entry.applied_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.step_id,
                    entry.applied_by.as_deref().unwrap_or("unknown"),
                    entry.rows_affected,
                    entry.checksum
                );
            }
        },
        LedgerCommand::Forget { step_id } => {
            if service.forget_step(&step_id).await? {
                println!("forgot {step_id}");
            } else {
                println!("{step_id} is not in the ledger");
            }
        },
    }
    Ok(())
}
