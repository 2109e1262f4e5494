use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use iati_migrate_core::{MigrationPlan, Settings, aims_plan};
use iati_migrate_storage::SchemaBackend;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "iati-migrate")]
#[command(about = "Idempotent schema migrations and data repair for the AIMS IATI database", long_about = None)]
struct Cli {
    /// Postgres connection string (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,
    /// Schema unqualified table names resolve against (overrides IATI_MIGRATE_SCHEMA)
    #[arg(long, global = true)]
    schema: Option<String>,
    /// Do not read or write the step ledger
    #[arg(long, global = true)]
    no_ledger: bool,
    /// Name recorded in the ledger (overrides IATI_MIGRATE_APPLIED_BY)
    #[arg(long, global = true)]
    applied_by: Option<String>,
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a migration plan (the built-in AIMS plan by default)
    ///
    /// Steps already recorded in the ledger are skipped and reported as
    /// "recorded in ledger". With --no-ledger every step is checked against
    /// the catalog instead, and a step whose object exists reports
    /// "... already exists".
    Apply {
        #[arg(short, long)]
        plan: Option<PathBuf>,
        /// Apply only this step, even if the ledger records it
        #[arg(long)]
        step: Option<String>,
    },
    /// Show, without changing anything, which steps are pending
    Status {
        #[arg(short, long)]
        plan: Option<PathBuf>,
    },
    /// Validate a plan and list its steps (no database needed)
    Plan {
        #[arg(short, long)]
        plan: Option<PathBuf>,
    },
    /// Probe the catalog for one object
    Check {
        #[command(subcommand)]
        target: commands::check::CheckTarget,
    },
    /// Add a column unless it already exists
    AddColumn {
        table: String,
        column: String,
        type_decl: String,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Make an identifier column unique by suffixing later duplicates
    Dedup {
        table: String,
        column: String,
        #[arg(long, default_value = iati_migrate_core::DEFAULT_KEY_COLUMN)]
        key_column: String,
        #[arg(long, default_value = iati_migrate_core::DEFAULT_CREATED_COLUMN)]
        created_column: String,
        #[arg(long, default_value = iati_migrate_core::DEFAULT_DEDUP_SEPARATOR)]
        separator: String,
        /// Plan the renames and print them without writing
        #[arg(long)]
        dry_run: bool,
    },
    /// List value groups that occur more than once
    Duplicates {
        table: String,
        #[arg(required = true)]
        columns: Vec<String>,
        #[arg(short, long, default_value_t = iati_migrate_core::VIOLATION_SAMPLE_LIMIT)]
        limit: usize,
    },
    /// Inspect or edit the step ledger
    Ledger {
        #[command(subcommand)]
        command: commands::ledger::LedgerCommand,
    },
    /// Evaluate the record access policy (no database needed)
    Authorize {
        /// Role name, e.g. admin, partner_government, dev_partner_tier_1
        #[arg(long, conflicts_with = "permission_level")]
        role: Option<String>,
        /// Legacy profile permission level (organization, partner_government)
        #[arg(long)]
        permission_level: Option<String>,
        #[arg(long)]
        action: String,
        /// Acting user; omit for an anonymous request
        #[arg(long)]
        user: Option<String>,
        /// Owner of the record being accessed
        #[arg(long)]
        owner: Option<String>,
    },
}

/// Environment settings with command-line overrides applied.
fn resolve_settings(cli: &Cli) -> Settings {
    let mut settings = Settings::from_env();
    if let Some(url) = &cli.database_url {
        settings.database_url = Some(url.clone());
    }
    if let Some(schema) = &cli.schema {
        settings.schema.clone_from(schema);
    }
    if cli.no_ledger {
        settings.use_ledger = false;
    }
    if let Some(who) = &cli.applied_by {
        settings.applied_by.clone_from(who);
    }
    settings
}

pub(crate) fn load_plan(path: Option<&PathBuf>) -> Result<MigrationPlan> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading plan {}", path.display()))?;
            MigrationPlan::from_json(&json).with_context(|| format!("invalid plan {}", path.display()))
        },
        None => Ok(aims_plan()?),
    }
}

pub(crate) async fn connect(settings: &Settings) -> Result<Arc<SchemaBackend>> {
    let url = settings
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set (or pass --database-url)"))?;
    let backend = SchemaBackend::new_postgres(url, &settings.schema, settings.max_connections)
        .await
        .context("connecting to PostgreSQL")?;
    Ok(Arc::new(backend))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = resolve_settings(&cli);
    let json = cli.json;

    match cli.command {
        Commands::Plan { plan } => commands::plan::run_show(plan.as_ref(), json)?,
        Commands::Authorize { role, permission_level, action, user, owner } => {
            let allowed = commands::authorize::run(
                role.as_deref(),
                permission_level.as_deref(),
                &action,
                user.as_deref(),
                owner.as_deref(),
                json,
            )?;
            if !allowed {
                return Ok(ExitCode::from(2));
            }
        },
        command => {
            preflight(&command)?;
            let backend = connect(&settings).await?;
            let result = run_database_command(command, &backend, &settings, json).await;
            backend.close().await;
            result?;
        },
    }

    Ok(ExitCode::SUCCESS)
}

/// Argument checks that need no database, run before connecting.
fn preflight(command: &Commands) -> Result<()> {
    if let Commands::Dedup { table, column, key_column, created_column, separator, .. } = command {
        commands::repair::dedup_spec(table, column, key_column, created_column, separator)?;
    }
    Ok(())
}

async fn run_database_command(
    command: Commands,
    backend: &Arc<SchemaBackend>,
    settings: &Settings,
    json: bool,
) -> Result<()> {
    match command {
        Commands::Apply { plan, step } => {
            commands::plan::run_apply(backend, settings, plan.as_ref(), step.as_deref(), json).await
        },
        Commands::Status { plan } => {
            commands::plan::run_status(backend, settings, plan.as_ref(), json).await
        },
        Commands::Check { target } => commands::check::run(backend, target, json).await,
        Commands::AddColumn { table, column, type_decl, comment } => {
            commands::check::run_add_column(backend, &table, &column, &type_decl, comment.as_deref(), json)
                .await
        },
        Commands::Dedup { table, column, key_column, created_column, separator, dry_run } => {
            let args = commands::repair::DedupArgs {
                table,
                column,
                key_column,
                created_column,
                separator,
                dry_run,
            };
            commands::repair::run_dedup(backend, args, json).await
        },
        Commands::Duplicates { table, columns, limit } => {
            commands::repair::run_duplicates(backend, &table, &columns, limit, json).await
        },
        Commands::Ledger { command } => commands::ledger::run(backend, settings, command, json).await,
        Commands::Plan { .. } | Commands::Authorize { .. } => Ok(()),
    }
}
