//! `apply`, `status` and `plan`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use iati_migrate_core::{Settings, StepStatus};
use iati_migrate_service::MigrationService;
use iati_migrate_storage::SchemaBackend;
use serde_json::json;

use super::print_json;
use crate::load_plan;

pub(crate) fn run_show(path: Option<&PathBuf>, json: bool) -> Result<()> {
    let plan = load_plan(path)?;
    if json {
        return print_json(&plan);
    }
    println!("plan {}: {} steps", plan.name.as_deref().unwrap_or("(unnamed)"), plan.steps.len());
    for step in &plan.steps {
        println!("  [{}] {}", step.id, step.action);
        if let Some(description) = &step.description {
            println!("      {description}");
        }
    }
    Ok(())
}

pub(crate) async fn run_apply(
    backend: &Arc<SchemaBackend>,
    settings: &Settings,
    path: Option<&PathBuf>,
    step: Option<&str>,
    json: bool,
) -> Result<()> {
    let plan = load_plan(path)?;
    let service = MigrationService::from_settings(Arc::clone(backend), settings);

    if let Some(step_id) = step {
        let outcome = service.apply_one(&plan, step_id).await?;
        if json {
            return print_json(&json!({ "step_id": step_id, "outcome": outcome }));
        }
        println!("[{step_id}] {outcome}");
        return Ok(());
    }

    if !json {
        let name = plan.name.as_deref().unwrap_or("(unnamed)");
        println!("Applying plan {name} ({} steps)...", plan.steps.len());
    }
    let report = service.apply_plan(&plan).await?;
    if json {
        return print_json(&report);
    }
    println!("{report}");
    Ok(())
}

pub(crate) async fn run_status(
    backend: &Arc<SchemaBackend>,
    settings: &Settings,
    path: Option<&PathBuf>,
    json: bool,
) -> Result<()> {
    let plan = load_plan(path)?;
    let service = MigrationService::from_settings(Arc::clone(backend), settings);
    let states = service.status(&plan).await?;
    if json {
        return print_json(&states);
    }

    let pending = states.iter().filter(|s| matches!(s.status, StepStatus::Pending { .. })).count();
    for state in &states {
        println!("  [{}] {}: {}", state.step_id, state.summary, state.status);
    }
    println!("{pending} of {} steps pending", states.len());
    Ok(())
}
