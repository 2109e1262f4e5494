//! Plan runner.
//!
//! Steps run strictly in plan order. A step is skipped when the ledger
//! already records it with the same checksum; otherwise its effect runs
//! through the idempotent mutator, its postcondition is verified and the
//! ledger is updated. The first failure stops the run.

mod probe;

use std::sync::Arc;

use iati_migrate_core::{
    LedgerEntry, LedgerState, MigrationPlan, MigrationStep, RunReport, Settings, StepAction,
    StepOutcome, StepStatus, reconcile, step_checksum,
};
use iati_migrate_storage::traits::LedgerStore;
use iati_migrate_storage::{ForeignKeyRef, IdempotentSchema, SchemaBackend, StorageError};
use serde::Serialize;

use crate::{RepairService, ServiceError};

/// One row of `status` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepState {
    pub step_id: String,
    pub summary: String,
    #[serde(flatten)]
    pub status: StepStatus,
}

pub struct MigrationService {
    backend: Arc<SchemaBackend>,
    repair: RepairService,
    use_ledger: bool,
    applied_by: String,
}

impl MigrationService {
    #[must_use]
    pub fn new(backend: Arc<SchemaBackend>) -> Self {
        Self {
            repair: RepairService::new(Arc::clone(&backend)),
            backend,
            use_ledger: true,
            applied_by: "unknown".to_owned(),
        }
    }

    #[must_use]
    pub fn from_settings(backend: Arc<SchemaBackend>, settings: &Settings) -> Self {
        Self::new(backend).with_ledger(settings.use_ledger).applied_by(&settings.applied_by)
    }

    #[must_use]
    pub fn with_ledger(mut self, use_ledger: bool) -> Self {
        self.use_ledger = use_ledger;
        self
    }

    #[must_use]
    pub fn applied_by(mut self, who: &str) -> Self {
        who.clone_into(&mut self.applied_by);
        self
    }

    /// Apply every step of `plan` in order.
    ///
    /// Ledger drift on any step is reported before anything runs. Otherwise
    /// steps that fail leave earlier steps applied (and recorded).
    pub async fn apply_plan(&self, plan: &MigrationPlan) -> Result<RunReport, ServiceError> {
        plan.validate()?;

        let states = if self.use_ledger {
            self.backend.ensure_ledger().await?;
            let entries = self.backend.ledger_entries().await?;
            let states = reconcile(plan, &entries)?;
            if let Some((step, LedgerState::Drifted { recorded, current })) =
                states.iter().find(|(_, state)| matches!(state, LedgerState::Drifted { .. }))
            {
                tracing::warn!(step = %step.id, "step definition drifted from ledger");
                return Err(ServiceError::LedgerDrift {
                    step_id: step.id.clone(),
                    recorded: recorded.clone(),
                    current: current.clone(),
                });
            }
            states.into_iter().map(|(_, state)| state).collect()
        } else {
            vec![LedgerState::NotRecorded; plan.steps.len()]
        };

        tracing::info!(
            plan = plan.name.as_deref().unwrap_or("unnamed"),
            steps = plan.steps.len(),
            ledger = self.use_ledger,
            "applying plan"
        );

        let mut report = RunReport::default();
        for (step, state) in plan.steps.iter().zip(states) {
            let summary = step.action.to_string();
            if state == LedgerState::Recorded {
                tracing::debug!(step = %step.id, "recorded in ledger, skipping");
                report.push(&step.id, summary, StepOutcome::already_applied("recorded in ledger"));
                continue;
            }

            let outcome = self.run_step(step).await?;
            report.push(&step.id, summary, outcome);
        }

        tracing::info!(
            applied = report.applied_count(),
            skipped = report.skipped_count(),
            rows = report.rows_affected(),
            "plan finished"
        );
        Ok(report)
    }

    /// Apply the single step `step_id` of `plan`, ignoring the ledger's
    /// opinion of whether it already ran.
    pub async fn apply_one(
        &self,
        plan: &MigrationPlan,
        step_id: &str,
    ) -> Result<StepOutcome, ServiceError> {
        plan.validate()?;
        let step = plan.find(step_id).ok_or_else(|| ServiceError::UnknownStep(step_id.to_owned()))?;
        if self.use_ledger {
            self.backend.ensure_ledger().await?;
        }
        self.run_step(step).await
    }

    /// Effect, postcondition, ledger record.
    async fn run_step(&self, step: &MigrationStep) -> Result<StepOutcome, ServiceError> {
        let failed = |source: StorageError| ServiceError::StepFailed {
            step_id: step.id.clone(),
            source,
        };

        let outcome = self.apply_step(step).await.map_err(failed)?;
        match &outcome {
            StepOutcome::Applied { rows_affected } => {
                tracing::info!(step = %step.id, rows_affected, "step applied");
            },
            StepOutcome::AlreadyApplied { reason } => {
                tracing::info!(step = %step.id, reason = %reason, "step already applied");
            },
        }

        if let Some(postcondition) = &step.postcondition {
            match self.check_postcondition(postcondition).await.map_err(failed)? {
                StepStatus::Pending { detail } => {
                    return Err(ServiceError::PostconditionFailed {
                        step_id: step.id.clone(),
                        detail,
                    });
                },
                StepStatus::Satisfied { .. } | StepStatus::Recorded => {},
            }
        }

        if self.use_ledger {
            let checksum = step_checksum(step)?;
            self.backend
                .record_step(&step.id, &checksum, outcome.rows_affected(), &self.applied_by)
                .await?;
        }
        Ok(outcome)
    }

    /// Run one step's effect through the idempotent mutator or repair pass.
    pub async fn apply_step(&self, step: &MigrationStep) -> Result<StepOutcome, StorageError> {
        let backend = self.backend.as_ref();
        match &step.action {
            StepAction::AddColumn { table, column, type_decl, comment } => {
                backend.add_column_if_missing(table, column, type_decl, comment.as_deref()).await
            },
            StepAction::AddUniqueConstraint { table, constraint, columns } => {
                backend.add_unique_constraint_if_missing(table, constraint, columns).await
            },
            StepAction::AddForeignKey {
                table,
                constraint,
                column,
                target_table,
                target_column,
                on_delete,
            } => {
                backend
                    .add_foreign_key_if_missing(ForeignKeyRef {
                        table,
                        constraint,
                        column,
                        target_table,
                        target_column,
                        on_delete: *on_delete,
                    })
                    .await
            },
            StepAction::AddCheckConstraint { table, constraint, check } => {
                backend.add_check_constraint_if_missing(table, constraint, check).await
            },
            StepAction::CreateIndex { table, index, columns, unique } => {
                backend.create_index_if_missing(table, index, columns, *unique).await
            },
            StepAction::CreateTable { table, columns, primary_key } => {
                backend.create_table_if_missing(table, columns, primary_key).await
            },
            StepAction::Backfill(spec) => self.repair.backfill(spec).await,
            StepAction::DedupIdentifiers(spec) => {
                Ok(self.repair.dedup(spec, false).await?.to_outcome(spec))
            },
        }
    }

    /// Read-only view of every step. Never creates the ledger table.
    pub async fn status(&self, plan: &MigrationPlan) -> Result<Vec<StepState>, ServiceError> {
        plan.validate()?;
        let entries = if self.use_ledger { self.backend.ledger_entries().await? } else { Vec::new() };

        let mut states = Vec::with_capacity(plan.steps.len());
        for (step, ledger) in reconcile(plan, &entries)? {
            let status = match ledger {
                LedgerState::Recorded => StepStatus::Recorded,
                LedgerState::Drifted { recorded, .. } => StepStatus::Pending {
                    detail: format!("changed since it was applied (recorded checksum {recorded})"),
                },
                LedgerState::NotRecorded => self.probe_step(step).await?,
            };
            states.push(StepState {
                step_id: step.id.clone(),
                summary: step.action.to_string(),
                status,
            });
        }
        Ok(states)
    }

    pub async fn ledger_entries(&self) -> Result<Vec<LedgerEntry>, ServiceError> {
        Ok(self.backend.ledger_entries().await?)
    }

    /// Drop a step from the ledger so the next `apply` runs it again.
    pub async fn forget_step(&self, step_id: &str) -> Result<bool, ServiceError> {
        let removed = self.backend.forget_step(step_id).await?;
        if removed {
            tracing::info!(step = step_id, "removed from ledger");
        }
        Ok(removed)
    }
}
