//! Read-only checks: does the catalog or data already reflect a step?

use iati_migrate_core::{
    Ident, MigrationStep, Postcondition, StepAction, StepStatus, TableRef,
};
use iati_migrate_storage::StorageError;
use iati_migrate_storage::traits::{DataStore, SchemaCatalog};

use super::MigrationService;
use crate::ServiceError;

fn status(present: bool, what: String) -> StepStatus {
    if present {
        StepStatus::Satisfied { reason: format!("{what} exists") }
    } else {
        StepStatus::Pending { detail: format!("{what} missing") }
    }
}

impl MigrationService {
    pub async fn check_postcondition(
        &self,
        postcondition: &Postcondition,
    ) -> Result<StepStatus, StorageError> {
        let backend = self.backend.as_ref();
        match postcondition {
            Postcondition::TableExists { table } => {
                Ok(status(backend.table_exists(table).await?, format!("table {table}")))
            },
            Postcondition::ColumnExists { table, column } => Ok(status(
                backend.column_exists(table, column).await?,
                format!("column {table}.{column}"),
            )),
            Postcondition::ConstraintExists { constraint, schema } => Ok(status(
                backend.constraint_exists(constraint, schema.as_ref()).await?,
                format!("constraint {constraint}"),
            )),
            Postcondition::NoRowsMatch { table, column, predicate } => {
                let rows = backend.count_matching(table, column, predicate).await?;
                Ok(if rows == 0 {
                    StepStatus::Satisfied { reason: format!("no rows in {table}.{column} {predicate}") }
                } else {
                    StepStatus::Pending { detail: format!("{rows} rows in {table}.{column} {predicate}") }
                })
            },
            Postcondition::UniqueValues { table, column } => {
                self.unique_status(table, std::slice::from_ref(column)).await
            },
        }
    }

    async fn unique_status(
        &self,
        table: &TableRef,
        columns: &[Ident],
    ) -> Result<StepStatus, StorageError> {
        let groups = self.backend.find_duplicates(table, columns, 1).await?;
        let names: Vec<&str> = columns.iter().map(Ident::as_str).collect();
        Ok(match groups.first() {
            None => StepStatus::Satisfied {
                reason: format!("{table} ({}) has no duplicates", names.join(", ")),
            },
            Some(group) => StepStatus::Pending {
                detail: format!("{table} ({}) has duplicates, e.g. {}", names.join(", "), group.describe()),
            },
        })
    }

    async fn probe_action(&self, action: &StepAction) -> Result<StepStatus, StorageError> {
        let backend = self.backend.as_ref();
        let schema = action.table().schema.as_ref();
        match action {
            StepAction::AddColumn { table, column, .. } => Ok(status(
                backend.column_exists(table, column).await?,
                format!("column {table}.{column}"),
            )),
            StepAction::AddUniqueConstraint { constraint, .. }
            | StepAction::AddForeignKey { constraint, .. }
            | StepAction::AddCheckConstraint { constraint, .. } => Ok(status(
                backend.constraint_exists(constraint, schema).await?,
                format!("constraint {constraint}"),
            )),
            StepAction::CreateIndex { index, .. } => Ok(status(
                backend.index_exists(index, schema).await?,
                format!("index {index}"),
            )),
            StepAction::CreateTable { table, .. } => {
                Ok(status(backend.table_exists(table).await?, format!("table {table}")))
            },
            StepAction::Backfill(spec) => {
                self.check_postcondition(&Postcondition::NoRowsMatch {
                    table: spec.table.clone(),
                    column: spec.column.clone(),
                    predicate: spec.when.clone(),
                })
                .await
            },
            StepAction::DedupIdentifiers(spec) => {
                self.unique_status(&spec.table, std::slice::from_ref(&spec.column)).await
            },
        }
    }

    /// Satisfied only if the action's own check and the postcondition (if
    /// any) both hold. Objects an earlier step would create count as pending.
    pub(super) async fn probe_step(&self, step: &MigrationStep) -> Result<StepStatus, ServiceError> {
        let probed = match self.probe_action(&step.action).await {
            Ok(StepStatus::Satisfied { reason }) => match &step.postcondition {
                Some(postcondition) => self.check_postcondition(postcondition).await,
                None => Ok(StepStatus::Satisfied { reason }),
            },
            other => other,
        };
        match probed {
            Err(StorageError::MissingObject { kind, name }) => {
                Ok(StepStatus::Pending { detail: format!("{kind} {name} does not exist yet") })
            },
            other => Ok(other?),
        }
    }
}
