//! Typed error enum for the service layer.
//!
//! Wraps storage and validation failures, and adds the step context an
//! operator needs to resume a run: which step failed and why.

use iati_migrate_core::CoreError;
use iati_migrate_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage operation outside any step (ledger access, diagnostics).
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    /// The plan or an argument failed validation before touching the database.
    #[error("invalid input: {0}")]
    Invalid(#[from] CoreError),

    /// A step's effect failed. Earlier steps of the run stay applied.
    #[error("step {step_id} failed: {source}")]
    StepFailed {
        step_id: String,
        #[source]
        source: StorageError,
    },

    /// The step definition changed after the ledger recorded it.
    #[error(
        "step {step_id} was changed after it was applied (recorded checksum {recorded}, current {current})"
    )]
    LedgerDrift { step_id: String, recorded: String, current: String },

    /// The step ran but its declared postcondition does not hold.
    #[error("step {step_id} postcondition not met: {detail}")]
    PostconditionFailed { step_id: String, detail: String },

    #[error("no step {0} in plan")]
    UnknownStep(String),
}

impl ServiceError {
    /// Whether this error is likely transient. Nothing here retries.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(e) | Self::StepFailed { source: e, .. } => e.is_transient(),
            _ => false,
        }
    }

    /// Id of the step the run stopped at, if the error is step-specific.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            Self::StepFailed { step_id, .. }
            | Self::LedgerDrift { step_id, .. }
            | Self::PostconditionFailed { step_id, .. } => Some(step_id),
            Self::UnknownStep(step_id) => Some(step_id),
            Self::Storage(_) | Self::Invalid(_) => None,
        }
    }
}
