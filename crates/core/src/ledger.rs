//! Versioned record of applied steps.
//!
//! Idempotence checks alone make re-running safe; the ledger additionally
//! answers "what ran here, when, and by whom" and detects steps whose
//! definition changed after they were applied.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::CoreError;
use crate::step::{MigrationPlan, MigrationStep};

/// Namespace for step checksums (UUIDv5 over the step's canonical JSON).
const STEP_CHECKSUM_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2b8e_93d4_4a57_b0e2_5c1d_7a9f_3e40);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub step_id: String,
    pub checksum: String,
    pub rows_affected: i64,
    pub applied_at: DateTime<Utc>,
    pub applied_by: Option<String>,
}

/// Stable fingerprint of a step definition. The description is excluded so
/// rewording a step does not count as a change.
pub fn step_checksum(step: &MigrationStep) -> Result<String, CoreError> {
    let canonical = serde_json::to_vec(&(&step.id, &step.action, &step.postcondition))?;
    Ok(Uuid::new_v5(&STEP_CHECKSUM_NAMESPACE, &canonical).to_string())
}

/// Per-step view of a plan against recorded ledger entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerState {
    Recorded,
    NotRecorded,
    Drifted { recorded: String, current: String },
}

/// Match each plan step against the ledger, in plan order.
pub fn reconcile<'a>(
    plan: &'a MigrationPlan,
    entries: &[LedgerEntry],
) -> Result<Vec<(&'a MigrationStep, LedgerState)>, CoreError> {
    let recorded: HashMap<&str, &str> =
        entries.iter().map(|e| (e.step_id.as_str(), e.checksum.as_str())).collect();

    plan.steps
        .iter()
        .map(|step| {
            let current = step_checksum(step)?;
            let state = match recorded.get(step.id.as_str()) {
                None => LedgerState::NotRecorded,
                Some(checksum) if *checksum == current => LedgerState::Recorded,
                Some(checksum) => LedgerState::Drifted { recorded: (*checksum).to_owned(), current },
            };
            Ok((step, state))
        })
        .collect()
}
