//! Results of applying or inspecting steps.

use std::fmt;

use serde::Serialize;

/// What a step did. Finding the change already in place is a success, not an
/// error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Applied { rows_affected: u64 },
    AlreadyApplied { reason: String },
}

impl StepOutcome {
    #[must_use]
    pub const fn applied(rows_affected: u64) -> Self {
        Self::Applied { rows_affected }
    }

    #[must_use]
    pub fn already_applied(reason: impl Into<String>) -> Self {
        Self::AlreadyApplied { reason: reason.into() }
    }

    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    #[must_use]
    pub const fn rows_affected(&self) -> u64 {
        match self {
            Self::Applied { rows_affected } => *rows_affected,
            Self::AlreadyApplied { .. } => 0,
        }
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied { rows_affected } => write!(f, "applied ({rows_affected} rows affected)"),
            Self::AlreadyApplied { reason } => write!(f, "skipped: {reason}"),
        }
    }
}

/// Read-only view of a step, as reported by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    /// Present in the ledger with a matching checksum.
    Recorded,
    /// Not in the ledger, but the catalog or data already reflect it.
    Satisfied { reason: String },
    /// Would change something if applied.
    Pending { detail: String },
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recorded => f.write_str("recorded"),
            Self::Satisfied { reason } => write!(f, "satisfied: {reason}"),
            Self::Pending { detail } => write!(f, "pending: {detail}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step_id: String,
    pub summary: String,
    pub outcome: StepOutcome,
}

/// Operator-facing summary of one `apply` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub steps: Vec<StepReport>,
}

impl RunReport {
    pub fn push(&mut self, step_id: &str, summary: String, outcome: StepOutcome) {
        self.steps.push(StepReport { step_id: step_id.to_owned(), summary, outcome });
    }

    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.steps.iter().filter(|s| s.outcome.is_applied()).count()
    }

    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.steps.len() - self.applied_count()
    }

    #[must_use]
    pub fn rows_affected(&self) -> u64 {
        self.steps.iter().map(|s| s.outcome.rows_affected()).sum()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            writeln!(f, "  [{}] {}: {}", step.step_id, step.summary, step.outcome)?;
        }
        write!(
            f,
            "{} applied, {} skipped, {} rows affected",
            self.applied_count(),
            self.skipped_count(),
            self.rows_affected()
        )
    }
}
