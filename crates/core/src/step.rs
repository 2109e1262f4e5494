//! Migration Step model.
//!
//! A step is a named effect whose precondition check is implied by its kind:
//! `AddColumn` checks the column, `AddUniqueConstraint` checks the constraint,
//! `Backfill` checks for rows still matching its repair predicate, and so on.
//! Steps are plain data so plans can be loaded from JSON.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_CREATED_COLUMN, DEFAULT_DEDUP_SEPARATOR, DEFAULT_KEY_COLUMN};
use crate::error::CoreError;
use crate::ident::{Ident, TableRef};
use crate::type_decl::TypeDecl;

/// Referential action for `ON DELETE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    Cascade,
    Restrict,
    SetNull,
    #[default]
    NoAction,
}

impl OnDelete {
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Cascade => "CASCADE",
            Self::Restrict => "RESTRICT",
            Self::SetNull => "SET NULL",
            Self::NoAction => "NO ACTION",
        }
    }
}

impl fmt::Display for OnDelete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for OnDelete {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "cascade" => Ok(Self::Cascade),
            "restrict" => Ok(Self::Restrict),
            "set_null" => Ok(Self::SetNull),
            "no_action" => Ok(Self::NoAction),
            _ => Err(CoreError::UnknownVariant { kind: "on_delete action", value: s.to_owned() }),
        }
    }
}

/// Typed CHECK constraint bodies. `Raw` is an escape hatch for expressions
/// the typed forms cannot express.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckExpr {
    NotNull { column: Ident },
    MaxLength { column: Ident, max: usize },
    OneOf { column: Ident, values: Vec<String> },
    NonNegative { column: Ident },
    Raw { sql: String },
}

/// Selects rows a repair has not fixed yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RepairPredicate {
    IsNull,
    /// NULL or only whitespace.
    IsBlank,
    /// Character length strictly greater than `max`.
    LongerThan { max: usize },
    Equals { value: String },
}

impl RepairPredicate {
    /// Evaluate against a column value rendered as text (`None` = NULL).
    #[must_use]
    pub fn matches(&self, value: Option<&str>) -> bool {
        match (self, value) {
            (Self::IsNull, v) => v.is_none(),
            (Self::IsBlank, None) => true,
            (Self::IsBlank, Some(v)) => v.trim().is_empty(),
            (Self::LongerThan { max }, Some(v)) => v.chars().count() > *max,
            (Self::Equals { value }, Some(v)) => v == value,
            (Self::LongerThan { .. } | Self::Equals { .. }, None) => false,
        }
    }
}

impl fmt::Display for RepairPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IsNull => f.write_str("is null"),
            Self::IsBlank => f.write_str("is blank"),
            Self::LongerThan { max } => write!(f, "longer than {max}"),
            Self::Equals { value } => write!(f, "equals {value:?}"),
        }
    }
}

/// New value written by a backfill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackfillValue {
    Null,
    Text { value: String },
    Integer { value: i64 },
    Boolean { value: bool },
    /// Copy another column of the same row.
    FromColumn { column: Ident },
    /// Keep the first `max` characters of the current value.
    Truncated { max: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: Ident,
    pub type_decl: TypeDecl,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Parameters for identifier deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupSpec {
    pub table: TableRef,
    pub column: Ident,
    #[serde(default = "default_key_column")]
    pub key_column: Ident,
    #[serde(default = "default_created_column")]
    pub created_column: Ident,
    #[serde(default = "default_separator")]
    pub separator: String,
}

impl DedupSpec {
    /// Spec with the default `id` / `created_at` ordering columns and `-` separator.
    #[must_use]
    pub fn new(table: TableRef, column: Ident) -> Self {
        Self {
            table,
            column,
            key_column: default_key_column(),
            created_column: default_created_column(),
            separator: default_separator(),
        }
    }

    /// Reject settings that would produce unreadable or self-referencing renames.
    pub fn validate(&self) -> Result<(), CoreError> {
        self.problem().map_or(Ok(()), |reason| Err(CoreError::InvalidDedup(reason)))
    }

    fn problem(&self) -> Option<&'static str> {
        if self.separator.is_empty() {
            return Some("dedup separator is empty");
        }
        if self.key_column == self.column || self.created_column == self.column {
            return Some("dedup column must differ from its key and creation columns");
        }
        None
    }
}

fn default_key_column() -> Ident {
    Ident::from_trusted(DEFAULT_KEY_COLUMN)
}

fn default_created_column() -> Ident {
    Ident::from_trusted(DEFAULT_CREATED_COLUMN)
}

fn default_separator() -> String {
    DEFAULT_DEDUP_SEPARATOR.to_owned()
}

/// Parameters for a conditional column repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillSpec {
    pub table: TableRef,
    pub column: Ident,
    pub value: BackfillValue,
    pub when: RepairPredicate,
}

/// The effect of a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    AddColumn {
        table: TableRef,
        column: Ident,
        type_decl: TypeDecl,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
    AddUniqueConstraint {
        table: TableRef,
        constraint: Ident,
        columns: Vec<Ident>,
    },
    AddForeignKey {
        table: TableRef,
        constraint: Ident,
        column: Ident,
        target_table: TableRef,
        target_column: Ident,
        #[serde(default)]
        on_delete: OnDelete,
    },
    AddCheckConstraint {
        table: TableRef,
        constraint: Ident,
        check: CheckExpr,
    },
    CreateIndex {
        table: TableRef,
        index: Ident,
        columns: Vec<Ident>,
        #[serde(default)]
        unique: bool,
    },
    CreateTable {
        table: TableRef,
        columns: Vec<ColumnDef>,
        #[serde(default)]
        primary_key: Vec<Ident>,
    },
    Backfill(BackfillSpec),
    DedupIdentifiers(DedupSpec),
}

impl StepAction {
    /// The table the action mutates.
    #[must_use]
    pub fn table(&self) -> &TableRef {
        match self {
            Self::AddColumn { table, .. }
            | Self::AddUniqueConstraint { table, .. }
            | Self::AddForeignKey { table, .. }
            | Self::AddCheckConstraint { table, .. }
            | Self::CreateIndex { table, .. }
            | Self::CreateTable { table, .. } => table,
            Self::Backfill(spec) => &spec.table,
            Self::DedupIdentifiers(spec) => &spec.table,
        }
    }

    /// Whether the action changes schema (as opposed to rows).
    #[must_use]
    pub const fn is_ddl(&self) -> bool {
        !matches!(self, Self::Backfill(_) | Self::DedupIdentifiers(_))
    }
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddColumn { table, column, type_decl, .. } => {
                write!(f, "add column {table}.{column} {type_decl}")
            },
            Self::AddUniqueConstraint { table, constraint, columns } => {
                write!(f, "add unique constraint {constraint} on {table} ({})", join(columns))
            },
            Self::AddForeignKey {
                table, constraint, column, target_table, target_column, on_delete,
            } => write!(
                f,
                "add foreign key {constraint} {table}.{column} -> {target_table}.{target_column} on delete {on_delete}"
            ),
            Self::AddCheckConstraint { table, constraint, .. } => {
                write!(f, "add check constraint {constraint} on {table}")
            },
            Self::CreateIndex { table, index, columns, unique } => {
                let kind = if *unique { "unique index" } else { "index" };
                write!(f, "create {kind} {index} on {table} ({})", join(columns))
            },
            Self::CreateTable { table, columns, .. } => {
                write!(f, "create table {table} ({} columns)", columns.len())
            },
            Self::Backfill(spec) => {
                write!(f, "backfill {}.{} where {}", spec.table, spec.column, spec.when)
            },
            Self::DedupIdentifiers(spec) => {
                write!(f, "dedup identifiers {}.{}", spec.table, spec.column)
            },
        }
    }
}

fn join(columns: &[Ident]) -> String {
    columns.iter().map(Ident::as_str).collect::<Vec<_>>().join(", ")
}

/// Optional verification run after a step's effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Postcondition {
    TableExists { table: TableRef },
    ColumnExists { table: TableRef, column: Ident },
    ConstraintExists { constraint: Ident, #[serde(default)] schema: Option<Ident> },
    NoRowsMatch { table: TableRef, column: Ident, predicate: RepairPredicate },
    UniqueValues { table: TableRef, column: Ident },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStep {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub action: StepAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postcondition: Option<Postcondition>,
}

impl MigrationStep {
    #[must_use]
    pub fn new(id: impl Into<String>, action: StepAction) -> Self {
        Self { id: id.into(), description: None, action, postcondition: None }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_postcondition(mut self, postcondition: Postcondition) -> Self {
        self.postcondition = Some(postcondition);
        self
    }

    /// Reject steps that are malformed or whose repair could never converge.
    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |reason: String| CoreError::InvalidStep { step_id: self.id.clone(), reason };

        if self.id.trim().is_empty() {
            return Err(invalid("step id is empty".to_owned()));
        }

        match &self.action {
            StepAction::AddUniqueConstraint { columns, .. }
            | StepAction::CreateIndex { columns, .. } => {
                check_columns(columns).map_err(invalid)?;
            },
            StepAction::CreateTable { columns, primary_key, .. } => {
                if columns.is_empty() {
                    return Err(invalid("table has no columns".to_owned()));
                }
                let names: Vec<Ident> = columns.iter().map(|c| c.name.clone()).collect();
                check_columns(&names).map_err(invalid)?;
                if let Some(missing) = primary_key.iter().find(|pk| !names.contains(pk)) {
                    return Err(invalid(format!("primary key column {missing} is not declared")));
                }
            },
            StepAction::AddCheckConstraint { check, .. } => match check {
                CheckExpr::OneOf { values, .. } if values.is_empty() => {
                    return Err(invalid("one_of check has no values".to_owned()));
                },
                CheckExpr::Raw { sql } if sql.trim().is_empty() || sql.contains(';') => {
                    return Err(invalid("raw check must be a single non-empty expression".to_owned()));
                },
                _ => {},
            },
            StepAction::Backfill(spec) => check_convergence(spec).map_err(invalid)?,
            StepAction::DedupIdentifiers(spec) => {
                if let Some(reason) = spec.problem() {
                    return Err(invalid(reason.to_owned()));
                }
            },
            StepAction::AddColumn { .. } | StepAction::AddForeignKey { .. } => {},
        }
        Ok(())
    }
}

fn check_columns(columns: &[Ident]) -> Result<(), String> {
    if columns.is_empty() {
        return Err("column list is empty".to_owned());
    }
    let mut seen = HashSet::new();
    for column in columns {
        if !seen.insert(column) {
            return Err(format!("column {column} listed twice"));
        }
    }
    Ok(())
}

/// A backfill converges when the value it writes no longer matches its own
/// `when` predicate, so a second run selects nothing.
fn check_convergence(spec: &BackfillSpec) -> Result<(), String> {
    let never_converges =
        || format!("writing {:?} never clears predicate '{}'", spec.value, spec.when);

    match (&spec.value, &spec.when) {
        (BackfillValue::Null, RepairPredicate::IsNull | RepairPredicate::IsBlank) => {
            Err(never_converges())
        },
        (BackfillValue::Truncated { max }, RepairPredicate::LongerThan { max: threshold }) => {
            if max > threshold { Err(never_converges()) } else { Ok(()) }
        },
        (BackfillValue::Truncated { .. }, _) => {
            Err("truncated values only make sense with a longer_than predicate".to_owned())
        },
        (BackfillValue::Text { value }, when) if when.matches(Some(value.as_str())) => {
            Err(never_converges())
        },
        (BackfillValue::FromColumn { column }, _) if *column == spec.column => {
            Err("backfill copies the column onto itself".to_owned())
        },
        _ => Ok(()),
    }
}

/// An ordered list of steps. Order is significant: later steps may rely on
/// columns and tables created by earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub steps: Vec<MigrationStep>,
}

impl MigrationPlan {
    #[must_use]
    pub fn new(steps: Vec<MigrationStep>) -> Self {
        Self { name: None, steps }
    }

    /// Parse and validate a plan document.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let plan: Self = serde_json::from_str(json)?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            step.validate()?;
            if !seen.insert(step.id.as_str()) {
                return Err(CoreError::InvalidPlan(format!("duplicate step id {:?}", step.id)));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn find(&self, step_id: &str) -> Option<&MigrationStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }
}
