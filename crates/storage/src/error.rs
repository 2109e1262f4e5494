//! Typed error enum for the storage layer.
//!
//! Maps Postgres SQLSTATEs onto the three failure classes an operator has to
//! tell apart: the object is already there, existing data blocks the change,
//! or something the change depends on is missing.

use iati_migrate_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// The object being created already exists. Raised when a concurrent run
    /// wins the race between the catalog check and the DDL.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Existing rows violate the constraint or change being applied.
    #[error("precondition violated: {detail}{}", rows_suffix(.violating_rows))]
    PreconditionViolated {
        detail: String,
        violating_rows: Option<u64>,
        /// A bounded sample of offending values, for the operator.
        sample: Vec<String>,
    },

    /// The name is taken by an object other than the one being created, e.g.
    /// a plain index where a unique constraint was wanted.
    #[error("{what} was not created, its name is taken by another object: {detail}")]
    NameConflict { what: String, detail: String },

    /// A table, column or other object the change depends on does not exist.
    #[error("missing {kind}: {name}")]
    MissingObject { kind: &'static str, name: String },

    /// The database rejected a declaration or expression as invalid.
    #[error("malformed: {0}")]
    Malformed(String),

    /// The backend cannot evaluate this request.
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Invalid(#[from] CoreError),

    /// SQL / connection / timeout failure.
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

fn rows_suffix(rows: &Option<u64>) -> String {
    rows.map(|n| format!(" ({n} violating rows)")).unwrap_or_default()
}

impl StorageError {
    /// Whether this error is likely transient. Nothing in this crate retries;
    /// the flag is for callers deciding what to tell the operator.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    pub(crate) fn violation(detail: impl Into<String>, rows: u64, sample: Vec<String>) -> Self {
        Self::PreconditionViolated { detail: detail.into(), violating_rows: Some(rows), sample }
    }

    pub(crate) fn missing(kind: &'static str, name: impl Into<String>) -> Self {
        Self::MissingObject { kind, name: name.into() }
    }
}

/// Custom `From<sqlx::Error>` keyed on SQLSTATE rather than a blanket `#[from]`.
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        let (code, message) = match &err {
            sqlx::Error::Database(db_err) => {
                (db_err.code().map(|c| c.into_owned()), db_err.message().to_owned())
            },
            _ => return Self::Database(err),
        };
        match code.as_deref() {
            // duplicate_column, duplicate_object, duplicate_table, duplicate_schema
            Some("42701" | "42710" | "42P07" | "42P06") => Self::AlreadyExists(message),
            // unique / check / foreign key / not null violations
            Some("23505" | "23514" | "23503" | "23502") => Self::PreconditionViolated {
                detail: message,
                violating_rows: None,
                sample: Vec::new(),
            },
            Some("42P01") => Self::missing("table", message),
            Some("42703") => Self::missing("column", message),
            Some("3F000") => Self::missing("schema", message),
            // syntax error, undefined type, datatype mismatch, bad literal, bad cast
            Some("42601" | "42704" | "42804" | "22P02" | "42846") => Self::Malformed(message),
            _ => Self::Database(err),
        }
    }
}
