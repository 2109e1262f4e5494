use std::result::Result as StdResult;

use thiserror::Error;

/// Validation errors raised before anything reaches the database.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid identifier {name:?}: {reason}")]
    InvalidIdentifier { name: String, reason: &'static str },

    #[error("malformed type declaration {decl:?}: {reason}")]
    MalformedTypeDecl { decl: String, reason: &'static str },

    #[error("invalid step {step_id:?}: {reason}")]
    InvalidStep { step_id: String, reason: String },

    #[error("invalid dedup settings: {0}")]
    InvalidDedup(&'static str),

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("unknown {kind}: {value:?}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = StdResult<T, CoreError>;
