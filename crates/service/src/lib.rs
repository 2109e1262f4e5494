//! Service layer for iati-migrate
//!
//! Runs migration plans step by step against a [`SchemaBackend`], keeps the
//! step ledger, and hosts the data-repair operations the CLI exposes directly.
//!
//! [`SchemaBackend`]: iati_migrate_storage::SchemaBackend

#![allow(missing_docs, reason = "Internal crate with self-explanatory API")]
#![allow(clippy::missing_errors_doc, reason = "Errors are self-explanatory from Result types")]
#![allow(missing_debug_implementations, reason = "Internal types")]
#![allow(clippy::implicit_return, reason = "Implicit return is idiomatic Rust")]
#![allow(clippy::question_mark_used, reason = "? operator is idiomatic Rust")]

pub mod error;
mod migration_service;
mod repair_service;

pub use error::ServiceError;
pub use migration_service::{MigrationService, StepState};
pub use repair_service::{DedupReport, RepairService};
