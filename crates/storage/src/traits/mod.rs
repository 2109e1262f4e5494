//! Storage backend trait abstraction
//!
//! Catalog introspection, schema DDL, row-level repair and the step ledger are
//! separate traits so the idempotent mutator can be written once against them
//! and run on Postgres or the in-memory backend alike.

pub mod catalog;
pub mod data;
pub mod ddl;
pub mod ledger;

pub use catalog::SchemaCatalog;
pub use data::{DataStore, DuplicateGroup};
pub use ddl::{ForeignKeyRef, SchemaDdl};
pub use ledger::LedgerStore;
