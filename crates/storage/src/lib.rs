//! Storage layer for iati-migrate
//!
//! Catalog introspection, idempotent DDL, row repair and the step ledger,
//! against PostgreSQL or (with the `memory` feature) an in-process store.

pub mod backend;
pub mod error;
mod idempotent;
#[cfg(any(test, feature = "memory"))]
pub mod memory;
mod pg_migrations;
pub mod pg_storage;
#[cfg(test)]
mod tests;
pub mod traits;

pub use backend::SchemaBackend;
pub use error::StorageError;
pub use idempotent::IdempotentSchema;
#[cfg(any(test, feature = "memory"))]
pub use memory::MemorySchema;
pub use pg_storage::PgSchema;
pub use traits::{
    DataStore, DuplicateGroup, ForeignKeyRef, LedgerStore, SchemaCatalog, SchemaDdl,
};
