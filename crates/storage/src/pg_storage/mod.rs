//! PostgreSQL backend using sqlx.
//!
//! Split into modular files by concern: catalog probes, DDL, row repair and
//! the step ledger.

mod catalog;
mod data;
mod ddl;
mod ledger;
pub(crate) mod sql;

use std::time::Duration;

use iati_migrate_core::{
    PG_POOL_ACQUIRE_TIMEOUT_SECS, PG_POOL_IDLE_TIMEOUT_SECS, PG_POOL_MAX_CONNECTIONS,
};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::error::StorageError;

#[derive(Clone, Debug)]
pub struct PgSchema {
    pool: PgPool,
    schema: String,
}

impl PgSchema {
    /// Connect with the default pool size.
    pub async fn new(database_url: &str, schema: &str) -> Result<Self, StorageError> {
        Self::connect(database_url, schema, PG_POOL_MAX_CONNECTIONS).await
    }

    pub async fn connect(
        database_url: &str,
        schema: &str,
        max_connections: u32,
    ) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(PG_POOL_ACQUIRE_TIMEOUT_SECS))
            .idle_timeout(Duration::from_secs(PG_POOL_IDLE_TIMEOUT_SECS))
            .test_before_acquire(true)
            .connect(database_url)
            .await?;
        tracing::info!(schema, "connected to PostgreSQL");
        Ok(Self::from_pool(pool, schema))
    }

    #[must_use]
    pub fn from_pool(pool: PgPool, schema: &str) -> Self {
        Self { pool, schema: schema.to_owned() }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
