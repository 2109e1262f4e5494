//! Shared constants for iati-migrate.

/// Schema used when a table reference does not name one.
pub const DEFAULT_SCHEMA: &str = "public";

/// Postgres truncates identifiers beyond this many bytes (NAMEDATALEN - 1).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Table recording which steps have been applied to a database.
pub const LEDGER_TABLE: &str = "iati_migrate_ledger";

/// Separator between an identifier and its disambiguating suffix.
pub const DEFAULT_DEDUP_SEPARATOR: &str = "-";

/// Column holding the internal row key for dedup ordering.
pub const DEFAULT_KEY_COLUMN: &str = "id";

/// Column holding the creation timestamp for dedup ordering.
pub const DEFAULT_CREATED_COLUMN: &str = "created_at";

/// Number of offending values reported when a uniqueness precondition fails.
pub const VIOLATION_SAMPLE_LIMIT: usize = 20;

/// PostgreSQL connection pool: default maximum connections.
/// Migrations run sequentially; a handful is plenty.
pub const PG_POOL_MAX_CONNECTIONS: u32 = 4;

/// PostgreSQL connection pool: acquire timeout in seconds.
pub const PG_POOL_ACQUIRE_TIMEOUT_SECS: u64 = 10;

/// PostgreSQL connection pool: idle timeout in seconds.
pub const PG_POOL_IDLE_TIMEOUT_SECS: u64 = 300;
