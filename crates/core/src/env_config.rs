//! Environment variable parsing with warn-level logging for invalid values.

use crate::constants::{DEFAULT_SCHEMA, PG_POOL_MAX_CONNECTIONS};

/// Parse an environment variable with a default fallback.
///
/// - If the variable is not set: returns `default` silently (expected case).
/// - If the variable is set but cannot be parsed: logs a warning and returns `default`.
pub fn env_parse_with_default<T: std::str::FromStr + std::fmt::Display>(
    var: &str,
    default: T,
) -> T {
    match std::env::var(var) {
        Ok(v) => match v.parse() {
            Ok(n) => n,
            Err(_) => {
                tracing::warn!(
                    var,
                    value = %v,
                    default = %default,
                    "invalid env var value, using default"
                );
                default
            },
        },
        Err(_) => default,
    }
}

/// Runtime settings resolved from the environment. CLI flags override these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database_url: Option<String>,
    pub schema: String,
    pub use_ledger: bool,
    pub applied_by: String,
    pub max_connections: u32,
}

impl Settings {
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty());
        let schema = std::env::var("IATI_MIGRATE_SCHEMA")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SCHEMA.to_owned());
        let applied_by = std::env::var("IATI_MIGRATE_APPLIED_BY")
            .or_else(|_| std::env::var("USER"))
            .unwrap_or_else(|_| "unknown".to_owned());

        Self {
            database_url,
            schema,
            use_ledger: env_parse_with_default("IATI_MIGRATE_LEDGER", true),
            applied_by,
            max_connections: env_parse_with_default(
                "IATI_MIGRATE_PG_MAX_CONNECTIONS",
                PG_POOL_MAX_CONNECTIONS,
            ),
        }
    }
}
