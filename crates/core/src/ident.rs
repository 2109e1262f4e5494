//! Validated SQL identifiers and table references.
//!
//! Every name that ends up inside generated DDL passes through [`Ident`], so
//! rendering never has to trust caller-provided text.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::constants::MAX_IDENTIFIER_LEN;
use crate::error::CoreError;

static IDENT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").unwrap());

/// A SQL identifier restricted to the unquoted-identifier alphabet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ident(String);

impl Ident {
    pub fn new(name: impl Into<String>) -> Result<Self, CoreError> {
        let name = name.into();
        if name.is_empty() {
            return Err(CoreError::InvalidIdentifier { name, reason: "empty" });
        }
        if name.len() > MAX_IDENTIFIER_LEN {
            return Err(CoreError::InvalidIdentifier {
                name,
                reason: "longer than 63 bytes",
            });
        }
        if !IDENT_REGEX.is_match(&name) {
            return Err(CoreError::InvalidIdentifier {
                name,
                reason: "must match [A-Za-z_][A-Za-z0-9_$]*",
            });
        }
        Ok(Self(name))
    }

    /// For compile-time constants already known to be valid.
    pub(crate) fn from_trusted(name: &str) -> Self {
        debug_assert!(IDENT_REGEX.is_match(name));
        Self(name.to_owned())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form for embedding in SQL text.
    #[must_use]
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Ident {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Ident {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Ident> for String {
    fn from(value: Ident) -> Self {
        value.0
    }
}

/// A table, optionally schema-qualified (`activities` or `public.activities`).
///
/// An unqualified reference resolves against the schema the backend was
/// configured with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableRef {
    pub schema: Option<Ident>,
    pub name: Ident,
}

impl TableRef {
    #[must_use]
    pub fn new(name: Ident) -> Self {
        Self { schema: None, name }
    }

    #[must_use]
    pub fn qualified(schema: Ident, name: Ident) -> Self {
        Self { schema: Some(schema), name }
    }

    /// Schema name, falling back to `default_schema` for unqualified references.
    #[must_use]
    pub fn schema_or<'a>(&'a self, default_schema: &'a str) -> &'a str {
        self.schema.as_ref().map_or(default_schema, Ident::as_str)
    }

    /// `"schema"."table"` using `default_schema` when unqualified.
    #[must_use]
    pub fn quoted_in(&self, default_schema: &str) -> String {
        format!("\"{}\".{}", self.schema_or(default_schema), self.name.quoted())
    }

    /// Key used by catalogs that index tables by `schema.table`.
    #[must_use]
    pub fn key_in(&self, default_schema: &str) -> String {
        format!("{}.{}", self.schema_or(default_schema), self.name)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl FromStr for TableRef {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((schema, name)) => Ok(Self::qualified(Ident::new(schema)?, Ident::new(name)?)),
            None => Ok(Self::new(Ident::new(s)?)),
        }
    }
}

impl TryFrom<String> for TableRef {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TableRef> for String {
    fn from(value: TableRef) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers() {
        assert!(Ident::new("default_finance_type").is_ok());
        assert!(Ident::new("_private").is_ok());
        assert!(Ident::new("col$1").is_ok());
    }

    #[test]
    fn rejects_injection_attempts() {
        assert!(Ident::new("x; DROP TABLE activities").is_err());
        assert!(Ident::new("a\"b").is_err());
        assert!(Ident::new("1abc").is_err());
        assert!(Ident::new("").is_err());
    }

    #[test]
    fn rejects_overlong_identifier() {
        let name = "a".repeat(64);
        let err = Ident::new(name).unwrap_err();
        assert!(err.to_string().contains("63"), "got {err}");
    }

    #[test]
    fn table_ref_parses_qualified_and_bare() {
        let bare: TableRef = "activities".parse().unwrap();
        assert_eq!(bare.schema, None);
        assert_eq!(bare.quoted_in("public"), "\"public\".\"activities\"");

        let qualified: TableRef = "aims.activities".parse().unwrap();
        assert_eq!(qualified.schema_or("public"), "aims");
        assert_eq!(qualified.to_string(), "aims.activities");
    }

    #[test]
    fn table_ref_serde_uses_string_form() {
        let table: TableRef = serde_json::from_str("\"public.transactions\"").unwrap();
        assert_eq!(table.name.as_str(), "transactions");
        assert_eq!(serde_json::to_string(&table).unwrap(), "\"public.transactions\"");
        assert!(serde_json::from_str::<TableRef>("\"bad name\"").is_err());
    }
}
