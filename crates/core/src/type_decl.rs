//! Column type declarations (`text`, `numeric(20,2)`, `boolean not null default true`).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A column type plus optional modifiers, validated just enough to keep a
/// single declaration from smuggling in a second statement.
///
/// Whether the type itself exists is left to the database; an unknown type
/// fails the step when the DDL runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TypeDecl(String);

impl TypeDecl {
    pub fn new(decl: impl Into<String>) -> Result<Self, CoreError> {
        let decl: String = decl.into().trim().to_owned();
        let malformed = |reason: &'static str| CoreError::MalformedTypeDecl {
            decl: decl.clone(),
            reason,
        };

        if decl.is_empty() {
            return Err(malformed("empty"));
        }
        if !decl.starts_with(|c: char| c.is_ascii_alphabetic()) {
            return Err(malformed("must start with a type name"));
        }
        if decl.contains(';') {
            return Err(malformed("contains a statement terminator"));
        }
        if decl.contains("--") || decl.contains("/*") {
            return Err(malformed("contains a comment marker"));
        }
        if decl.matches('\'').count() % 2 != 0 {
            return Err(malformed("unbalanced quote"));
        }

        let mut depth: i32 = 0;
        let mut quoted = false;
        for c in decl.chars() {
            match c {
                '\'' => quoted = !quoted,
                _ if quoted => {},
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(malformed("unbalanced parentheses"));
                    }
                },
                // A top-level comma would start another ALTER TABLE action.
                ',' if depth == 0 => return Err(malformed("comma outside parentheses")),
                _ => {},
            }
        }
        if depth != 0 {
            return Err(malformed("unbalanced parentheses"));
        }

        Ok(Self(decl))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the declaration carries a `NOT NULL` modifier.
    #[must_use]
    pub fn is_not_null(&self) -> bool {
        self.lowercase_words().windows(2).any(|w| w[0] == "not" && w[1] == "null")
    }

    /// The raw token following `DEFAULT`, if any (`true`, `'USD'`, `0`, `now()`).
    #[must_use]
    pub fn default_literal(&self) -> Option<&str> {
        let lower = self.0.to_ascii_lowercase();
        let idx = lower.find(" default ")?;
        let rest = self.0[idx + " default ".len()..].trim_start();
        if let Some(stripped) = rest.strip_prefix('\'') {
            let end = stripped.find('\'')?;
            return Some(&rest[..end + 2]);
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        Some(&rest[..end])
    }

    /// Base type name, lowercased, without modifiers (`numeric(20,2)` → `numeric`).
    #[must_use]
    pub fn base_type(&self) -> String {
        let first = self.0.split_whitespace().next().unwrap_or_default();
        first.split('(').next().unwrap_or_default().to_ascii_lowercase()
    }

    fn lowercase_words(&self) -> Vec<String> {
        self.0.split_whitespace().map(str::to_ascii_lowercase).collect()
    }
}

impl fmt::Display for TypeDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TypeDecl {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TypeDecl> for String {
    fn from(value: TypeDecl) -> Self {
        value.0
    }
}
