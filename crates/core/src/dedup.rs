//! Duplicate identifier repair planning.
//!
//! Pure planning step: storage loads the rows, this module decides which rows
//! keep their identifier and what the others become, storage writes the result.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One row's identifier value with the columns that order duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierRow {
    /// Internal row key rendered as text.
    pub key: String,
    pub value: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl IdentifierRow {
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>, created_at: Option<DateTime<Utc>>) -> Self {
        Self { key: key.into(), value: value.into(), created_at }
    }
}

/// A planned identifier change for one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rename {
    pub key: String,
    pub from: String,
    pub to: String,
}

/// Keys compare numerically when both are integers, so `9` sorts before `10`.
fn compare_keys(a: &str, b: &str) -> Ordering {
    match (a.parse::<i128>(), b.parse::<i128>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

/// Creation order, missing timestamps last (Postgres `ASC NULLS LAST`), then key.
fn creation_order(a: &IdentifierRow, b: &IdentifierRow) -> Ordering {
    let by_time = match (a.created_at, b.created_at) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_time.then_with(|| compare_keys(&a.key, &b.key))
}

/// Plan renames so every identifier becomes unique.
///
/// Within each group of equal values the earliest-created row keeps the value;
/// later rows get `value{sep}1`, `value{sep}2`, … in creation order. A candidate
/// already used by any row is skipped.
#[must_use]
pub fn plan_renames(rows: &[IdentifierRow], separator: &str) -> Vec<Rename> {
    let mut taken: HashSet<String> = rows.iter().map(|r| r.value.clone()).collect();
    let mut groups: BTreeMap<&str, Vec<&IdentifierRow>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.value.as_str()).or_default().push(row);
    }

    let mut renames = Vec::new();
    for (value, mut group) in groups {
        if group.len() < 2 {
            continue;
        }
        group.sort_by(|a, b| creation_order(a, b));

        let mut suffix: u64 = 1;
        for row in group.iter().skip(1) {
            let candidate = loop {
                let candidate = format!("{value}{separator}{suffix}");
                suffix += 1;
                if !taken.contains(&candidate) {
                    break candidate;
                }
            };
            taken.insert(candidate.clone());
            renames.push(Rename { key: row.key.clone(), from: value.to_owned(), to: candidate });
        }
    }
    renames
}

/// Values that occur more than once, with their counts, most frequent first.
#[must_use]
pub fn duplicate_groups(rows: &[IdentifierRow]) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for row in rows {
        *counts.entry(row.value.as_str()).or_default() += 1;
    }
    let mut groups: Vec<(String, usize)> = counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(v, n)| (v.to_owned(), n))
        .collect();
    groups.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    groups
}

#[cfg(test)]
#[path = "dedup_tests.rs"]
mod tests;
