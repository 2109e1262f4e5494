//! Row evaluation helpers: text views, check expressions, literals.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use iati_migrate_core::{BackfillValue, CheckExpr, TypeDecl};
use serde_json::{Number, Value};

use crate::error::StorageError;
use crate::traits::DuplicateGroup;

pub(super) type Row = BTreeMap<String, Value>;

pub(super) fn count(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

/// The value as Postgres would render it with `::text`. `None` is SQL NULL.
pub(super) fn as_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub(super) fn is_serial(decl: &TypeDecl) -> bool {
    matches!(decl.base_type().as_str(), "serial" | "bigserial" | "smallserial")
}

/// Literal following `DEFAULT` in a column declaration.
pub(super) fn parse_default(literal: &str) -> Result<Value, StorageError> {
    if let Some(inner) = literal.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        return Ok(Value::String(inner.replace("''", "'")));
    }
    match literal.to_ascii_lowercase().as_str() {
        "null" => return Ok(Value::Null),
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        "now()" | "current_timestamp" => return Ok(Value::String(Utc::now().to_rfc3339())),
        _ => {},
    }
    if let Ok(n) = literal.parse::<i64>() {
        return Ok(Value::Number(n.into()));
    }
    literal
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| StorageError::Unsupported(format!("default expression {literal}")))
}

pub(super) fn parse_timestamp(value: Option<&Value>) -> Result<Option<DateTime<Utc>>, StorageError> {
    match as_text(value) {
        None => Ok(None),
        Some(text) => DateTime::parse_from_rfc3339(&text)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| StorageError::Malformed(format!("timestamp {text:?}: {e}"))),
    }
}

/// Columns a check expression reads.
pub(super) fn check_column(check: &CheckExpr) -> Result<&str, StorageError> {
    match check {
        CheckExpr::NotNull { column }
        | CheckExpr::MaxLength { column, .. }
        | CheckExpr::OneOf { column, .. }
        | CheckExpr::NonNegative { column } => Ok(column.as_str()),
        CheckExpr::Raw { .. } => {
            Err(StorageError::Unsupported("raw check expressions need a database".to_owned()))
        },
    }
}

/// Whether `row` satisfies `check`. A NULL operand passes, as in SQL.
pub(super) fn check_passes(check: &CheckExpr, row: &Row) -> Result<bool, StorageError> {
    let column = check_column(check)?;
    let value = row.get(column);
    let Some(text) = as_text(value) else {
        return Ok(!matches!(check, CheckExpr::NotNull { .. }));
    };
    Ok(match check {
        CheckExpr::NotNull { .. } => true,
        CheckExpr::MaxLength { max, .. } => text.chars().count() <= *max,
        CheckExpr::OneOf { values, .. } => values.iter().any(|v| *v == text),
        CheckExpr::NonNegative { .. } => {
            let n: f64 = text
                .parse()
                .map_err(|_| StorageError::Malformed(format!("{text:?} is not numeric")))?;
            n >= 0.0
        },
        CheckExpr::Raw { .. } => false,
    })
}

pub(super) fn backfill_value(value: &BackfillValue, row: &Row, column: &str) -> Value {
    match value {
        BackfillValue::Null => Value::Null,
        BackfillValue::Text { value } => Value::String(value.clone()),
        BackfillValue::Integer { value } => Value::Number((*value).into()),
        BackfillValue::Boolean { value } => Value::Bool(*value),
        BackfillValue::FromColumn { column } => {
            row.get(column.as_str()).cloned().unwrap_or(Value::Null)
        },
        BackfillValue::Truncated { max } => match as_text(row.get(column)) {
            Some(text) => Value::String(text.chars().take(*max).collect()),
            None => Value::Null,
        },
    }
}

/// Text tuple for `columns`, or `None` when any of them is NULL.
pub(super) fn tuple(row: &Row, columns: &[String]) -> Option<Vec<String>> {
    columns.iter().map(|c| as_text(row.get(c))).collect()
}

/// Same grouping as the Postgres `GROUP BY … HAVING count(*) > 1` query.
pub(super) fn duplicate_groups(rows: &[Row], columns: &[String], limit: usize) -> Vec<DuplicateGroup> {
    let mut counts: BTreeMap<Vec<String>, u64> = BTreeMap::new();
    for values in rows.iter().filter_map(|row| tuple(row, columns)) {
        *counts.entry(values).or_default() += 1;
    }
    let mut groups: Vec<DuplicateGroup> = counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(values, count)| DuplicateGroup { values: values.into_iter().map(Some).collect(), count })
        .collect();
    groups.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.values.cmp(&b.values)));
    groups.truncate(limit);
    groups
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults_parse_like_sql_literals() {
        assert_eq!(parse_default("'USD'").unwrap(), json!("USD"));
        assert_eq!(parse_default("'it''s'").unwrap(), json!("it's"));
        assert_eq!(parse_default("TRUE").unwrap(), json!(true));
        assert_eq!(parse_default("0").unwrap(), json!(0));
        assert_eq!(parse_default("1.5").unwrap(), json!(1.5));
        assert!(parse_default("gen_random_uuid()").is_err());
    }

    #[test]
    fn null_operands_pass_checks_except_not_null() {
        let row = Row::new();
        let column = iati_migrate_core::Ident::new("currency").unwrap();
        assert!(check_passes(&CheckExpr::MaxLength { column: column.clone(), max: 3 }, &row).unwrap());
        assert!(!check_passes(&CheckExpr::NotNull { column }, &row).unwrap());
    }

    #[test]
    fn text_view_matches_postgres_casts() {
        assert_eq!(as_text(Some(&json!(12))), Some("12".to_owned()));
        assert_eq!(as_text(Some(&json!(true))), Some("true".to_owned()));
        assert_eq!(as_text(Some(&Value::Null)), None);
        assert_eq!(as_text(None), None);
    }
}
