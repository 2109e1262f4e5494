//! SQL text rendering for Postgres.
//!
//! Identifiers arrive pre-validated and are always double-quoted. Literal
//! values are rendered as standard-conforming string literals so they coerce
//! to whatever type the target column has.

use iati_migrate_core::{
    BackfillSpec, BackfillValue, CheckExpr, ColumnDef, Ident, RepairPredicate, TableRef, TypeDecl,
};

use crate::traits::ForeignKeyRef;

/// `'it''s'`. Assumes `standard_conforming_strings = on` (the default since 9.1).
pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub(crate) fn column_list(columns: &[Ident]) -> String {
    columns.iter().map(Ident::quoted).collect::<Vec<_>>().join(", ")
}

pub(crate) fn add_column(schema: &str, table: &TableRef, column: &Ident, decl: &TypeDecl) -> String {
    format!("ALTER TABLE {} ADD COLUMN {} {decl}", table.quoted_in(schema), column.quoted())
}

pub(crate) fn comment_on_column(
    schema: &str,
    table: &TableRef,
    column: &Ident,
    comment: &str,
) -> String {
    format!(
        "COMMENT ON COLUMN {}.{} IS {}",
        table.quoted_in(schema),
        column.quoted(),
        quote_literal(comment)
    )
}

pub(crate) fn add_unique(schema: &str, table: &TableRef, constraint: &Ident, columns: &[Ident]) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
        table.quoted_in(schema),
        constraint.quoted(),
        column_list(columns)
    )
}

pub(crate) fn add_foreign_key(schema: &str, fk: ForeignKeyRef<'_>) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
        fk.table.quoted_in(schema),
        fk.constraint.quoted(),
        fk.column.quoted(),
        fk.target_table.quoted_in(schema),
        fk.target_column.quoted(),
        fk.on_delete.as_sql()
    )
}

pub(crate) fn check_expr(check: &CheckExpr) -> String {
    match check {
        CheckExpr::NotNull { column } => format!("{} IS NOT NULL", column.quoted()),
        CheckExpr::MaxLength { column, max } => {
            format!("char_length({}::text) <= {max}", column.quoted())
        },
        CheckExpr::OneOf { column, values } => {
            let values: Vec<String> = values.iter().map(|v| quote_literal(v)).collect();
            format!("{}::text IN ({})", column.quoted(), values.join(", "))
        },
        CheckExpr::NonNegative { column } => format!("{} >= 0", column.quoted()),
        CheckExpr::Raw { sql } => sql.clone(),
    }
}

pub(crate) fn add_check(schema: &str, table: &TableRef, constraint: &Ident, check: &CheckExpr) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} CHECK ({})",
        table.quoted_in(schema),
        constraint.quoted(),
        check_expr(check)
    )
}

pub(crate) fn create_index(
    schema: &str,
    table: &TableRef,
    index: &Ident,
    columns: &[Ident],
    unique: bool,
) -> String {
    format!(
        "CREATE {}INDEX {} ON {} ({})",
        if unique { "UNIQUE " } else { "" },
        index.quoted(),
        table.quoted_in(schema),
        column_list(columns)
    )
}

pub(crate) fn create_table(
    schema: &str,
    table: &TableRef,
    columns: &[ColumnDef],
    primary_key: &[Ident],
) -> String {
    let mut parts: Vec<String> =
        columns.iter().map(|c| format!("{} {}", c.name.quoted(), c.type_decl)).collect();
    if !primary_key.is_empty() {
        parts.push(format!("PRIMARY KEY ({})", column_list(primary_key)));
    }
    format!("CREATE TABLE {} (\n    {}\n)", table.quoted_in(schema), parts.join(",\n    "))
}

pub(crate) fn predicate(column: &Ident, predicate: &RepairPredicate) -> String {
    let col = column.quoted();
    match predicate {
        RepairPredicate::IsNull => format!("{col} IS NULL"),
        RepairPredicate::IsBlank => format!("({col} IS NULL OR btrim({col}::text) = '')"),
        RepairPredicate::LongerThan { max } => format!("char_length({col}::text) > {max}"),
        RepairPredicate::Equals { value } => format!("{col}::text = {}", quote_literal(value)),
    }
}

pub(crate) fn backfill_value(column: &Ident, value: &BackfillValue) -> String {
    match value {
        BackfillValue::Null => "NULL".to_owned(),
        BackfillValue::Text { value } => quote_literal(value),
        BackfillValue::Integer { value } => value.to_string(),
        BackfillValue::Boolean { value } => value.to_string(),
        BackfillValue::FromColumn { column } => column.quoted(),
        BackfillValue::Truncated { max } => format!("left({}, {max})", column.quoted()),
    }
}

pub(crate) fn backfill(schema: &str, spec: &BackfillSpec) -> String {
    format!(
        "UPDATE {} SET {} = {} WHERE {}",
        spec.table.quoted_in(schema),
        spec.column.quoted(),
        backfill_value(&spec.column, &spec.value),
        predicate(&spec.column, &spec.when)
    )
}

pub(crate) fn count_where(schema: &str, table: &TableRef, condition: &str) -> String {
    format!("SELECT count(*) FROM {} WHERE {condition}", table.quoted_in(schema))
}

pub(crate) fn count_orphans(schema: &str, fk: ForeignKeyRef<'_>) -> String {
    format!(
        "SELECT count(*) FROM {} s WHERE s.{col} IS NOT NULL \
         AND NOT EXISTS (SELECT 1 FROM {} t WHERE t.{} = s.{col})",
        fk.table.quoted_in(schema),
        fk.target_table.quoted_in(schema),
        fk.target_column.quoted(),
        col = fk.column.quoted(),
    )
}

fn all_not_null(columns: &[Ident]) -> String {
    columns.iter().map(|c| format!("{} IS NOT NULL", c.quoted())).collect::<Vec<_>>().join(" AND ")
}

pub(crate) fn find_duplicates(schema: &str, table: &TableRef, columns: &[Ident], limit: usize) -> String {
    let selected: Vec<String> = columns.iter().map(|c| format!("{}::text", c.quoted())).collect();
    // LIMIT takes a bigint.
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    format!(
        "SELECT {}, count(*) AS n FROM {} WHERE {} GROUP BY {} HAVING count(*) > 1 \
         ORDER BY n DESC LIMIT {limit}",
        selected.join(", "),
        table.quoted_in(schema),
        all_not_null(columns),
        column_list(columns)
    )
}

pub(crate) fn count_duplicate_rows(schema: &str, table: &TableRef, columns: &[Ident]) -> String {
    format!(
        "SELECT COALESCE(SUM(n), 0)::bigint FROM (SELECT count(*) AS n FROM {} WHERE {} \
         GROUP BY {} HAVING count(*) > 1) d",
        table.quoted_in(schema),
        all_not_null(columns),
        column_list(columns)
    )
}
