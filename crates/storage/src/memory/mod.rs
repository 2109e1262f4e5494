//! In-memory backend for tests and offline plan rehearsal.
//!
//! Reproduces the Postgres behavior the idempotent mutator depends on. Plain
//! DDL fails with `AlreadyExists` on a duplicate object, validating DDL fails
//! when existing rows would violate it, and statements touching a missing
//! table or column fail with `MissingObject`. Inserts and updates are checked
//! against the table's constraints, and a failing update changes nothing. Row values are JSON and are
//! compared by their text rendering.

mod eval;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use iati_migrate_core::{
    BackfillSpec, BackfillValue, CheckExpr, ColumnDef, DEFAULT_SCHEMA, DedupSpec, Ident,
    IdentifierRow, LEDGER_TABLE, LedgerEntry, Rename, RepairPredicate, TableRef, TypeDecl,
    VIOLATION_SAMPLE_LIMIT,
};
use serde_json::Value;
use tokio::sync::Mutex;

use self::eval::{Row, as_text, count};
use crate::error::StorageError;
use crate::traits::{
    DataStore, DuplicateGroup, ForeignKeyRef, LedgerStore, SchemaCatalog, SchemaDdl,
};

#[derive(Debug, Clone)]
struct MemColumn {
    name: String,
    type_decl: TypeDecl,
    comment: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct MemTable {
    columns: Vec<MemColumn>,
    rows: Vec<Row>,
    next_serial: i64,
}

impl MemTable {
    fn column(&self, name: &str) -> Option<&MemColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }
}

#[derive(Debug, Clone)]
enum ConstraintKind {
    Unique(Vec<String>),
    ForeignKey { column: String, target_table: String, target_column: String },
    Check(CheckExpr),
}

#[derive(Debug, Clone)]
struct MemConstraint {
    table: String,
    kind: ConstraintKind,
}

#[derive(Debug, Clone)]
struct MemIndex {
    table: String,
    columns: Vec<String>,
    unique: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, MemTable>,
    constraints: BTreeMap<String, MemConstraint>,
    indexes: BTreeMap<String, MemIndex>,
    ledger: Option<Vec<LedgerEntry>>,
}

impl MemoryState {
    fn table(&self, key: &str) -> Result<&MemTable, StorageError> {
        self.tables.get(key).ok_or_else(|| StorageError::missing("table", key))
    }

    fn table_mut(&mut self, key: &str) -> Result<&mut MemTable, StorageError> {
        self.tables.get_mut(key).ok_or_else(|| StorageError::missing("table", key))
    }

    fn column_in(&self, key: &str, column: &str) -> Result<&MemTable, StorageError> {
        let table = self.table(key)?;
        if table.has_column(column) {
            Ok(table)
        } else {
            Err(StorageError::missing("column", format!("{key}.{column}")))
        }
    }

    fn columns_in(&self, key: &str, columns: &[String]) -> Result<&MemTable, StorageError> {
        let table = self.table(key)?;
        for column in columns {
            self.column_in(key, column)?;
        }
        Ok(table)
    }

    fn orphans(
        &self,
        key: &str,
        column: &str,
        target: &str,
        target_column: &str,
    ) -> Result<u64, StorageError> {
        let targets: HashSet<String> = self
            .column_in(target, target_column)?
            .rows
            .iter()
            .filter_map(|row| as_text(row.get(target_column)))
            .collect();
        let source = self.column_in(key, column)?;
        Ok(count(
            source
                .rows
                .iter()
                .filter_map(|row| as_text(row.get(column)))
                .filter(|value| !targets.contains(value))
                .count(),
        ))
    }

    /// Reject `row` if it would break a constraint on `key`. `own` is the
    /// row's position when it is already stored, so it is not its own duplicate.
    fn check_row(&self, key: &str, row: &Row, own: Option<usize>) -> Result<(), StorageError> {
        let table = self.table(key)?;
        for column in &table.columns {
            if column.type_decl.is_not_null() && as_text(row.get(&column.name)).is_none() {
                return Err(StorageError::violation(
                    format!("null value in column {key}.{} violates not-null", column.name),
                    1,
                    Vec::new(),
                ));
            }
        }

        let unique_sets = self
            .constraints
            .iter()
            .filter(|(_, c)| c.table == key)
            .filter_map(|(name, c)| match &c.kind {
                ConstraintKind::Unique(cols) => Some((name, cols)),
                _ => None,
            })
            .chain(
                self.indexes
                    .iter()
                    .filter(|(_, i)| i.table == key && i.unique)
                    .map(|(name, i)| (name, &i.columns)),
            );
        for (name, columns) in unique_sets {
            if let Some(values) = eval::tuple(row, columns)
                && table
                    .rows
                    .iter()
                    .enumerate()
                    .any(|(i, r)| Some(i) != own && eval::tuple(r, columns).as_ref() == Some(&values))
            {
                return Err(StorageError::violation(
                    format!("duplicate key value violates unique constraint {name}"),
                    1,
                    vec![values.join(", ")],
                ));
            }
        }

        for (name, constraint) in self.constraints.iter().filter(|(_, c)| c.table == key) {
            match &constraint.kind {
                ConstraintKind::Check(check) => {
                    if !eval::check_passes(check, row)? {
                        return Err(StorageError::violation(
                            format!("new row violates check constraint {name}"),
                            1,
                            Vec::new(),
                        ));
                    }
                },
                ConstraintKind::ForeignKey { column, target_table, target_column } => {
                    if let Some(value) = as_text(row.get(column)) {
                        let found = self
                            .table(target_table)?
                            .rows
                            .iter()
                            .any(|r| as_text(r.get(target_column)).as_ref() == Some(&value));
                        if !found {
                            return Err(StorageError::violation(
                                format!("insert violates foreign key constraint {name}"),
                                1,
                                vec![value],
                            ));
                        }
                    }
                },
                ConstraintKind::Unique(_) => {},
            }
        }
        Ok(())
    }

    /// Replace the rows of `key` as one statement would. The rewritten rows
    /// must satisfy the table's constraints, and rows of other tables that
    /// reference this one must still find their targets. On failure the old
    /// rows are restored.
    fn rewrite_rows(
        &mut self,
        key: &str,
        rows: Vec<Row>,
        changed: &[usize],
    ) -> Result<(), StorageError> {
        let previous = std::mem::replace(&mut self.table_mut(key)?.rows, rows);
        if let Err(err) = self.validate_rewrite(key, changed) {
            self.table_mut(key)?.rows = previous;
            return Err(err);
        }
        Ok(())
    }

    fn validate_rewrite(&self, key: &str, changed: &[usize]) -> Result<(), StorageError> {
        let table = self.table(key)?;
        for &i in changed {
            if let Some(row) = table.rows.get(i) {
                self.check_row(key, row, Some(i))?;
            }
        }

        for (name, constraint) in &self.constraints {
            if let ConstraintKind::ForeignKey { column, target_table, target_column } =
                &constraint.kind
                && target_table == key
            {
                let orphans = self.orphans(&constraint.table, column, key, target_column)?;
                if orphans > 0 {
                    return Err(StorageError::violation(
                        format!("update on {key} violates foreign key constraint {name}"),
                        orphans,
                        Vec::new(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Catalog and table store held in process memory.
#[derive(Clone, Debug)]
pub struct MemorySchema {
    state: Arc<Mutex<MemoryState>>,
    schema: String,
}

impl Default for MemorySchema {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEMA)
    }
}

impl MemorySchema {
    #[must_use]
    pub fn new(schema: &str) -> Self {
        Self { state: Arc::new(Mutex::new(MemoryState::default())), schema: schema.to_owned() }
    }

    fn key(&self, table: &TableRef) -> String {
        table.key_in(&self.schema)
    }

    fn object_key(&self, schema: Option<&Ident>, name: &Ident) -> String {
        format!("{}.{name}", schema.map_or(self.schema.as_str(), Ident::as_str))
    }

    fn names(columns: &[Ident]) -> Vec<String> {
        columns.iter().map(|c| c.as_str().to_owned()).collect()
    }

    /// Insert a row given as a JSON object. Omitted columns take their serial
    /// value, their default, or NULL. Constraints already on the table apply.
    pub async fn insert_row(&self, table: &str, row: Value) -> Result<(), StorageError> {
        let table: TableRef = table.parse()?;
        let key = self.key(&table);
        let Value::Object(given) = row else {
            return Err(StorageError::Malformed(format!("row for {key} must be a JSON object")));
        };

        let mut state = self.state.lock().await;
        let mem = state.table(&key)?;
        if let Some(unknown) = given.keys().find(|k| !mem.has_column(k)) {
            return Err(StorageError::missing("column", format!("{key}.{unknown}")));
        }

        let mut serial = mem.next_serial;
        let mut full = Row::new();
        for column in &mem.columns {
            let value = match given.get(&column.name) {
                Some(value) => value.clone(),
                None if eval::is_serial(&column.type_decl) => {
                    serial += 1;
                    Value::Number(serial.into())
                },
                None => match column.type_decl.default_literal() {
                    Some(literal) => eval::parse_default(literal)?,
                    None => Value::Null,
                },
            };
            full.insert(column.name.clone(), value);
        }
        state.check_row(&key, &full, None)?;

        let mem = state.table_mut(&key)?;
        mem.next_serial = serial;
        mem.rows.push(full);
        Ok(())
    }

    /// Snapshot of a table's rows, in insertion order.
    pub async fn rows(&self, table: &str) -> Result<Vec<Value>, StorageError> {
        let table: TableRef = table.parse()?;
        let state = self.state.lock().await;
        Ok(state
            .table(&self.key(&table))?
            .rows
            .iter()
            .map(|row| Value::Object(row.clone().into_iter().collect()))
            .collect())
    }

    pub async fn column_comment(
        &self,
        table: &str,
        column: &str,
    ) -> Result<Option<String>, StorageError> {
        let table: TableRef = table.parse()?;
        let key = self.key(&table);
        let state = self.state.lock().await;
        Ok(state.column_in(&key, column)?.column(column).and_then(|c| c.comment.clone()))
    }

    pub async fn column_type(&self, table: &str, column: &str) -> Result<String, StorageError> {
        let table: TableRef = table.parse()?;
        let key = self.key(&table);
        let state = self.state.lock().await;
        Ok(state
            .column_in(&key, column)?
            .column(column)
            .map(|c| c.type_decl.to_string())
            .unwrap_or_default())
    }
}

#[async_trait]
impl SchemaCatalog for MemorySchema {
    fn default_schema(&self) -> &str {
        &self.schema
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool, StorageError> {
        Ok(self.state.lock().await.tables.contains_key(&self.key(table)))
    }

    async fn column_exists(&self, table: &TableRef, column: &Ident) -> Result<bool, StorageError> {
        let state = self.state.lock().await;
        Ok(state.tables.get(&self.key(table)).is_some_and(|t| t.has_column(column.as_str())))
    }

    async fn constraint_exists(
        &self,
        constraint: &Ident,
        schema: Option<&Ident>,
    ) -> Result<bool, StorageError> {
        let state = self.state.lock().await;
        Ok(state.constraints.contains_key(&self.object_key(schema, constraint)))
    }

    async fn index_exists(
        &self,
        index: &Ident,
        schema: Option<&Ident>,
    ) -> Result<bool, StorageError> {
        let state = self.state.lock().await;
        Ok(state.indexes.contains_key(&self.object_key(schema, index)))
    }
}

#[async_trait]
impl SchemaDdl for MemorySchema {
    async fn add_column(
        &self,
        table: &TableRef,
        column: &Ident,
        type_decl: &TypeDecl,
        comment: Option<&str>,
    ) -> Result<(), StorageError> {
        let key = self.key(table);
        let mut state = self.state.lock().await;
        let mem = state.table_mut(&key)?;
        if mem.has_column(column.as_str()) {
            return Err(StorageError::AlreadyExists(format!(
                "column {column} of relation {key} already exists"
            )));
        }

        let serial = eval::is_serial(type_decl);
        let fill = match type_decl.default_literal() {
            Some(literal) => eval::parse_default(literal)?,
            None => Value::Null,
        };
        if type_decl.is_not_null() && !serial && fill.is_null() && !mem.rows.is_empty() {
            return Err(StorageError::violation(
                format!("column {column} of relation {key} contains null values"),
                count(mem.rows.len()),
                Vec::new(),
            ));
        }

        for row in &mut mem.rows {
            let value = if serial {
                mem.next_serial += 1;
                Value::Number(mem.next_serial.into())
            } else {
                fill.clone()
            };
            row.insert(column.as_str().to_owned(), value);
        }
        mem.columns.push(MemColumn {
            name: column.as_str().to_owned(),
            type_decl: type_decl.clone(),
            comment: comment.map(str::to_owned),
        });
        Ok(())
    }

    async fn add_unique_constraint(
        &self,
        table: &TableRef,
        constraint: &Ident,
        columns: &[Ident],
    ) -> Result<(), StorageError> {
        let key = self.key(table);
        let name = self.object_key(table.schema.as_ref(), constraint);
        let columns = Self::names(columns);
        let mut state = self.state.lock().await;
        if state.constraints.contains_key(&name) || state.indexes.contains_key(&name) {
            return Err(StorageError::AlreadyExists(format!("relation {name} already exists")));
        }

        let rows = &state.columns_in(&key, &columns)?.rows;
        let groups = eval::duplicate_groups(rows, &columns, usize::MAX);
        if !groups.is_empty() {
            return Err(StorageError::violation(
                format!("could not create unique constraint {name}"),
                groups.iter().map(|g| g.count).sum(),
                groups.iter().take(VIOLATION_SAMPLE_LIMIT).map(DuplicateGroup::describe).collect(),
            ));
        }

        state.indexes.insert(
            name.clone(),
            MemIndex { table: key.clone(), columns: columns.clone(), unique: true },
        );
        state
            .constraints
            .insert(name, MemConstraint { table: key, kind: ConstraintKind::Unique(columns) });
        Ok(())
    }

    async fn add_foreign_key(&self, fk: ForeignKeyRef<'_>) -> Result<(), StorageError> {
        let key = self.key(fk.table);
        let target = self.key(fk.target_table);
        let name = self.object_key(fk.table.schema.as_ref(), fk.constraint);
        let mut state = self.state.lock().await;
        if state.constraints.contains_key(&name) {
            return Err(StorageError::AlreadyExists(format!(
                "constraint {} for relation {key} already exists",
                fk.constraint
            )));
        }

        let orphans = state.orphans(&key, fk.column.as_str(), &target, fk.target_column.as_str())?;
        if orphans > 0 {
            return Err(StorageError::violation(
                format!("{key}.{} violates foreign key constraint {name}", fk.column),
                orphans,
                Vec::new(),
            ));
        }

        state.constraints.insert(
            name,
            MemConstraint {
                table: key,
                kind: ConstraintKind::ForeignKey {
                    column: fk.column.as_str().to_owned(),
                    target_table: target,
                    target_column: fk.target_column.as_str().to_owned(),
                },
            },
        );
        Ok(())
    }

    async fn add_check_constraint(
        &self,
        table: &TableRef,
        constraint: &Ident,
        check: &CheckExpr,
    ) -> Result<(), StorageError> {
        let key = self.key(table);
        let name = self.object_key(table.schema.as_ref(), constraint);
        let mut state = self.state.lock().await;
        if state.constraints.contains_key(&name) {
            return Err(StorageError::AlreadyExists(format!(
                "constraint {constraint} for relation {key} already exists"
            )));
        }

        let mem = state.column_in(&key, eval::check_column(check)?)?;
        let mut violations = 0_u64;
        for row in &mem.rows {
            if !eval::check_passes(check, row)? {
                violations += 1;
            }
        }
        if violations > 0 {
            return Err(StorageError::violation(
                format!("check constraint {name} is violated by some row"),
                violations,
                Vec::new(),
            ));
        }

        state
            .constraints
            .insert(name, MemConstraint { table: key, kind: ConstraintKind::Check(check.clone()) });
        Ok(())
    }

    async fn create_index(
        &self,
        table: &TableRef,
        index: &Ident,
        columns: &[Ident],
        unique: bool,
    ) -> Result<(), StorageError> {
        let key = self.key(table);
        let name = self.object_key(table.schema.as_ref(), index);
        let columns = Self::names(columns);
        let mut state = self.state.lock().await;
        if state.indexes.contains_key(&name) || state.tables.contains_key(&name) {
            return Err(StorageError::AlreadyExists(format!("relation {name} already exists")));
        }

        let mem = state.columns_in(&key, &columns)?;
        if unique {
            let groups = eval::duplicate_groups(&mem.rows, &columns, usize::MAX);
            if !groups.is_empty() {
                return Err(StorageError::violation(
                    format!("could not create unique index {name}"),
                    groups.iter().map(|g| g.count).sum(),
                    groups
                        .iter()
                        .take(VIOLATION_SAMPLE_LIMIT)
                        .map(DuplicateGroup::describe)
                        .collect(),
                ));
            }
        }

        state.indexes.insert(name, MemIndex { table: key, columns, unique });
        Ok(())
    }

    async fn create_table(
        &self,
        table: &TableRef,
        columns: &[ColumnDef],
        primary_key: &[Ident],
    ) -> Result<(), StorageError> {
        let key = self.key(table);
        let mut state = self.state.lock().await;
        if state.tables.contains_key(&key) || state.indexes.contains_key(&key) {
            return Err(StorageError::AlreadyExists(format!("relation {key} already exists")));
        }

        let mem = MemTable {
            columns: columns
                .iter()
                .map(|c| MemColumn {
                    name: c.name.as_str().to_owned(),
                    type_decl: c.type_decl.clone(),
                    comment: c.comment.clone(),
                })
                .collect(),
            ..MemTable::default()
        };
        state.tables.insert(key.clone(), mem);

        if !primary_key.is_empty() {
            let pkey = format!("{key}_pkey");
            let columns = Self::names(primary_key);
            state.indexes.insert(
                pkey.clone(),
                MemIndex { table: key.clone(), columns: columns.clone(), unique: true },
            );
            state.constraints.insert(
                pkey,
                MemConstraint { table: key, kind: ConstraintKind::Unique(columns) },
            );
        }
        Ok(())
    }
}

#[async_trait]
impl DataStore for MemorySchema {
    async fn count_matching(
        &self,
        table: &TableRef,
        column: &Ident,
        predicate: &RepairPredicate,
    ) -> Result<u64, StorageError> {
        let state = self.state.lock().await;
        let mem = state.column_in(&self.key(table), column.as_str())?;
        Ok(count(
            mem.rows
                .iter()
                .filter(|row| predicate.matches(as_text(row.get(column.as_str())).as_deref()))
                .count(),
        ))
    }

    async fn count_check_violations(
        &self,
        table: &TableRef,
        check: &CheckExpr,
    ) -> Result<u64, StorageError> {
        let state = self.state.lock().await;
        let mem = state.column_in(&self.key(table), eval::check_column(check)?)?;
        let mut violations = 0_u64;
        for row in &mem.rows {
            if !eval::check_passes(check, row)? {
                violations += 1;
            }
        }
        Ok(violations)
    }

    async fn count_orphans(&self, fk: ForeignKeyRef<'_>) -> Result<u64, StorageError> {
        let state = self.state.lock().await;
        state.orphans(
            &self.key(fk.table),
            fk.column.as_str(),
            &self.key(fk.target_table),
            fk.target_column.as_str(),
        )
    }

    async fn find_duplicates(
        &self,
        table: &TableRef,
        columns: &[Ident],
        limit: usize,
    ) -> Result<Vec<DuplicateGroup>, StorageError> {
        let columns = Self::names(columns);
        let state = self.state.lock().await;
        let mem = state.columns_in(&self.key(table), &columns)?;
        Ok(eval::duplicate_groups(&mem.rows, &columns, limit))
    }

    async fn backfill(&self, spec: &BackfillSpec) -> Result<u64, StorageError> {
        let key = self.key(&spec.table);
        let column = spec.column.as_str();
        let mut state = self.state.lock().await;
        state.column_in(&key, column)?;
        if let BackfillValue::FromColumn { column: source } = &spec.value {
            state.column_in(&key, source.as_str())?;
        }

        let mut rows = state.table(&key)?.rows.clone();
        let mut changed = Vec::new();
        for (i, row) in rows.iter_mut().enumerate() {
            if spec.when.matches(as_text(row.get(column)).as_deref()) {
                let value = eval::backfill_value(&spec.value, row, column);
                row.insert(column.to_owned(), value);
                changed.push(i);
            }
        }
        state.rewrite_rows(&key, rows, &changed)?;
        Ok(count(changed.len()))
    }

    async fn load_identifier_rows(
        &self,
        spec: &DedupSpec,
    ) -> Result<Vec<IdentifierRow>, StorageError> {
        let key = self.key(&spec.table);
        let columns = Self::names(&[
            spec.key_column.clone(),
            spec.column.clone(),
            spec.created_column.clone(),
        ]);
        let state = self.state.lock().await;
        let mem = state.columns_in(&key, &columns)?;

        let mut rows = Vec::new();
        for row in &mem.rows {
            let Some(value) = as_text(row.get(spec.column.as_str())) else {
                continue;
            };
            rows.push(IdentifierRow {
                key: as_text(row.get(spec.key_column.as_str())).unwrap_or_default(),
                value,
                created_at: eval::parse_timestamp(row.get(spec.created_column.as_str()))?,
            });
        }
        Ok(rows)
    }

    async fn apply_renames(
        &self,
        spec: &DedupSpec,
        renames: &[Rename],
    ) -> Result<u64, StorageError> {
        let key = self.key(&spec.table);
        let (key_column, column) = (spec.key_column.as_str(), spec.column.as_str());
        let mut state = self.state.lock().await;
        state.columns_in(&key, &[key_column.to_owned(), column.to_owned()])?;

        let mut rows = state.table(&key)?.rows.clone();
        let mut changed = Vec::new();
        for rename in renames {
            for (i, row) in rows.iter_mut().enumerate() {
                let same_key = as_text(row.get(key_column)).as_deref() == Some(rename.key.as_str());
                let same_value = as_text(row.get(column)).as_deref() == Some(rename.from.as_str());
                if same_key && same_value {
                    row.insert(column.to_owned(), Value::String(rename.to.clone()));
                    changed.push(i);
                }
            }
        }
        state.rewrite_rows(&key, rows, &changed)?;
        Ok(count(changed.len()))
    }
}

#[async_trait]
impl LedgerStore for MemorySchema {
    async fn ensure_ledger(&self) -> Result<(), StorageError> {
        self.state.lock().await.ledger.get_or_insert_with(Vec::new);
        Ok(())
    }

    async fn ledger_entries(&self) -> Result<Vec<LedgerEntry>, StorageError> {
        Ok(self.state.lock().await.ledger.clone().unwrap_or_default())
    }

    async fn record_step(
        &self,
        step_id: &str,
        checksum: &str,
        rows_affected: u64,
        applied_by: &str,
    ) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        let ledger = state
            .ledger
            .as_mut()
            .ok_or_else(|| StorageError::missing("table", LEDGER_TABLE))?;
        let entry = LedgerEntry {
            step_id: step_id.to_owned(),
            checksum: checksum.to_owned(),
            rows_affected: i64::try_from(rows_affected).unwrap_or(i64::MAX),
            applied_at: Utc::now(),
            applied_by: Some(applied_by.to_owned()),
        };
        ledger.retain(|e| e.step_id != step_id);
        ledger.push(entry);
        Ok(())
    }

    async fn forget_step(&self, step_id: &str) -> Result<bool, StorageError> {
        let mut state = self.state.lock().await;
        let Some(ledger) = state.ledger.as_mut() else {
            return Ok(false);
        };
        let before = ledger.len();
        ledger.retain(|e| e.step_id != step_id);
        Ok(ledger.len() < before)
    }
}
