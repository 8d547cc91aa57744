use crate::core::{Column, DbError, Result, Row, Schema, Value};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSchema {
    name: String,
    schema: Schema,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            schema: Schema::new(columns),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn has_foreign_key(&self) -> bool {
        self.schema.foreign_keys().next().is_some()
    }
}

/// Rows of one table keyed by primary key.
///
/// Every lookup through [`get`](Self::get) or [`find_by`](Self::find_by)
/// bumps a read counter, which is how callers observe whether a load touched
/// this table at all.
#[derive(Debug)]
pub struct Table {
    schema: TableSchema,
    rows: BTreeMap<i64, Row>,
    next_id: i64,
    reads: AtomicU64,
}

impl Table {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            next_id: 1,
            reads: AtomicU64::new(0),
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Hands out the next auto-increment key. Keys are never reused, even if
    /// the row that would have used one is never inserted.
    pub fn allocate_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn insert(&mut self, id: i64, row: Row) -> Result<()> {
        self.validate_row(&row)?;

        let pk_idx = self.primary_key_index()?;
        if row[pk_idx] != Value::Integer(id) {
            return Err(DbError::ConstraintViolation(format!(
                "Primary key of row does not match id {} in table '{}'",
                id,
                self.schema.name()
            )));
        }
        if self.rows.contains_key(&id) {
            return Err(DbError::ConstraintViolation(format!(
                "Duplicate primary key {} in table '{}'",
                id,
                self.schema.name()
            )));
        }

        self.check_unique(&row)?;

        self.rows.insert(id, row);
        Ok(())
    }

    fn check_unique(&self, row: &Row) -> Result<()> {
        for (idx, column) in self.schema.schema().columns().iter().enumerate() {
            if !column.unique || row[idx].is_null() {
                continue;
            }
            if self.rows.values().any(|existing| existing[idx] == row[idx]) {
                return Err(DbError::ConstraintViolation(format!(
                    "Duplicate value {} for unique column '{}' in table '{}'",
                    row[idx],
                    column.name,
                    self.schema.name()
                )));
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, id: i64) -> Option<Row> {
        self.rows.remove(&id)
    }

    pub fn get(&self, id: i64) -> Option<Row> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.rows.get(&id).cloned()
    }

    /// Looks a row up without counting it as a read. Used for constraint
    /// checks.
    pub fn contains(&self, id: i64) -> bool {
        self.rows.contains_key(&id)
    }

    pub fn find_by(&self, column: &str, value: &Value) -> Result<Vec<Row>> {
        let idx = self.schema.schema().find_column_index(column).ok_or_else(|| {
            DbError::ColumnNotFound(column.to_string(), self.schema.name().to_string())
        })?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .rows
            .values()
            .filter(|row| &row[idx] == value)
            .cloned()
            .collect())
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    fn primary_key_index(&self) -> Result<usize> {
        self.schema.schema().primary_key_index().ok_or_else(|| {
            DbError::ExecutionError(format!("Table '{}' has no primary key", self.schema.name()))
        })
    }

    fn validate_row(&self, row: &Row) -> Result<()> {
        let columns = self.schema.schema().columns();
        if row.len() != columns.len() {
            return Err(DbError::ExecutionError(format!(
                "Table '{}' expects {} values, got {}",
                self.schema.name(),
                columns.len(),
                row.len()
            )));
        }
        for (column, value) in columns.iter().zip(row) {
            column.validate(value)?;
        }
        Ok(())
    }
}
