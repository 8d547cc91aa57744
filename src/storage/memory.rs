use super::{Catalog, Table, TableSchema};
use crate::core::{DbError, Result, Row, Value};
use crate::transaction::Change;
use std::collections::HashMap;
use tracing::{Level, event};

#[derive(Debug, Default)]
pub struct InMemoryStorage {
    tables: HashMap<String, Table>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&mut self, schema: TableSchema) -> Result<()> {
        let name = schema.name().to_string();

        if self.tables.contains_key(&name) {
            return Err(DbError::TableExists(name));
        }

        self.tables.insert(name, Table::new(schema));
        Ok(())
    }

    pub fn drop_table(&mut self, table_name: &str) -> Result<()> {
        if self.tables.remove(table_name).is_none() {
            return Err(DbError::TableNotFound(table_name.to_string()));
        }
        Ok(())
    }

    /// Drops every catalog table that exists, then creates all of them empty.
    pub fn recreate(&mut self, catalog: &Catalog) -> Result<()> {
        for name in catalog.list_tables() {
            self.tables.remove(name);
        }
        for schema in catalog.tables() {
            self.create_table(schema.clone())?;
        }
        Ok(())
    }

    pub fn get_table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    fn get_table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn allocate_id(&mut self, table_name: &str) -> Result<i64> {
        Ok(self.get_table_mut(table_name)?.allocate_id())
    }

    pub fn get_row(&self, table_name: &str, id: i64) -> Result<Option<Row>> {
        Ok(self.get_table(table_name)?.get(id))
    }

    pub fn find_rows(&self, table_name: &str, column: &str, value: &Value) -> Result<Vec<Row>> {
        self.get_table(table_name)?.find_by(column, value)
    }

    pub fn row_count(&self, table_name: &str) -> Result<usize> {
        Ok(self.get_table(table_name)?.row_count())
    }

    pub fn table_reads(&self, table_name: &str) -> Result<u64> {
        Ok(self.get_table(table_name)?.reads())
    }

    /// Applies `changes` in order. If one fails, the already applied prefix
    /// is reverted before the error is returned.
    pub fn apply(&mut self, changes: &[Change]) -> Result<()> {
        for (applied, change) in changes.iter().enumerate() {
            if let Err(err) = self.apply_one(change) {
                for done in changes[..applied].iter().rev() {
                    if let Err(revert_err) = self.apply_one(&done.inverse()) {
                        event!(
                            Level::ERROR,
                            table = done.table_name(),
                            error = %revert_err,
                            "failed to revert applied change"
                        );
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn apply_one(&mut self, change: &Change) -> Result<()> {
        match change {
            Change::InsertRow { table, id, row } => {
                self.check_foreign_keys(table, row)?;
                self.get_table_mut(table)?.insert(*id, row.clone())
            }
            Change::DeleteRow { table, id, .. } => {
                self.get_table_mut(table)?.remove(*id).map(|_| ()).ok_or_else(|| {
                    DbError::ConstraintViolation(format!(
                        "Row {} in table '{}' was already deleted",
                        id, table
                    ))
                })
            }
        }
    }

    fn check_foreign_keys(&self, table_name: &str, row: &Row) -> Result<()> {
        let table = self.get_table(table_name)?;
        for (idx, column) in table.schema().schema().columns().iter().enumerate() {
            let Some(fk) = &column.references else {
                continue;
            };
            let Some(value) = row.get(idx) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let target_id = value.as_i64().ok_or_else(|| {
                DbError::TypeMismatch(format!(
                    "Foreign key '{}' must be an INTEGER, got {}",
                    column.name,
                    value.type_name()
                ))
            })?;
            if !self.get_table(&fk.table)?.contains(target_id) {
                return Err(DbError::ConstraintViolation(format!(
                    "Column '{}' references non-existent key {} in '{}'",
                    column.name, target_id, fk.table
                )));
            }
        }
        Ok(())
    }
}
