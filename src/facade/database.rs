use crate::core::{Result, Row};
use crate::storage::{Catalog, InMemoryStorage, TableSchema};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

// Named databases live for the whole process, so a later session factory
// opened with `SchemaMode::None` sees the rows an earlier one wrote.
lazy_static! {
    static ref DATABASES: Mutex<HashMap<String, Arc<Database>>> = Mutex::new(HashMap::new());
}

/// An in-memory database: the storage backend behind every session.
#[derive(Debug)]
pub struct Database {
    name: String,
    storage: RwLock<InMemoryStorage>,
}

impl Database {
    /// Creates a private database not reachable by name.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            storage: RwLock::new(InMemoryStorage::new()),
        })
    }

    /// Returns the process-wide database called `name`, creating it empty on
    /// first use.
    pub async fn named(name: &str) -> Arc<Self> {
        let mut databases = DATABASES.lock().await;
        databases
            .entry(name.to_string())
            .or_insert_with(|| Self::new(name))
            .clone()
    }

    /// Forgets the process-wide database called `name`. Sessions that still
    /// hold it keep working on the detached instance.
    pub async fn drop_named(name: &str) -> bool {
        DATABASES.lock().await.remove(name).is_some()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn storage(&self) -> &RwLock<InMemoryStorage> {
        &self.storage
    }

    /// Drops and recreates every table in `catalog`.
    pub async fn recreate(&self, catalog: &Catalog) -> Result<()> {
        self.storage.write().await.recreate(catalog)
    }

    pub async fn list_tables(&self) -> Vec<String> {
        self.storage.read().await.list_tables()
    }

    pub async fn table_schema(&self, table: &str) -> Result<TableSchema> {
        Ok(self.storage.read().await.get_table(table)?.schema().clone())
    }

    pub async fn row_count(&self, table: &str) -> Result<usize> {
        self.storage.read().await.row_count(table)
    }

    /// Number of row lookups served by `table` so far.
    pub async fn table_reads(&self, table: &str) -> Result<u64> {
        self.storage.read().await.table_reads(table)
    }

    /// Raw committed row, in table column order. Counts as a read.
    pub async fn get_row(&self, table: &str, id: i64) -> Result<Option<Row>> {
        self.storage.read().await.get_row(table, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_named_databases_are_shared() {
        let name = format!("db_{}", uuid::Uuid::new_v4());
        let a = Database::named(&name).await;
        let b = Database::named(&name).await;
        assert!(Arc::ptr_eq(&a, &b));

        assert!(Database::drop_named(&name).await);
        let c = Database::named(&name).await;
        assert!(!Arc::ptr_eq(&a, &c));
        Database::drop_named(&name).await;
    }

    #[tokio::test]
    async fn test_private_database_is_empty() {
        let db = Database::new("scratch");
        assert_eq!(db.name(), "scratch");
        assert!(db.list_tables().await.is_empty());
        assert!(db.row_count("student").await.is_err());
    }
}
