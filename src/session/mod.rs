// ============================================================================
// Persistence Session
// ============================================================================
//
// A session is the unit of work over one database. Writes go straight to
// storage unless a transaction is open, in which case they are buffered and
// applied atomically at commit. Reads always see the session's own pending
// writes first.
//
// Relationship loading follows the mapping:
//   owning side, EAGER   -> related row loaded by foreign key
//   owning side, LAZY    -> LazyRef keyed by the foreign key value
//   inverse side, EAGER  -> owner row found by scanning the foreign key column
//   inverse side, LAZY   -> LazyRef that performs that scan on first access
//
// A record loaded as part of another load gets its back-reference as a
// LazyRef keyed by the already known id.
//
// ============================================================================

use crate::core::{DbError, Result, Row, Value};
use crate::facade::Database;
use crate::mapping::{EntityDescriptor, FetchMode, MappingRegistry, RelationshipSide};
use crate::model::Entity;
use crate::proxy::{EntityResolver, LazyRef, ReferenceKey};
use crate::record::{EntityRecord, Related};
use crate::storage::{Catalog, TableSchema};
use crate::transaction::{Change, PendingRow, Transaction};
use async_recursion::async_recursion;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{Instrument, Level, event, info_span};
use uuid::Uuid;

struct SessionInner {
    id: Uuid,
    db: Arc<Database>,
    registry: Arc<MappingRegistry>,
    catalog: Catalog,
    show_sql: bool,
    transaction: Mutex<Option<Transaction>>,
    closed: AtomicBool,
}

/// Handle to a persistence session. Clones share the same session, which is
/// how lazy references created by it reach back for their data.
#[derive(Clone)]
pub struct PersistSession {
    inner: Arc<SessionInner>,
}

impl PersistSession {
    pub(crate) fn new(
        db: Arc<Database>,
        registry: Arc<MappingRegistry>,
        catalog: Catalog,
        show_sql: bool,
    ) -> Self {
        let id = Uuid::new_v4();
        event!(Level::DEBUG, session = %id, database = %db.name(), "session opened");
        Self {
            inner: Arc::new(SessionInner {
                id,
                db,
                registry,
                catalog,
                show_sql,
                transaction: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn registry(&self) -> &Arc<MappingRegistry> {
        &self.inner.registry
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.inner.db
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub async fn in_transaction(&self) -> bool {
        self.inner.transaction.lock().await.is_some()
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    pub async fn begin_transaction(&self) -> Result<()> {
        self.ensure_open()?;
        let mut slot = self.inner.transaction.lock().await;
        if let Some(active) = slot.as_ref() {
            return Err(DbError::TransactionError(format!(
                "Transaction {} is already active",
                active.id()
            )));
        }
        let txn = Transaction::new();
        event!(Level::DEBUG, session = %self.inner.id, txn = %txn.id(), "transaction started");
        *slot = Some(txn);
        Ok(())
    }

    /// Applies every buffered change atomically. On failure nothing is
    /// applied and the transaction is gone.
    pub async fn commit(&self) -> Result<()> {
        self.ensure_open()?;
        let mut txn = self.take_transaction().await?;
        let txn_id = txn.id();
        let changes = txn.commit()?;

        self.inner.db.storage().write().await.apply(&changes)?;
        event!(
            Level::INFO,
            session = %self.inner.id,
            txn = %txn_id,
            changes = changes.len(),
            "transaction committed"
        );
        Ok(())
    }

    pub async fn rollback(&self) -> Result<()> {
        self.ensure_open()?;
        let mut txn = self.take_transaction().await?;
        let discarded = txn.rollback()?;
        event!(
            Level::INFO,
            session = %self.inner.id,
            txn = %txn.id(),
            discarded,
            "transaction rolled back"
        );
        Ok(())
    }

    /// Closes the session, discarding any uncommitted transaction. Closing
    /// twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(mut txn) = self.inner.transaction.lock().await.take() {
            let discarded = txn.rollback()?;
            event!(
                Level::WARN,
                session = %self.inner.id,
                txn = %txn.id(),
                discarded,
                "session closed with an open transaction"
            );
        }
        event!(Level::DEBUG, session = %self.inner.id, "session closed");
        Ok(())
    }

    async fn take_transaction(&self) -> Result<Transaction> {
        self.inner
            .transaction
            .lock()
            .await
            .take()
            .ok_or_else(|| DbError::TransactionError("No active transaction".to_string()))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(DbError::SessionClosed)
        } else {
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Persist
    // ------------------------------------------------------------------

    /// Stores a new record and assigns its primary key.
    ///
    /// If the record owns a relationship whose target has not been persisted
    /// yet, the target is persisted first. The inverse side of a relationship
    /// stores nothing.
    pub async fn persist(&self, record: &mut EntityRecord) -> Result<i64> {
        let span = info_span!(
            "session.persist",
            session = %self.inner.id,
            entity = %record.type_name()
        );
        self.persist_record(record).instrument(span).await
    }

    #[async_recursion]
    async fn persist_record(&self, record: &mut EntityRecord) -> Result<i64> {
        self.ensure_open()?;
        if let Some(id) = record.id() {
            return Err(DbError::ConstraintViolation(format!(
                "{} with id {} is already persisted",
                record.type_name(),
                id
            )));
        }

        let registry = self.inner.registry.clone();
        let descriptor = registry.resolve(record.type_name())?;
        let schema = self.inner.catalog.get_table(descriptor.table_name())?;

        for (field, _) in record.fields() {
            if descriptor.scalar_field(field).is_none() {
                return Err(DbError::ColumnNotFound(
                    field.to_string(),
                    descriptor.table_name().to_string(),
                ));
            }
        }

        let mut row = Row::with_capacity(schema.schema().column_count());
        for column in schema.schema().columns() {
            let value = if descriptor.scalar_field(&column.name).is_some() {
                let value = record.get(&column.name).cloned().unwrap_or(Value::Null);
                column.validate(&value)?;
                value
            } else {
                Value::Null
            };
            row.push(value);
        }

        match registry.relationship_of(descriptor.type_name())? {
            Some((relationship, RelationshipSide::Owning)) => {
                let target_id = match record.related_mut() {
                    Related::Absent => None,
                    Related::Loaded(target) => {
                        if target.type_name() != relationship.inverse_type() {
                            return Err(DbError::TypeMismatch(format!(
                                "{}.{} expects {}, got {}",
                                relationship.owner_type(),
                                relationship.owning_field_name(),
                                relationship.inverse_type(),
                                target.type_name()
                            )));
                        }
                        match target.id() {
                            Some(id) => Some(id),
                            None => {
                                event!(Level::DEBUG, related = %target.type_name(), "cascading persist");
                                Some(self.persist_record(target).await?)
                            }
                        }
                    }
                    Related::Lazy(lazy) => match lazy.known_id() {
                        Some(id) => Some(id),
                        None => lazy.get().await?.and_then(|target| target.id()),
                    },
                };
                let fk_idx = schema
                    .schema()
                    .find_column_index(relationship.foreign_key_column())
                    .ok_or_else(|| {
                        DbError::ColumnNotFound(
                            relationship.foreign_key_column().to_string(),
                            schema.name().to_string(),
                        )
                    })?;
                row[fk_idx] = target_id.map(Value::Integer).unwrap_or(Value::Null);
            }
            Some((relationship, RelationshipSide::Inverse)) => {
                if !record.related().is_absent() {
                    event!(
                        Level::DEBUG,
                        field = ?relationship.inverse_field_name(),
                        "inverse side is not stored; persist the owner to link it"
                    );
                }
            }
            None => {}
        }

        let id = self
            .inner
            .db
            .storage()
            .write()
            .await
            .allocate_id(schema.name())?;
        let pk_idx = schema.schema().primary_key_index().ok_or_else(|| {
            DbError::ExecutionError(format!("Table '{}' has no primary key", schema.name()))
        })?;
        row[pk_idx] = Value::Integer(id);

        self.write(
            schema,
            Change::InsertRow {
                table: schema.name().to_string(),
                id,
                row,
            },
        )
        .await?;

        record.set_id(id);
        event!(Level::DEBUG, id, "persisted");
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Find / delete
    // ------------------------------------------------------------------

    /// Loads `type_name` by primary key. A missing row is `NotFound`; no
    /// proxy is ever returned in its place.
    pub async fn find(&self, type_name: &str, id: i64) -> Result<EntityRecord> {
        let span = info_span!(
            "session.find",
            session = %self.inner.id,
            entity = %type_name,
            id
        );
        self.load(type_name, id, None).instrument(span).await
    }

    /// Removes a row. Rows of other tables that reference it are left
    /// as they are.
    pub async fn delete(&self, type_name: &str, id: i64) -> Result<()> {
        self.ensure_open()?;
        let descriptor = self.inner.registry.resolve(type_name)?;
        let schema = self.inner.catalog.get_table(descriptor.table_name())?;
        let old_row = self
            .read_row(schema.name(), id)
            .await?
            .ok_or_else(|| DbError::not_found(type_name, id))?;

        self.write(
            schema,
            Change::DeleteRow {
                table: schema.name().to_string(),
                id,
                old_row,
            },
        )
        .await
    }

    /// `back_ref` is the id of the record this one is being loaded for, if
    /// any. It becomes a lazy reference instead of a further load.
    async fn load(&self, type_name: &str, id: i64, back_ref: Option<i64>) -> Result<EntityRecord> {
        self.ensure_open()?;
        let descriptor = self.inner.registry.resolve(type_name)?;
        let schema = self.inner.catalog.get_table(descriptor.table_name())?;
        let row = self
            .read_row(schema.name(), id)
            .await?
            .ok_or_else(|| DbError::not_found(type_name, id))?;
        self.assemble(descriptor, schema, row, back_ref).await
    }

    #[async_recursion]
    async fn assemble(
        &self,
        descriptor: &EntityDescriptor,
        schema: &TableSchema,
        row: Row,
        back_ref: Option<i64>,
    ) -> Result<EntityRecord> {
        let mut record = EntityRecord::new(descriptor.type_name());
        let mut own_id = None;
        for (column, value) in schema.schema().columns().iter().zip(&row) {
            if column.primary_key {
                own_id = value.as_i64();
            } else if descriptor.scalar_field(&column.name).is_some() {
                record.set(column.name.clone(), value.clone());
            }
        }
        let own_id = own_id.ok_or_else(|| {
            DbError::ExecutionError(format!("Row in '{}' has no primary key", schema.name()))
        })?;
        record.set_id(own_id);

        let Some((relationship, side)) = self.inner.registry.relationship_of(descriptor.type_name())?
        else {
            return Ok(record);
        };
        let fetch_mode = descriptor
            .relationship_field()
            .map(|field| field.fetch_mode)
            .unwrap_or_default();

        let related = match side {
            RelationshipSide::Owning => {
                let fk_idx = schema
                    .schema()
                    .find_column_index(relationship.foreign_key_column())
                    .ok_or_else(|| {
                        DbError::ColumnNotFound(
                            relationship.foreign_key_column().to_string(),
                            schema.name().to_string(),
                        )
                    })?;
                match row[fk_idx].as_i64() {
                    None => Related::Absent,
                    Some(target_id) if back_ref.is_some() || fetch_mode == FetchMode::Lazy => {
                        Related::Lazy(self.lazy_by_id(relationship.inverse_type(), target_id))
                    }
                    Some(target_id) => {
                        match self
                            .load(relationship.inverse_type(), target_id, Some(own_id))
                            .await
                        {
                            Ok(target) => Related::loaded(target),
                            Err(DbError::NotFound { type_name, id }) => {
                                event!(
                                    Level::WARN,
                                    related = %type_name,
                                    id,
                                    "foreign key points at a missing row"
                                );
                                Related::Absent
                            }
                            Err(err) => return Err(err),
                        }
                    }
                }
            }
            RelationshipSide::Inverse => match back_ref {
                Some(owner_id) => {
                    Related::Lazy(self.lazy_by_id(relationship.owner_type(), owner_id))
                }
                None if fetch_mode == FetchMode::Lazy => Related::Lazy(LazyRef::new(
                    ReferenceKey::OwnedBy {
                        owner_type: relationship.owner_type().to_string(),
                        owning_field: relationship.owning_field_name().to_string(),
                        inverse_id: own_id,
                    },
                    self.resolver(),
                )),
                None => match self
                    .find_owner(relationship.owner_type(), relationship.owning_field_name(), own_id)
                    .await?
                {
                    Some(owner) => Related::loaded(owner),
                    None => Related::Absent,
                },
            },
        };

        record.set_related(related);
        Ok(record)
    }

    /// The `owner_type` record whose `owning_field` references `inverse_id`.
    async fn find_owner(
        &self,
        owner_type: &str,
        owning_field: &str,
        inverse_id: i64,
    ) -> Result<Option<EntityRecord>> {
        self.ensure_open()?;
        let registry = self.inner.registry.clone();
        let relationship = registry.resolve_relationship(owner_type, owning_field)?;
        let descriptor = registry.resolve(owner_type)?;
        let schema = self.inner.catalog.get_table(descriptor.table_name())?;

        let mut owners = self
            .read_rows_by(schema, relationship.foreign_key_column(), &Value::Integer(inverse_id))
            .await?;
        if owners.len() > 1 {
            event!(
                Level::WARN,
                owner = %owner_type,
                inverse_id,
                matches = owners.len(),
                "more than one owner references the same row; using the first"
            );
        }
        if owners.is_empty() {
            return Ok(None);
        }
        let row = owners.swap_remove(0);
        Ok(Some(self.assemble(descriptor, schema, row, Some(inverse_id)).await?))
    }

    fn lazy_by_id(&self, type_name: &str, id: i64) -> LazyRef {
        LazyRef::new(
            ReferenceKey::Id {
                type_name: type_name.to_string(),
                id,
            },
            self.resolver(),
        )
    }

    fn resolver(&self) -> Arc<dyn EntityResolver> {
        Arc::new(self.clone())
    }

    // ------------------------------------------------------------------
    // Typed access
    // ------------------------------------------------------------------

    /// Persists a typed entity and writes the assigned ids back into it.
    pub async fn save<E: Entity>(&self, entity: &mut E) -> Result<i64> {
        let mut record = entity.to_record();
        let id = self.persist(&mut record).await?;
        *entity = E::from_record(record)?;
        Ok(id)
    }

    pub async fn load_entity<E: Entity>(&self, id: i64) -> Result<E> {
        E::from_record(self.find(E::TYPE_NAME, id).await?)
    }

    // ------------------------------------------------------------------
    // Storage access
    // ------------------------------------------------------------------

    async fn read_row(&self, table: &str, id: i64) -> Result<Option<Row>> {
        if let Some(txn) = self.inner.transaction.lock().await.as_ref() {
            match txn.pending_row(table, id) {
                Some(PendingRow::Inserted(row)) => return Ok(Some(row)),
                Some(PendingRow::Deleted) => return Ok(None),
                None => {}
            }
        }
        self.inner.db.get_row(table, id).await
    }

    async fn read_rows_by(&self, schema: &TableSchema, column: &str, value: &Value) -> Result<Vec<Row>> {
        let column_idx = schema
            .schema()
            .find_column_index(column)
            .ok_or_else(|| DbError::ColumnNotFound(column.to_string(), schema.name().to_string()))?;
        let pk_idx = schema.schema().primary_key_index().ok_or_else(|| {
            DbError::ExecutionError(format!("Table '{}' has no primary key", schema.name()))
        })?;

        let txn = self.inner.transaction.lock().await;
        let committed = self
            .inner
            .db
            .storage()
            .read()
            .await
            .find_rows(schema.name(), column, value)?;

        let Some(txn) = txn.as_ref() else {
            return Ok(committed);
        };
        let mut rows: Vec<Row> = committed
            .into_iter()
            .filter(|row| {
                let id = row[pk_idx].as_i64().unwrap_or_default();
                txn.pending_row(schema.name(), id).is_none()
            })
            .collect();
        rows.extend(txn.pending_matches(schema.name(), column_idx, value));
        Ok(rows)
    }

    async fn write(&self, schema: &TableSchema, change: Change) -> Result<()> {
        if self.inner.show_sql {
            event!(Level::INFO, sql = %change.to_sql(schema), "sql");
        }

        let mut txn = self.inner.transaction.lock().await;
        match txn.as_mut() {
            Some(txn) => txn.record(change),
            None => {
                drop(txn);
                self.inner
                    .db
                    .storage()
                    .write()
                    .await
                    .apply(std::slice::from_ref(&change))
            }
        }
    }
}

#[async_trait]
impl EntityResolver for PersistSession {
    async fn resolve_id(&self, type_name: &str, id: i64) -> Result<EntityRecord> {
        self.find(type_name, id).await
    }

    async fn resolve_owner(
        &self,
        owner_type: &str,
        owning_field: &str,
        inverse_id: i64,
    ) -> Result<Option<EntityRecord>> {
        self.find_owner(owner_type, owning_field, inverse_id).await
    }
}

impl std::fmt::Debug for PersistSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistSession")
            .field("id", &self.inner.id)
            .field("database", &self.inner.db.name())
            .field("closed", &self.is_closed())
            .finish()
    }
}
