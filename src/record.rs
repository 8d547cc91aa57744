use crate::core::{DbError, Result, Value};
use crate::proxy::LazyRef;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fmt;

/// A mapped entity as the session sees it: scalar values by field name, the
/// primary key once assigned, and the one relationship slot.
#[derive(Clone)]
pub struct EntityRecord {
    type_name: String,
    id: Option<i64>,
    fields: BTreeMap<String, Value>,
    related: Related,
}

impl EntityRecord {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: None,
            fields: BTreeMap::new(),
            related: Related::Absent,
        }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn with_related(mut self, related: Related) -> Self {
        self.related = related;
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// `None` until the record has been persisted.
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn related(&self) -> &Related {
        &self.related
    }

    pub fn related_mut(&mut self) -> &mut Related {
        &mut self.related
    }

    pub fn set_related(&mut self, related: Related) {
        self.related = related;
    }

    pub fn require(&self, field: &str) -> Result<&Value> {
        match self.fields.get(field) {
            Some(value) if !value.is_null() => Ok(value),
            _ => Err(DbError::ConstraintViolation(format!(
                "{}.{} is missing",
                self.type_name, field
            ))),
        }
    }

    pub fn require_text(&self, field: &str) -> Result<&str> {
        let value = self.require(field)?;
        value.as_str().ok_or_else(|| self.mismatch(field, "TEXT", value))
    }

    pub fn require_bool(&self, field: &str) -> Result<bool> {
        let value = self.require(field)?;
        value.as_bool().ok_or_else(|| self.mismatch(field, "BOOLEAN", value))
    }

    pub fn require_date(&self, field: &str) -> Result<NaiveDate> {
        let value = self.require(field)?;
        value.as_date().ok_or_else(|| self.mismatch(field, "DATE", value))
    }

    fn mismatch(&self, field: &str, expected: &str, got: &Value) -> DbError {
        DbError::TypeMismatch(format!(
            "{}.{} expects {}, got {}",
            self.type_name,
            field,
            expected,
            got.type_name()
        ))
    }
}

// The relationship slot is left out so that mutually referencing records
// never render each other.
impl fmt::Debug for EntityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct(&self.type_name);
        s.field("id", &self.id);
        for (name, value) in &self.fields {
            s.field(name, value);
        }
        s.finish()
    }
}

/// The relationship slot of a record.
#[derive(Clone, Default)]
pub enum Related {
    /// No related entity (null foreign key, or no owner points here).
    #[default]
    Absent,
    /// Related entity present in memory: loaded eagerly, or attached by the
    /// caller before persisting.
    Loaded(Box<EntityRecord>),
    /// Related entity loaded on first access.
    Lazy(LazyRef),
}

impl Related {
    pub fn loaded(record: EntityRecord) -> Self {
        Self::Loaded(Box::new(record))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Primary key of the related entity, when known without a lookup.
    pub fn id(&self) -> Option<i64> {
        match self {
            Self::Absent => None,
            Self::Loaded(record) => record.id(),
            Self::Lazy(lazy) => lazy.known_id(),
        }
    }

    /// The related entity, resolving a lazy reference if needed.
    pub async fn get(&self) -> Result<Option<EntityRecord>> {
        match self {
            Self::Absent => Ok(None),
            Self::Loaded(record) => Ok(Some((**record).clone())),
            Self::Lazy(lazy) => Ok(lazy.get().await?.map(|record| (*record).clone())),
        }
    }
}

impl fmt::Debug for Related {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "Absent"),
            Self::Loaded(record) => match record.id() {
                Some(id) => write!(f, "Loaded({}#{})", record.type_name(), id),
                None => write!(f, "Loaded({}, transient)", record.type_name()),
            },
            Self::Lazy(lazy) => write!(f, "{:?}", lazy),
        }
    }
}
