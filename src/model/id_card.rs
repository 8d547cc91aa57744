use super::{Entity, Student, ensure_type};
use crate::core::{DataType, Result, Value};
use crate::mapping::{EntityDescriptor, FetchMode};
use crate::record::{EntityRecord, Related};
use std::fmt;

/// Inverse side of the `Student` / `IdCard` one-to-one. Its table has no
/// foreign key; the holder is found through `student.id_card_id`.
#[derive(Clone, Default)]
pub struct IdCard {
    id: Option<i64>,
    pub active: bool,
    student: Related,
}

impl IdCard {
    pub fn new(active: bool) -> Self {
        Self {
            id: None,
            active,
            student: Related::Absent,
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    /// Id of the holder when known without a lookup.
    pub fn student_id(&self) -> Option<i64> {
        self.student.id()
    }

    pub fn is_student_loaded(&self) -> bool {
        matches!(self.student, Related::Loaded(_))
    }

    pub async fn student(&self) -> Result<Option<Student>> {
        match self.student.get().await? {
            Some(record) => Ok(Some(Student::from_record(record)?)),
            None => Ok(None),
        }
    }

    pub fn related(&self) -> &Related {
        &self.student
    }
}

impl Entity for IdCard {
    const TYPE_NAME: &'static str = "IdCard";

    fn descriptor(fetch: FetchMode) -> Result<EntityDescriptor> {
        EntityDescriptor::builder(Self::TYPE_NAME)
            .table("id_card")
            .id("id")
            .field("active", DataType::Boolean)
            .inverse_one("student", Student::TYPE_NAME, "id_card")
            .fetch(fetch)
            .build()
    }

    fn to_record(&self) -> EntityRecord {
        let mut record = EntityRecord::new(Self::TYPE_NAME)
            .with("active", self.active)
            .with_related(self.student.clone());
        if let Some(id) = self.id {
            record.set_id(id);
        }
        record
    }

    fn from_record(record: EntityRecord) -> Result<Self> {
        ensure_type(&record, Self::TYPE_NAME)?;
        Ok(Self {
            id: record.id(),
            active: record
                .get("active")
                .and_then(Value::as_bool)
                .unwrap_or_default(),
            student: record.related().clone(),
        })
    }
}

impl fmt::Debug for IdCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdCard")
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}
