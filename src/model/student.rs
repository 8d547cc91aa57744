use super::{Entity, IdCard, ensure_type};
use crate::core::{DataType, DbError, Result, Value};
use crate::mapping::{EntityDescriptor, FetchMode};
use crate::record::{EntityRecord, Related};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stored as its upper-case name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StudentGroup {
    Rose,
    Lotus,
    Orchid,
}

impl StudentGroup {
    pub const ALL: [StudentGroup; 3] = [Self::Rose, Self::Lotus, Self::Orchid];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rose => "ROSE",
            Self::Lotus => "LOTUS",
            Self::Orchid => "ORCHID",
        }
    }
}

impl fmt::Display for StudentGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StudentGroup {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|group| group.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DbError::TypeMismatch(format!("Unknown student group '{}'", s)))
    }
}

/// Owning side of the `Student` / `IdCard` one-to-one: the `student` table
/// carries the `id_card_id` column.
#[derive(Clone, Default)]
pub struct Student {
    id: Option<i64>,
    pub name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub group: Option<StudentGroup>,
    id_card: Related,
}

impl Student {
    pub fn new(name: impl Into<String>, date_of_birth: NaiveDate, group: StudentGroup) -> Self {
        Self {
            id: None,
            name: name.into(),
            date_of_birth: Some(date_of_birth),
            group: Some(group),
            id_card: Related::Absent,
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    /// Links `card`; it is persisted along with the student if it has no id.
    pub fn set_id_card(&mut self, card: &IdCard) {
        self.id_card = Related::loaded(card.to_record());
    }

    pub fn clear_id_card(&mut self) {
        self.id_card = Related::Absent;
    }

    pub fn id_card_id(&self) -> Option<i64> {
        self.id_card.id()
    }

    /// Whether the card is already in memory (loaded eagerly or linked by
    /// the caller).
    pub fn is_id_card_loaded(&self) -> bool {
        matches!(self.id_card, Related::Loaded(_))
    }

    /// The linked card, loading it on first call under lazy fetch.
    pub async fn id_card(&self) -> Result<Option<IdCard>> {
        match self.id_card.get().await? {
            Some(record) => Ok(Some(IdCard::from_record(record)?)),
            None => Ok(None),
        }
    }

    pub fn related(&self) -> &Related {
        &self.id_card
    }
}

impl Entity for Student {
    const TYPE_NAME: &'static str = "Student";

    fn descriptor(fetch: FetchMode) -> Result<EntityDescriptor> {
        EntityDescriptor::builder(Self::TYPE_NAME)
            .table("student")
            .id("id")
            .required_field("name", DataType::Text)
            .field("date_of_birth", DataType::Date)
            .field(
                "group",
                DataType::enumerated(StudentGroup::ALL.iter().map(StudentGroup::as_str)),
            )
            .owns_one("id_card", IdCard::TYPE_NAME)
            .fetch(fetch)
            .build()
    }

    fn to_record(&self) -> EntityRecord {
        let mut record = EntityRecord::new(Self::TYPE_NAME)
            .with("name", self.name.as_str())
            .with(
                "date_of_birth",
                self.date_of_birth.map(Value::Date).unwrap_or(Value::Null),
            )
            .with(
                "group",
                self.group
                    .map(|group| Value::from(group.as_str()))
                    .unwrap_or(Value::Null),
            )
            .with_related(self.id_card.clone());
        if let Some(id) = self.id {
            record.set_id(id);
        }
        record
    }

    fn from_record(record: EntityRecord) -> Result<Self> {
        ensure_type(&record, Self::TYPE_NAME)?;
        let group = match record.get("group") {
            Some(Value::Text(name)) => Some(name.parse()?),
            _ => None,
        };
        Ok(Self {
            id: record.id(),
            name: record.require_text("name")?.to_string(),
            date_of_birth: record.get("date_of_birth").and_then(Value::as_date),
            group,
            id_card: record.related().clone(),
        })
    }
}

impl fmt::Debug for Student {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Student")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("date_of_birth", &self.date_of_birth)
            .field("group", &self.group)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jack() -> Student {
        Student::new(
            "Jack",
            NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
            StudentGroup::Rose,
        )
    }

    #[test]
    fn test_group_parsing() {
        assert_eq!("ROSE".parse::<StudentGroup>().unwrap(), StudentGroup::Rose);
        assert_eq!("orchid".parse::<StudentGroup>().unwrap(), StudentGroup::Orchid);
        assert!("TULIP".parse::<StudentGroup>().is_err());
        assert_eq!(StudentGroup::Lotus.to_string(), "LOTUS");
    }

    #[test]
    fn test_record_conversion() {
        let mut student = jack();
        student.set_id_card(&IdCard::new(true));
        let record = student.to_record();
        assert_eq!(record.get("group"), Some(&Value::from("ROSE")));
        assert!(matches!(record.related(), Related::Loaded(_)));

        let back = Student::from_record(record).unwrap();
        assert_eq!(back.name, "Jack");
        assert_eq!(back.group, Some(StudentGroup::Rose));
        assert!(back.is_id_card_loaded());
        assert_eq!(back.id(), None);
    }

    #[test]
    fn test_from_record_rejects_other_types() {
        let record = EntityRecord::new("IdCard").with("active", true);
        assert!(matches!(Student::from_record(record), Err(DbError::TypeMismatch(_))));
    }

    #[test]
    fn test_debug_excludes_id_card() {
        let mut student = jack();
        student.set_id_card(&IdCard::new(true));
        let rendered = format!("{:?}", student);
        assert!(rendered.contains("Jack"));
        assert!(!rendered.contains("id_card"));
        assert!(!rendered.contains("active"));
    }

    #[test]
    fn test_descriptor_shape() {
        let descriptor = Student::descriptor(FetchMode::Eager).unwrap();
        assert_eq!(descriptor.table_name(), "student");
        assert!(!descriptor.scalar_field("name").unwrap().nullable);
        assert_eq!(descriptor.relationship_field().unwrap().target_type, "IdCard");
    }
}
