//! Typed entities of the school domain.
//!
//! Each entity converts to and from an [`EntityRecord`] and supplies its own
//! mapping descriptor; [`school_registry`] freezes both into one registry.

pub mod id_card;
pub mod student;

pub use id_card::IdCard;
pub use student::{Student, StudentGroup};

use crate::core::Result;
use crate::mapping::{EntityDescriptor, FetchMode, MappingRegistry};
use crate::record::EntityRecord;

/// A Rust type mapped to a table.
pub trait Entity: Sized + Send + Sync {
    const TYPE_NAME: &'static str;

    /// Mapping metadata. `fetch` applies to the entity's relationship field.
    fn descriptor(fetch: FetchMode) -> Result<EntityDescriptor>;

    fn to_record(&self) -> EntityRecord;

    fn from_record(record: EntityRecord) -> Result<Self>;
}

/// The `Student` / `IdCard` mapping with both relationship sides using
/// `fetch`.
pub fn school_registry(fetch: FetchMode) -> Result<MappingRegistry> {
    let mut builder = MappingRegistry::builder();
    builder
        .register(Student::descriptor(fetch)?)?
        .register(IdCard::descriptor(fetch)?)?;
    builder.freeze()
}

pub(crate) fn ensure_type(record: &EntityRecord, expected: &str) -> Result<()> {
    if record.type_name() == expected {
        Ok(())
    } else {
        Err(crate::core::DbError::TypeMismatch(format!(
            "Expected a {} record, got {}",
            expected,
            record.type_name()
        )))
    }
}
