use super::naming::validate_identifier;
use super::relationship::{FetchMode, RelationshipField, RelationshipKind};
use crate::core::{DataType, DbError, Result};
use serde::Serialize;
use std::collections::HashSet;

/// A mapped scalar field: stored in a column of the same name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalarField {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

/// Immutable mapping metadata for one record type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityDescriptor {
    type_name: String,
    table_name: String,
    primary_key_field: String,
    scalar_fields: Vec<ScalarField>,
    relationship_field: Option<RelationshipField>,
}

impl EntityDescriptor {
    pub fn builder(type_name: impl Into<String>) -> EntityDescriptorBuilder {
        EntityDescriptorBuilder::new(type_name)
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn primary_key_field(&self) -> &str {
        &self.primary_key_field
    }

    pub fn scalar_fields(&self) -> &[ScalarField] {
        &self.scalar_fields
    }

    pub fn scalar_field(&self, name: &str) -> Option<&ScalarField> {
        self.scalar_fields.iter().find(|f| f.name == name)
    }

    pub fn relationship_field(&self) -> Option<&RelationshipField> {
        self.relationship_field.as_ref()
    }
}

/// Collects field declarations for an [`EntityDescriptor`].
///
/// Declarations are only checked in [`build`](Self::build), so a builder
/// chain never fails half-way.
#[derive(Debug, Clone)]
pub struct EntityDescriptorBuilder {
    type_name: String,
    table_name: Option<String>,
    id_fields: Vec<String>,
    scalar_fields: Vec<ScalarField>,
    relationship_fields: Vec<RelationshipField>,
    orphan_fetch: bool,
}

impl EntityDescriptorBuilder {
    fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            table_name: None,
            id_fields: Vec::new(),
            scalar_fields: Vec::new(),
            relationship_fields: Vec::new(),
            orphan_fetch: false,
        }
    }

    /// Overrides the storage table; defaults to the type name.
    pub fn table(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    /// Declares the identifying field. Its value comes from the table's
    /// auto-increment counter.
    pub fn id(mut self, name: impl Into<String>) -> Self {
        self.id_fields.push(name.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.scalar_fields.push(ScalarField {
            name: name.into(),
            data_type,
            nullable: true,
        });
        self
    }

    pub fn required_field(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.scalar_fields.push(ScalarField {
            name: name.into(),
            data_type,
            nullable: false,
        });
        self
    }

    /// Declares a one-to-one field whose table stores the foreign key.
    pub fn owns_one(self, name: impl Into<String>, target_type: impl Into<String>) -> Self {
        self.one_to_one(name, target_type, RelationshipKind::Owner)
    }

    /// Declares the non-owning side of a one-to-one; `mapped_by` names the
    /// owner's field.
    pub fn inverse_one(
        self,
        name: impl Into<String>,
        target_type: impl Into<String>,
        mapped_by: impl Into<String>,
    ) -> Self {
        self.one_to_one(
            name,
            target_type,
            RelationshipKind::Inverse {
                mapped_by: mapped_by.into(),
            },
        )
    }

    /// Declares a one-to-one with no ownership designation.
    pub fn unmanaged_one(self, name: impl Into<String>, target_type: impl Into<String>) -> Self {
        self.one_to_one(name, target_type, RelationshipKind::Unmanaged)
    }

    fn one_to_one(
        mut self,
        name: impl Into<String>,
        target_type: impl Into<String>,
        kind: RelationshipKind,
    ) -> Self {
        self.relationship_fields.push(RelationshipField {
            name: name.into(),
            target_type: target_type.into(),
            kind,
            fetch_mode: FetchMode::default(),
        });
        self
    }

    /// Sets the fetch mode of the most recently declared relationship field.
    pub fn fetch(mut self, fetch_mode: FetchMode) -> Self {
        match self.relationship_fields.last_mut() {
            Some(field) => field.fetch_mode = fetch_mode,
            None => self.orphan_fetch = true,
        }
        self
    }

    pub fn build(self) -> Result<EntityDescriptor> {
        validate_identifier("type", &self.type_name)?;
        let table_name = self.table_name.unwrap_or_else(|| self.type_name.clone());
        validate_identifier("table", &table_name)?;

        let primary_key_field = match self.id_fields.as_slice() {
            [single] => single.clone(),
            [] => {
                return Err(DbError::ConfigurationError(format!(
                    "Entity '{}' declares no identifying field",
                    self.type_name
                )));
            }
            many => {
                return Err(DbError::ConfigurationError(format!(
                    "Entity '{}' declares {} identifying fields ({}); exactly one is allowed",
                    self.type_name,
                    many.len(),
                    many.join(", ")
                )));
            }
        };

        if self.orphan_fetch {
            return Err(DbError::ConfigurationError(format!(
                "Entity '{}' sets a fetch mode before declaring a relationship field",
                self.type_name
            )));
        }

        if self.relationship_fields.len() > 1 {
            return Err(DbError::ConfigurationError(format!(
                "Entity '{}' declares {} relationship fields; at most one is allowed",
                self.type_name,
                self.relationship_fields.len()
            )));
        }
        let relationship_field = self.relationship_fields.into_iter().next();

        let mut seen = HashSet::new();
        let names = std::iter::once(primary_key_field.as_str())
            .chain(self.scalar_fields.iter().map(|f| f.name.as_str()))
            .chain(relationship_field.iter().map(|f| f.name.as_str()));
        for name in names {
            validate_identifier("field", name)?;
            if !seen.insert(name) {
                return Err(DbError::ConfigurationError(format!(
                    "Entity '{}' declares field '{}' more than once",
                    self.type_name, name
                )));
            }
        }

        if let Some(field) = &relationship_field {
            validate_identifier("type", &field.target_type)?;
            if let RelationshipKind::Inverse { mapped_by } = &field.kind {
                validate_identifier("field", mapped_by)?;
            }
        }

        Ok(EntityDescriptor {
            type_name: self.type_name,
            table_name,
            primary_key_field,
            scalar_fields: self.scalar_fields,
            relationship_field,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_defaults_to_type_name() {
        let desc = EntityDescriptor::builder("IdCard")
            .id("id")
            .field("active", DataType::Boolean)
            .build()
            .unwrap();
        assert_eq!(desc.table_name(), "IdCard");
        assert_eq!(desc.primary_key_field(), "id");
        assert!(desc.relationship_field().is_none());
    }

    #[test]
    fn test_scalar_fields_keep_declaration_order() {
        let desc = EntityDescriptor::builder("Student")
            .table("student")
            .id("id")
            .required_field("name", DataType::Text)
            .field("date_of_birth", DataType::Date)
            .field("group", DataType::enumerated(["ROSE", "LOTUS"]))
            .build()
            .unwrap();
        let names: Vec<_> = desc.scalar_fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["name", "date_of_birth", "group"]);
        assert!(!desc.scalar_field("name").unwrap().nullable);
        assert!(desc.scalar_field("group").unwrap().nullable);
    }

    #[test]
    fn test_two_identifying_fields_rejected() {
        let err = EntityDescriptor::builder("Student")
            .id("id")
            .id("uuid")
            .build()
            .unwrap_err();
        assert!(matches!(err, DbError::ConfigurationError(msg) if msg.contains("identifying")));
    }

    #[test]
    fn test_missing_identifying_field_rejected() {
        let err = EntityDescriptor::builder("Student")
            .field("name", DataType::Text)
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let err = EntityDescriptor::builder("Student")
            .id("id")
            .field("name", DataType::Text)
            .field("name", DataType::Text)
            .build()
            .unwrap_err();
        assert!(matches!(err, DbError::ConfigurationError(msg) if msg.contains("more than once")));
    }

    #[test]
    fn test_relationship_field_cannot_shadow_scalar() {
        let err = EntityDescriptor::builder("Student")
            .id("id")
            .field("id_card", DataType::Integer)
            .owns_one("id_card", "IdCard")
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_at_most_one_relationship_field() {
        let err = EntityDescriptor::builder("Student")
            .id("id")
            .owns_one("id_card", "IdCard")
            .owns_one("locker", "Locker")
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_fetch_applies_to_relationship_field() {
        let desc = EntityDescriptor::builder("Student")
            .id("id")
            .owns_one("id_card", "IdCard")
            .fetch(FetchMode::Lazy)
            .build()
            .unwrap();
        let field = desc.relationship_field().unwrap();
        assert_eq!(field.fetch_mode, FetchMode::Lazy);
        assert_eq!(field.kind, RelationshipKind::Owner);
        assert_eq!(field.target_type, "IdCard");
    }

    #[test]
    fn test_fetch_without_relationship_rejected() {
        let err = EntityDescriptor::builder("Student")
            .id("id")
            .fetch(FetchMode::Lazy)
            .owns_one("id_card", "IdCard")
            .build()
            .unwrap_err();
        assert!(matches!(err, DbError::ConfigurationError(msg) if msg.contains("fetch mode")));
    }

    #[test]
    fn test_invalid_table_name_rejected() {
        let err = EntityDescriptor::builder("Student")
            .table("student table")
            .id("id")
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
