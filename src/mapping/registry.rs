use super::entity::EntityDescriptor;
use super::relationship::{RelationshipDescriptor, RelationshipSide, resolve_ownership};
use crate::core::{DbError, Result};
use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

static GLOBAL_REGISTRY: OnceLock<Arc<MappingRegistry>> = OnceLock::new();

/// Build phase of the mapping registry. Accepts registrations until
/// [`freeze`](Self::freeze) turns it into an immutable [`MappingRegistry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entities: BTreeMap<String, EntityDescriptor>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: EntityDescriptor) -> Result<&mut Self> {
        let type_name = descriptor.type_name().to_string();
        if self.entities.contains_key(&type_name) {
            return Err(DbError::DuplicateRegistration(type_name));
        }
        if let Some(existing) = self
            .entities
            .values()
            .find(|d| d.table_name() == descriptor.table_name())
        {
            return Err(DbError::ConfigurationError(format!(
                "Entities '{}' and '{}' both map to table '{}'",
                existing.type_name(),
                type_name,
                descriptor.table_name()
            )));
        }

        debug!("registered entity '{}' -> table '{}'", type_name, descriptor.table_name());
        self.entities.insert(type_name, descriptor);
        Ok(self)
    }

    pub fn resolve(&self, type_name: &str) -> Result<&EntityDescriptor> {
        self.entities
            .get(type_name)
            .ok_or_else(|| DbError::UnknownType(type_name.to_string()))
    }

    /// Validates every relationship field and freezes the registry.
    ///
    /// All configuration errors surface here: a relationship whose target is
    /// not registered, and any ownership conflict between the two sides.
    pub fn freeze(self) -> Result<MappingRegistry> {
        let mut relationships: BTreeMap<String, Arc<RelationshipDescriptor>> = BTreeMap::new();
        let mut by_field = BTreeMap::new();

        for descriptor in self.entities.values() {
            let Some(field) = descriptor.relationship_field() else {
                continue;
            };
            let target = self.entities.get(&field.target_type).ok_or_else(|| {
                DbError::ConfigurationError(format!(
                    "Field '{}.{}' references '{}', which is not a registered entity",
                    descriptor.type_name(),
                    field.name,
                    field.target_type
                ))
            })?;

            let resolved = resolve_ownership(descriptor, target)?;
            self.check_foreign_key_column(&resolved)?;
            let shared = relationships
                .entry(resolved.id())
                .or_insert_with(|| Arc::new(resolved))
                .clone();
            by_field.insert(
                (descriptor.type_name().to_string(), field.name.clone()),
                shared,
            );
        }

        info!(
            "mapping registry frozen: {} entities, {} relationships",
            self.entities.len(),
            relationships.len()
        );

        Ok(MappingRegistry {
            entities: self.entities,
            relationships,
            by_field,
        })
    }

    /// The generated foreign-key column shares the owner's table with its
    /// primary key and scalar columns, so its name must not clash with them.
    fn check_foreign_key_column(&self, relationship: &RelationshipDescriptor) -> Result<()> {
        let owner = self.resolve(relationship.owner_type())?;
        let column = relationship.foreign_key_column();
        if owner.primary_key_field() == column || owner.scalar_field(column).is_some() {
            return Err(DbError::ConfigurationError(format!(
                "Foreign key column '{}' for '{}.{}' collides with a field of the same name",
                column,
                owner.type_name(),
                relationship.owning_field_name()
            )));
        }
        Ok(())
    }
}

/// Frozen, process-wide mapping metadata. Only shared references are ever
/// handed out, so concurrent reads need no locking.
#[derive(Debug)]
pub struct MappingRegistry {
    entities: BTreeMap<String, EntityDescriptor>,
    relationships: BTreeMap<String, Arc<RelationshipDescriptor>>,
    by_field: BTreeMap<(String, String), Arc<RelationshipDescriptor>>,
}

#[derive(Serialize)]
struct RegistryExport<'a> {
    entities: Vec<&'a EntityDescriptor>,
    relationships: Vec<&'a RelationshipDescriptor>,
}

impl MappingRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Installs `registry` as the process-wide registry. Can only happen once.
    pub fn install_global(registry: MappingRegistry) -> Result<Arc<MappingRegistry>> {
        let registry = Arc::new(registry);
        GLOBAL_REGISTRY.set(registry.clone()).map_err(|_| {
            DbError::ConfigurationError("A global mapping registry is already installed".to_string())
        })?;
        Ok(registry)
    }

    pub fn global() -> Result<Arc<MappingRegistry>> {
        GLOBAL_REGISTRY.get().cloned().ok_or_else(|| {
            DbError::ConfigurationError("No global mapping registry installed".to_string())
        })
    }

    pub fn resolve(&self, type_name: &str) -> Result<&EntityDescriptor> {
        self.entities
            .get(type_name)
            .ok_or_else(|| DbError::UnknownType(type_name.to_string()))
    }

    pub fn resolve_relationship(
        &self,
        type_name: &str,
        field_name: &str,
    ) -> Result<&RelationshipDescriptor> {
        self.by_field
            .get(&(type_name.to_string(), field_name.to_string()))
            .map(|rel| rel.as_ref())
            .ok_or_else(|| DbError::NoSuchRelationship {
                type_name: type_name.to_string(),
                field: field_name.to_string(),
            })
    }

    /// The relationship declared on `type_name`, with the side it plays.
    pub fn relationship_of(
        &self,
        type_name: &str,
    ) -> Result<Option<(&RelationshipDescriptor, RelationshipSide)>> {
        let descriptor = self.resolve(type_name)?;
        let Some(field) = descriptor.relationship_field() else {
            return Ok(None);
        };
        let relationship = self.resolve_relationship(type_name, &field.name)?;
        let side = relationship
            .side_of(type_name, &field.name)
            .unwrap_or(RelationshipSide::Owning);
        Ok(Some((relationship, side)))
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(|s| s.as_str())
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.entities.values()
    }

    pub fn relationships(&self) -> impl Iterator<Item = &RelationshipDescriptor> {
        self.relationships.values().map(|rel| rel.as_ref())
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Descriptor metadata as pretty JSON, for tooling.
    pub fn to_json(&self) -> Result<String> {
        let export = RegistryExport {
            entities: self.entities().collect(),
            relationships: self.relationships().collect(),
        };
        serde_json::to_string_pretty(&export)
            .map_err(|e| DbError::ExecutionError(format!("Failed to export registry: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::mapping::FetchMode;

    fn student() -> EntityDescriptor {
        EntityDescriptor::builder("Student")
            .table("student")
            .id("id")
            .field("name", DataType::Text)
            .owns_one("id_card", "IdCard")
            .fetch(FetchMode::Lazy)
            .build()
            .unwrap()
    }

    fn id_card() -> EntityDescriptor {
        EntityDescriptor::builder("IdCard")
            .table("id_card")
            .id("id")
            .field("active", DataType::Boolean)
            .inverse_one("student", "Student", "id_card")
            .build()
            .unwrap()
    }

    #[test]
    fn test_duplicate_registration() {
        let mut builder = MappingRegistry::builder();
        builder.register(student()).unwrap();
        let err = builder.register(student()).unwrap_err();
        assert_eq!(err, DbError::DuplicateRegistration("Student".to_string()));
    }

    #[test]
    fn test_shared_table_rejected() {
        let mut builder = MappingRegistry::builder();
        builder.register(student()).unwrap();
        let other = EntityDescriptor::builder("Pupil")
            .table("student")
            .id("id")
            .build()
            .unwrap();
        assert!(builder.register(other).unwrap_err().is_configuration());
    }

    #[test]
    fn test_resolve_unknown_type() {
        let registry = MappingRegistry::builder().freeze().unwrap();
        assert_eq!(
            registry.resolve("Ghost").unwrap_err(),
            DbError::UnknownType("Ghost".to_string())
        );
    }

    #[test]
    fn test_freeze_links_both_sides_to_one_relationship() {
        let mut builder = MappingRegistry::builder();
        builder.register(student()).unwrap().register(id_card()).unwrap();
        let registry = builder.freeze().unwrap();

        assert_eq!(registry.relationships().count(), 1);
        let owning = registry.resolve_relationship("Student", "id_card").unwrap();
        let inverse = registry.resolve_relationship("IdCard", "student").unwrap();
        assert!(std::ptr::eq(owning, inverse));

        let (_, side) = registry.relationship_of("IdCard").unwrap().unwrap();
        assert_eq!(side, RelationshipSide::Inverse);
    }

    #[test]
    fn test_no_such_relationship() {
        let mut builder = MappingRegistry::builder();
        builder.register(student()).unwrap().register(id_card()).unwrap();
        let registry = builder.freeze().unwrap();
        let err = registry.resolve_relationship("Student", "name").unwrap_err();
        assert!(matches!(err, DbError::NoSuchRelationship { ref field, .. } if field == "name"));
    }

    #[test]
    fn test_unregistered_target_fails_at_freeze() {
        let mut builder = MappingRegistry::builder();
        builder.register(student()).unwrap();
        let err = builder.freeze().unwrap_err();
        assert!(matches!(err, DbError::ConfigurationError(msg) if msg.contains("not a registered entity")));
    }

    #[test]
    fn test_foreign_key_column_clash_fails_at_freeze() {
        let clashing = EntityDescriptor::builder("Student")
            .table("student")
            .id("id")
            .field("id_card_id", DataType::Integer)
            .owns_one("id_card", "IdCard")
            .build()
            .unwrap();
        let card = EntityDescriptor::builder("IdCard")
            .table("id_card")
            .id("id")
            .field("active", DataType::Boolean)
            .build()
            .unwrap();

        let mut builder = MappingRegistry::builder();
        builder.register(clashing).unwrap().register(card).unwrap();
        let err = builder.freeze().unwrap_err();
        assert!(matches!(err, DbError::ConfigurationError(msg) if msg.contains("id_card_id")));
    }

    #[test]
    fn test_foreign_key_column_clash_with_primary_key() {
        let owner = EntityDescriptor::builder("Badge")
            .id("holder_id")
            .owns_one("holder", "IdCard")
            .build()
            .unwrap();

        let mut builder = MappingRegistry::builder();
        builder.register(owner).unwrap().register(id_card_plain()).unwrap();
        assert!(builder.freeze().unwrap_err().is_configuration());
    }

    fn id_card_plain() -> EntityDescriptor {
        EntityDescriptor::builder("IdCard")
            .table("id_card")
            .id("id")
            .build()
            .unwrap()
    }

    #[test]
    fn test_json_export_lists_entities_and_relationships() {
        let mut builder = MappingRegistry::builder();
        builder.register(student()).unwrap().register(id_card()).unwrap();
        let registry = builder.freeze().unwrap();

        let json: serde_json::Value = serde_json::from_str(&registry.to_json().unwrap()).unwrap();
        assert_eq!(json["entities"].as_array().unwrap().len(), 2);
        assert_eq!(json["relationships"][0]["owner_type"], "Student");
        assert_eq!(json["relationships"][0]["foreign_key_column"], "id_card_id");
    }
}
