use super::entity::EntityDescriptor;
use super::naming::foreign_key_column;
use crate::core::{DbError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// When a related entity is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FetchMode {
    /// Loaded together with the entity that declares the field.
    #[default]
    Eager,
    /// Loaded on first access through a [`LazyRef`](crate::proxy::LazyRef).
    Lazy,
}

impl FromStr for FetchMode {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "eager" => Ok(Self::Eager),
            "lazy" => Ok(Self::Lazy),
            other => Err(DbError::ConfigurationError(format!(
                "Unknown fetch mode '{}': expected 'eager' or 'lazy'",
                other
            ))),
        }
    }
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eager => write!(f, "EAGER"),
            Self::Lazy => write!(f, "LAZY"),
        }
    }
}

/// How a one-to-one field participates in ownership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RelationshipKind {
    /// This side's table stores the foreign key.
    Owner,
    /// This side points back to the owner's field and stores nothing.
    Inverse { mapped_by: String },
    /// No ownership designation. Valid only when the other side does not
    /// declare a partner field.
    Unmanaged,
}

/// A one-to-one field as declared on one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationshipField {
    pub name: String,
    pub target_type: String,
    pub kind: RelationshipKind,
    pub fetch_mode: FetchMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipSide {
    Owning,
    Inverse,
}

/// A resolved one-to-one link. The foreign key lives only in the owner's
/// table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationshipDescriptor {
    owner_type: String,
    inverse_type: String,
    owning_field_name: String,
    inverse_field_name: Option<String>,
    foreign_key_column: String,
    fetch_mode: FetchMode,
}

impl RelationshipDescriptor {
    fn new(owner: &EntityDescriptor, owning: &RelationshipField, inverse_type: &str) -> Self {
        Self {
            owner_type: owner.type_name().to_string(),
            inverse_type: inverse_type.to_string(),
            owning_field_name: owning.name.clone(),
            inverse_field_name: None,
            foreign_key_column: foreign_key_column(&owning.name),
            fetch_mode: owning.fetch_mode,
        }
    }

    /// Shared identifier of the link: `<OwnerType>.<owning_field>`.
    pub fn id(&self) -> String {
        format!("{}.{}", self.owner_type, self.owning_field_name)
    }

    pub fn owner_type(&self) -> &str {
        &self.owner_type
    }

    pub fn inverse_type(&self) -> &str {
        &self.inverse_type
    }

    pub fn owning_field_name(&self) -> &str {
        &self.owning_field_name
    }

    /// `None` for a unidirectional link.
    pub fn inverse_field_name(&self) -> Option<&str> {
        self.inverse_field_name.as_deref()
    }

    pub fn foreign_key_column(&self) -> &str {
        &self.foreign_key_column
    }

    /// Fetch mode declared on the owning field.
    pub fn fetch_mode(&self) -> FetchMode {
        self.fetch_mode
    }

    pub fn is_bidirectional(&self) -> bool {
        self.inverse_field_name.is_some()
    }

    pub fn side_of(&self, type_name: &str, field_name: &str) -> Option<RelationshipSide> {
        if self.owner_type == type_name && self.owning_field_name == field_name {
            Some(RelationshipSide::Owning)
        } else if self.inverse_type == type_name
            && self.inverse_field_name.as_deref() == Some(field_name)
        {
            Some(RelationshipSide::Inverse)
        } else {
            None
        }
    }
}

/// Decides which side of a one-to-one owns the foreign key.
///
/// `entity` must declare a relationship field targeting `target`. If `target`
/// declares a field pointing back, the two declarations must agree on a single
/// owner: two unmanaged fields, two owners, two inverses, or an unmanaged
/// field paired with a designated one are all rejected, as is an inverse whose
/// `mapped_by` does not name the owner's field.
pub fn resolve_ownership(
    entity: &EntityDescriptor,
    target: &EntityDescriptor,
) -> Result<RelationshipDescriptor> {
    let field = entity.relationship_field().ok_or_else(|| {
        DbError::ConfigurationError(format!(
            "Entity '{}' declares no relationship field",
            entity.type_name()
        ))
    })?;

    if field.target_type != target.type_name() {
        return Err(DbError::ConfigurationError(format!(
            "Field '{}.{}' targets '{}', not '{}'",
            entity.type_name(),
            field.name,
            field.target_type,
            target.type_name()
        )));
    }

    let partner = if entity.type_name() == target.type_name() {
        None
    } else {
        target
            .relationship_field()
            .filter(|p| p.target_type == entity.type_name())
    };

    let Some(partner) = partner else {
        return match &field.kind {
            RelationshipKind::Owner | RelationshipKind::Unmanaged => {
                Ok(RelationshipDescriptor::new(entity, field, target.type_name()))
            }
            RelationshipKind::Inverse { mapped_by } => Err(DbError::ConfigurationError(format!(
                "Field '{}.{}' is mapped by '{}.{}', but '{}' declares no relationship back to '{}'",
                entity.type_name(),
                field.name,
                target.type_name(),
                mapped_by,
                target.type_name(),
                entity.type_name()
            ))),
        };
    };

    match (&field.kind, &partner.kind) {
        (RelationshipKind::Unmanaged, RelationshipKind::Unmanaged) => {
            Err(DbError::ConfigurationError(format!(
                "Ambiguous one-to-one between '{}.{}' and '{}.{}': neither side is the owner, \
                 so both tables would carry a foreign key; mark one side as owner and the other as mapped by it",
                entity.type_name(),
                field.name,
                target.type_name(),
                partner.name
            )))
        }
        (RelationshipKind::Owner, RelationshipKind::Owner) => {
            Err(DbError::ConfigurationError(format!(
                "Both '{}.{}' and '{}.{}' claim to own the one-to-one",
                entity.type_name(),
                field.name,
                target.type_name(),
                partner.name
            )))
        }
        (RelationshipKind::Inverse { .. }, RelationshipKind::Inverse { .. }) => {
            Err(DbError::ConfigurationError(format!(
                "Both '{}.{}' and '{}.{}' are inverse sides; one must own the one-to-one",
                entity.type_name(),
                field.name,
                target.type_name(),
                partner.name
            )))
        }
        (RelationshipKind::Unmanaged, _) | (_, RelationshipKind::Unmanaged) => {
            Err(DbError::ConfigurationError(format!(
                "Inconsistent one-to-one between '{}.{}' and '{}.{}': one side has no ownership designation",
                entity.type_name(),
                field.name,
                target.type_name(),
                partner.name
            )))
        }
        (RelationshipKind::Owner, RelationshipKind::Inverse { mapped_by }) => {
            link(entity, field, target, partner, mapped_by)
        }
        (RelationshipKind::Inverse { mapped_by }, RelationshipKind::Owner) => {
            link(target, partner, entity, field, mapped_by)
        }
    }
}

fn link(
    owner: &EntityDescriptor,
    owning: &RelationshipField,
    inverse: &EntityDescriptor,
    inverse_field: &RelationshipField,
    mapped_by: &str,
) -> Result<RelationshipDescriptor> {
    if mapped_by != owning.name {
        return Err(DbError::ConfigurationError(format!(
            "Field '{}.{}' is mapped by '{}.{}', but the owning field is '{}.{}'",
            inverse.type_name(),
            inverse_field.name,
            owner.type_name(),
            mapped_by,
            owner.type_name(),
            owning.name
        )));
    }

    let mut descriptor = RelationshipDescriptor::new(owner, owning, inverse.type_name());
    descriptor.inverse_field_name = Some(inverse_field.name.clone());
    Ok(descriptor)
}
