// ============================================================================
// Mapping Layer
// ============================================================================
//
// Static metadata describing how record types map onto tables:
// - EntityDescriptor: table, identifying field, scalar fields, one relationship
// - RelationshipDescriptor: a one-to-one link with an explicit owning side
// - MappingRegistry: build once, validate, freeze, then share read-only
//
// ============================================================================

pub mod entity;
pub mod naming;
pub mod registry;
pub mod relationship;

pub use entity::{EntityDescriptor, EntityDescriptorBuilder, ScalarField};
pub use registry::{MappingRegistry, RegistryBuilder};
pub use relationship::{
    FetchMode, RelationshipDescriptor, RelationshipField, RelationshipKind, RelationshipSide,
    resolve_ownership,
};
