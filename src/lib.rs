// ============================================================================
// memorm Library
// ============================================================================
//
// Descriptor-driven one-to-one mapping over an in-memory database.
//
//   mapping   entity / relationship descriptors and the frozen registry
//   schema    table schemas and DDL generated from the registry
//   session   persist / find / delete inside optional transactions
//   proxy     lazy references resolved on first access
//   model     the typed Student / IdCard entities
//
// ============================================================================

pub mod config;
pub mod core;
pub mod facade;
pub mod mapping;
pub mod model;
pub mod proxy;
pub mod record;
pub mod schema;
pub mod session;
pub mod storage;
pub mod transaction;

pub use config::PersistConfig;
pub use core::{DataType, DbError, Result, Value};
pub use facade::{Database, SessionFactory};
pub use mapping::{
    EntityDescriptor, FetchMode, MappingRegistry, RegistryBuilder, RelationshipDescriptor,
    RelationshipKind, RelationshipSide,
};
pub use model::{Entity, IdCard, Student, StudentGroup, school_registry};
pub use proxy::{EntityResolver, LazyRef, ProxyState, ReferenceKey};
pub use record::{EntityRecord, Related};
pub use schema::{SchemaMode, generate_ddl};
pub use session::PersistSession;
