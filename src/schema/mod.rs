pub mod ddl;

pub use ddl::{generate_catalog, generate_ddl, render_create_table, render_drop_table, table_schema_for};

use crate::core::{DbError, Result};
use std::fmt;
use std::str::FromStr;

/// What happens to mapped tables when a database is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaMode {
    /// Drop and recreate every mapped table. Destroys existing rows.
    #[default]
    Create,
    /// Leave the schema alone; tables must already exist.
    None,
}

impl FromStr for SchemaMode {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "none" => Ok(Self::None),
            other => Err(DbError::ConfigurationError(format!(
                "Unknown schema mode '{}': expected 'create' or 'none'",
                other
            ))),
        }
    }
}

impl fmt::Display for SchemaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::None => write!(f, "none"),
        }
    }
}
