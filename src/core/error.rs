use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Entity type '{0}' is already registered")]
    DuplicateRegistration(String),

    #[error("Unknown entity type '{0}'")]
    UnknownType(String),

    #[error("Entity type '{type_name}' has no relationship field '{field}'")]
    NoSuchRelationship { type_name: String, field: String },

    #[error("{type_name} with id {id} not found")]
    NotFound { type_name: String, id: i64 },

    #[error("Dangling reference: {type_name} with id {id} no longer exists")]
    DanglingReference { type_name: String, id: i64 },

    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Session is closed")]
    SessionClosed,

    #[error("Transaction error: {0}")]
    TransactionError(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),
}

impl DbError {
    /// Configuration errors are raised while the mapping is being built and
    /// are fatal to startup.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ConfigurationError(_) | Self::DuplicateRegistration(_)
        )
    }

    pub(crate) fn not_found(type_name: impl Into<String>, id: i64) -> Self {
        Self::NotFound {
            type_name: type_name.into(),
            id,
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
