use crate::core::{DbError, Result};
use crate::schema::SchemaMode;

/// Persistence configuration
///
/// Similar to an ORM's `persistence.xml`: which database to use, what to do
/// with the schema on startup, and whether to echo generated SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistConfig {
    /// Database name. Opening the same name twice yields the same database.
    pub database: String,

    /// Schema generation on open
    pub schema_mode: SchemaMode,

    /// Log every generated statement at INFO
    pub show_sql: bool,
}

impl PersistConfig {
    pub fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            schema_mode: SchemaMode::default(),
            show_sql: false,
        }
    }

    /// Set the schema mode
    pub fn schema_mode(mut self, mode: SchemaMode) -> Self {
        self.schema_mode = mode;
        self
    }

    /// Enable or disable SQL echo
    pub fn show_sql(mut self, enabled: bool) -> Self {
        self.show_sql = enabled;
        self
    }

    /// Parse from connection string
    ///
    /// Format: "memorm://database?schema=create|none&show_sql=true|false"
    ///
    /// # Examples
    ///
    /// ```
    /// use memorm::{PersistConfig, SchemaMode};
    ///
    /// let config = PersistConfig::from_url("memorm://school?schema=none&show_sql=true").unwrap();
    /// assert_eq!(config.database, "school");
    /// assert_eq!(config.schema_mode, SchemaMode::None);
    /// assert!(config.show_sql);
    /// ```
    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url.strip_prefix("memorm://").ok_or_else(|| {
            DbError::ConfigurationError("URL must start with 'memorm://'".to_string())
        })?;

        let (database, query) = match rest.split_once('?') {
            Some((db, query)) => (db, Some(query)),
            None => (rest, None),
        };
        if database.is_empty() {
            return Err(DbError::ConfigurationError(
                "URL must name a database".to_string(),
            ));
        }

        let mut config = Self::new(database);
        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                DbError::ConfigurationError(format!("Invalid URL parameter '{}'", pair))
            })?;
            match key {
                "schema" => config.schema_mode = value.parse()?,
                "show_sql" => {
                    config.show_sql = value.parse().map_err(|_| {
                        DbError::ConfigurationError(format!(
                            "show_sql must be 'true' or 'false', got '{}'",
                            value
                        ))
                    })?;
                }
                other => {
                    return Err(DbError::ConfigurationError(format!(
                        "Unknown URL parameter '{}'",
                        other
                    )));
                }
            }
        }

        Ok(config)
    }
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self::new("memorm")
    }
}
