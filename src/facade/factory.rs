use super::Database;
use crate::config::PersistConfig;
use crate::core::Result;
use crate::mapping::MappingRegistry;
use crate::schema::{SchemaMode, generate_catalog, render_create_table, render_drop_table};
use crate::session::PersistSession;
use crate::storage::Catalog;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

/// Binds a frozen mapping registry to a database and hands out sessions.
pub struct SessionFactory {
    config: PersistConfig,
    registry: Arc<MappingRegistry>,
    catalog: Catalog,
    db: Arc<Database>,
}

impl SessionFactory {
    /// Opens the database named in `config` and applies its schema mode.
    pub async fn open(config: PersistConfig, registry: Arc<MappingRegistry>) -> Result<Self> {
        let db = Database::named(&config.database).await;
        Self::with_database(config, registry, db).await
    }

    /// Like [`open`](Self::open), but over an explicit database instance.
    pub async fn with_database(
        config: PersistConfig,
        registry: Arc<MappingRegistry>,
        db: Arc<Database>,
    ) -> Result<Self> {
        let span = info_span!(
            "factory.open",
            database = %config.database,
            schema_mode = %config.schema_mode
        );

        Self::apply_schema(config, registry, db).instrument(span).await
    }

    async fn apply_schema(
        config: PersistConfig,
        registry: Arc<MappingRegistry>,
        db: Arc<Database>,
    ) -> Result<Self> {
        let catalog = generate_catalog(&registry)?;

        match config.schema_mode {
            SchemaMode::Create => {
                if config.show_sql {
                    for schema in catalog.tables() {
                        event!(Level::INFO, sql = %render_drop_table(schema), "ddl");
                        event!(Level::INFO, sql = %render_create_table(schema), "ddl");
                    }
                }
                db.recreate(&catalog).await?;
                event!(Level::INFO, tables = catalog.list_tables().len(), "schema created");
            }
            SchemaMode::None => {
                event!(Level::DEBUG, "schema generation disabled");
            }
        }

        Ok(Self {
            config,
            registry,
            catalog,
            db,
        })
    }

    pub fn open_session(&self) -> PersistSession {
        PersistSession::new(
            self.db.clone(),
            self.registry.clone(),
            self.catalog.clone(),
            self.config.show_sql,
        )
    }

    pub fn config(&self) -> &PersistConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<MappingRegistry> {
        &self.registry
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }
}
