use std::path::Path;

use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;

pub mod dialect;
pub mod entity;
pub mod records;
pub mod schema;
pub mod validators;

pub use dialect::Dialect;
pub use entity::{Entity, EntityError, ListOptions};
pub use schema::EntitySchema;

/// Fixed-size pool of driver sessions plus the dialect its DDL speaks.
/// Checkouts block until a connection frees up.
#[derive(Clone)]
pub struct DbService {
    pub pool: AnyPool,
    pub dialect: Dialect,
}

impl DbService {
    /// Connects the pool. SQLite resolves to `<data_dir>/vault.db`; the
    /// other backends require an explicit connection string.
    pub async fn connect(
        dialect: Dialect,
        connection: &str,
        data_dir: &Path,
        pool_size: u32,
    ) -> Result<DbService, sqlx::Error> {
        sqlx::any::install_default_drivers();

        let url = match dialect {
            Dialect::Sqlite => format!(
                "sqlite://{}?mode=rwc",
                data_dir.join("vault.db").to_string_lossy()
            ),
            _ => {
                if connection.is_empty() {
                    return Err(sqlx::Error::Configuration(
                        "a connection string is required for non-sqlite backends".into(),
                    ));
                }
                connection.to_string()
            }
        };

        let pool = AnyPoolOptions::new()
            .max_connections(pool_size.max(1))
            .connect(&url)
            .await?;

        Ok(DbService { pool, dialect })
    }

    /// Boot migration: the three system tables are created when absent.
    /// User tables come later from `_tables` rows.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        for schema in [
            EntitySchema::tables(),
            EntitySchema::admins(),
            EntitySchema::settings(),
        ] {
            let ddl = schema.create_ddl(self.dialect);
            tracing::debug!(table = %schema.name, "ensuring system table");
            sqlx::query(&ddl).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn entity(&self, schema: EntitySchema) -> Entity {
        Entity::new(schema, self.pool.clone(), self.dialect)
    }
}
