use std::sync::Arc;

use db::schema::EntitySchema;
use db::DbService;
use services::auth::JwtService;
use services::files::FileService;
use services::mutation::SchemaMutator;
use services::registry::EntityRegistry;
use services::settings::SettingsService;

use crate::config::AppConfig;

/// Everything a request handler needs, wired once at boot and passed by
/// reference. There is no global singleton; tests build their own.
#[derive(Clone)]
pub struct AppState {
    pub db: DbService,
    pub registry: Arc<EntityRegistry>,
    pub settings: Arc<SettingsService>,
    pub jwt: JwtService,
    pub files: FileService,
    pub mutator: Arc<SchemaMutator>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Boot sequence: connect the pool, run the system-table migration,
    /// seed settings, materialize the three system entities plus every
    /// user entity recorded in `_tables`.
    pub async fn bootstrap(config: AppConfig) -> anyhow::Result<AppState> {
        tokio::fs::create_dir_all(&config.data_dir).await?;

        let db = DbService::connect(
            config.dialect,
            &config.connection,
            &config.data_dir,
            config.pool_size,
        )
        .await?;
        db.migrate().await?;

        let registry = Arc::new(EntityRegistry::new());
        for schema in [
            EntitySchema::admins(),
            EntitySchema::tables(),
            EntitySchema::settings(),
        ] {
            registry.insert(db.entity(schema)).await;
        }

        let settings =
            Arc::new(SettingsService::load_or_init(db.entity(EntitySchema::settings())).await?);

        let files = FileService::new(config.data_dir.clone());
        let mutator = Arc::new(SchemaMutator::new(db.clone(), registry.clone(), files.clone()));
        let loaded = mutator.load_all().await?;
        tracing::info!(entities = loaded, "materialized user entities");

        let jwt = JwtService::new(config.jwt_secret.clone());

        Ok(AppState {
            db,
            registry,
            settings,
            jwt,
            files,
            mutator,
            config: Arc::new(config),
        })
    }
}
