use std::path::PathBuf;

use db::Dialect;

const DEFAULT_JWT_SECRET: &str = "mantis-dev-secret-change-me";

/// Process-wide settings assembled from the CLI and the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub pool_size: u32,
    pub dialect: Dialect,
    pub connection: String,
    pub data_dir: PathBuf,
    pub public_dir: PathBuf,
    pub scripts_dir: PathBuf,
    pub dev: bool,
    pub jwt_secret: String,
}

impl AppConfig {
    /// `MANTIS_JWT_SECRET` overrides the built-in development secret.
    pub fn jwt_secret_from_env() -> String {
        std::env::var("MANTIS_JWT_SECRET").unwrap_or_else(|_| DEFAULT_JWT_SECRET.to_string())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            host: "0.0.0.0".to_string(),
            port: 7070,
            pool_size: 4,
            dialect: Dialect::Sqlite,
            connection: String::new(),
            data_dir: PathBuf::from("./data"),
            public_dir: PathBuf::from("./public"),
            scripts_dir: PathBuf::from("./scripts"),
            dev: false,
            jwt_secret: Self::jwt_secret_from_env(),
        }
    }
}
