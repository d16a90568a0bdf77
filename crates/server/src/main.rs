use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use db::schema::EntitySchema;
use db::validators::check_preset;
use db::DbService;
use serde_json::json;
use server::{AppConfig, AppState, routes};
use tracing_subscriber::{EnvFilter, prelude::*};

#[derive(Parser)]
#[command(name = "mantis", version, about = "Backend service that materializes REST APIs from table schemas")]
struct Cli {
    /// Database backend: sqlite, psql or mysql
    #[arg(long, default_value = "sqlite")]
    database: String,

    /// Connection string for non-sqlite backends
    #[arg(long, default_value = "")]
    connection: String,

    #[arg(long = "dataDir", default_value = "./data")]
    data_dir: PathBuf,

    #[arg(long = "publicDir", default_value = "./public")]
    public_dir: PathBuf,

    #[arg(long = "scriptsDir", default_value = "./scripts")]
    scripts_dir: PathBuf,

    /// Enable trace logging and dev mode
    #[arg(long)]
    dev: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        #[arg(long, default_value_t = 7070)]
        port: u16,
        #[arg(long = "poolSize", default_value_t = 4)]
        pool_size: u32,
    },
    /// Manage admin accounts
    Admins {
        /// Create an admin with this email (prompts for a password)
        #[arg(long, value_name = "EMAIL", conflicts_with = "rm")]
        add: Option<String>,
        /// Remove an admin by email or id
        #[arg(long, value_name = "EMAIL_OR_ID")]
        rm: Option<String>,
    },
    /// Run pending schema migrations (reserved)
    Migrate,
    /// Synchronize schema caches (reserved)
    Sync,
}

fn init_tracing(dev: bool) {
    let level = if dev {
        "trace".to_string()
    } else {
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
    };
    let filter_string = format!(
        "warn,server={level},db={level},services={level},utils={level}",
        level = level
    );
    let env_filter = EnvFilter::try_new(filter_string).expect("Failed to create tracing filter");
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.dev);

    let mut config = AppConfig {
        connection: cli.connection.clone(),
        data_dir: cli.data_dir.clone(),
        public_dir: cli.public_dir.clone(),
        scripts_dir: cli.scripts_dir.clone(),
        dev: cli.dev,
        ..AppConfig::default()
    };
    config.dialect = match cli.database.parse() {
        Ok(dialect) => dialect,
        Err(err) => {
            tracing::error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Serve { host, port, pool_size } => {
            config.host = host;
            config.port = port;
            config.pool_size = pool_size;
            serve(config).await
        }
        Command::Admins { add, rm } => admins(config, add, rm).await,
        Command::Migrate => migrate(config).await,
        Command::Sync => {
            tracing::info!("sync is reserved for a future release; nothing to do");
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let host = config.host.clone();
    let port = config.port;

    let state = AppState::bootstrap(config).await?;
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}")).await?;
    let addr = listener.local_addr()?;
    tracing::info!(
        "Serving API at http://{addr}/api/v1/ and admin dashboard at http://{addr}/admin"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn connect_db(config: &AppConfig) -> anyhow::Result<DbService> {
    tokio::fs::create_dir_all(&config.data_dir).await?;
    let db = DbService::connect(
        config.dialect,
        &config.connection,
        &config.data_dir,
        config.pool_size,
    )
    .await?;
    db.migrate().await?;
    Ok(db)
}

async fn migrate(config: AppConfig) -> anyhow::Result<()> {
    connect_db(&config).await?;
    tracing::info!("system tables are up to date");
    Ok(())
}

async fn admins(config: AppConfig, add: Option<String>, rm: Option<String>) -> anyhow::Result<()> {
    let db = connect_db(&config).await?;
    let admins = db.entity(EntitySchema::admins());

    if let Some(email) = add {
        check_preset("@email", "email", &email).map_err(|err| anyhow::anyhow!("{err}"))?;

        let password = dialoguer::Password::new()
            .with_prompt("Admin password")
            .with_confirmation("Confirm password", "Passwords do not match")
            .interact()?;
        check_preset("@password", "password", &password)
            .map_err(|err| anyhow::anyhow!("{err}"))?;

        let record = admins
            .create(&json!({"email": email, "password": password}))
            .await?;
        tracing::info!(
            "admin `{email}` created with id `{}`",
            record.get("id").and_then(|v| v.as_str()).unwrap_or_default()
        );
        return Ok(());
    }

    if let Some(identifier) = rm {
        let record = admins
            .query_from_cols(&identifier, &["id", "email"])
            .await?
            .ok_or_else(|| anyhow::anyhow!("no admin matches `{identifier}`"))?;
        let id = record
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        admins.remove(&id).await?;
        tracing::info!("admin `{identifier}` removed");
        return Ok(());
    }

    anyhow::bail!("pass --add <email> or --rm <email|id>")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let terminate = async {
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
            } else {
                tracing::error!("Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}
