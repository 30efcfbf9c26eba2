pub mod admin;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::path::Path;
use thiserror::Error;
use tokio::net::TcpListener;

use config::Config;
use state::AppState;

#[derive(Error, Debug)]
pub enum ServeError {
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Loads `config_file_path`, binds both listeners, and runs the public and
/// admin routers to completion (i.e. forever, barring a fatal error) —
/// following `ingest-router::run`'s `router_task`/`admin_task` shape of one
/// task per listener, run concurrently.
pub async fn run(config_file_path: &Path) -> Result<(), ServeError> {
    let config = Config::from_file(config_file_path)?;
    init_tracing(&config.logging.rust_log);

    let state = AppState::new(&config);

    let public_addr = format!("{}:{}", config.listener.host, config.listener.port);
    let admin_addr = format!("{}:{}", config.admin_listener.host, config.admin_listener.port);

    let public_listener = TcpListener::bind(&public_addr).await?;
    let admin_listener = TcpListener::bind(&admin_addr).await?;

    tracing::info!(%public_addr, %admin_addr, "gw-server listening");

    let public_task = axum::serve(public_listener, routes::router(state));
    let admin_task = axum::serve(admin_listener, admin::router());

    tokio::select! {
        result = public_task => result?,
        result = admin_task => result?,
    }

    Ok(())
}

fn init_tracing(rust_log: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(rust_log));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
