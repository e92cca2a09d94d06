//! Academy game server.
//!
//! Serves the game-state API backed by Postgres.

use std::net::SocketAddr;
use std::sync::Arc;

use academy::{Database, LogNotifier, PgGameStore, PgUserStore, StatsCache};
use academy_server::{api, config::ServerConfig, logging};
use anyhow::Error;
use pico_args::Arguments;
use tracing::info;

const HELP: &str = "\
Run the academy game server

USAGE:
  academy_server [OPTIONS]

OPTIONS:
  --bind       IP:PORT     Server socket bind address  [default: env SERVER_BIND or 127.0.0.1:6969]
  --db-url     URL         Database connection string  [default: env DATABASE_URL]

FLAGS:
  -h, --help               Print help information

ENVIRONMENT:
  SERVER_BIND              Server bind address (e.g., 0.0.0.0:8080)
  DATABASE_URL             PostgreSQL connection string
  RUST_LOG                 Log filter (e.g., info,academy=debug)
";

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let bind_override: Option<SocketAddr> = pargs.opt_value_from_str("--bind")?;
    let database_url_override: Option<String> = pargs.opt_value_from_str("--db-url")?;

    logging::init();

    let config = ServerConfig::from_env(bind_override, database_url_override);

    info!("connecting to database");
    let db = Database::new(&config.database)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {e}"))?;
    db.health_check()
        .await
        .map_err(|e| anyhow::anyhow!("Database health check failed: {e}"))?;

    let pool = Arc::new(db.pool().clone());
    let state = api::AppState {
        games: Arc::new(PgGameStore::new(pool.clone())),
        users: Arc::new(PgUserStore::new(pool)),
        finished_hook: Arc::new(LogNotifier),
        stats_cache: Arc::new(StatsCache::new()),
    };

    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {e}", config.bind))?;

    info!("server running at http://{}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {e}"))?;

    info!("shutting down");

    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
}
