use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};

use roulette_core::RandomSelector;
use roulette_server::config::Config;
use roulette_server::http;
use roulette_server::store::SqliteDirectory;
use roulette_server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting reviewer roulette");

    let config = Config::from_env().context("Failed to load configuration")?;

    let db_path = config.state_dir.join("roulette.db");
    info!("Using directory database: {}", db_path.display());
    let store =
        SqliteDirectory::new(&db_path).context("Failed to initialize SQLite database")?;

    let state = Arc::new(AppState::new(Arc::new(store), Arc::new(RandomSelector)));

    let app = http::router(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
