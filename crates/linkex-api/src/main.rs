//! # linkex-api — Binary Entry Point
//!
//! Starts the Axum HTTP server for the Linkex marketplace.
//! Binds to configurable port (default 8080).

use linkex_api::config::AppConfig;
use linkex_api::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured tracing. LOG_FORMAT=json switches to JSON lines.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = AppConfig::from_env().map_err(|e| {
        tracing::error!("Invalid configuration: {e}");
        e
    })?;
    tracing::debug!(?config, "configuration loaded");
    let port = config.port;

    // Database is optional; without DATABASE_URL the service runs in-memory.
    let db_pool = match config.database_url.as_deref() {
        Some(url) => Some(linkex_api::db::init_pool(url).await.map_err(|e| {
            tracing::error!("Database initialization failed: {e}");
            e
        })?),
        None => {
            tracing::warn!("DATABASE_URL not set; state is kept in memory only");
            None
        }
    };

    let state = AppState::with_pool(config, db_pool)?;

    state.hydrate_from_db().await.map_err(|e| {
        tracing::error!("Database hydration failed: {e}");
        e
    })?;

    if let Some(admin) = linkex_api::routes::auth::bootstrap_admin(&state).await? {
        tracing::info!(user_id = %admin.id, "bootstrap admin created");
    }

    let _sweeper = linkex_api::settlement::spawn_auto_complete(state.clone());

    let app = linkex_api::app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Linkex API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
