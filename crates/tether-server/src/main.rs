use anyhow::Result;
use axum::{routing::get, Json, Router};
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tether=info,tower_http=debug")),
        )
        .init();

    let args = cli::Args::parse();
    let config = config::Config::load(&args.config)?;

    ensure_database_dir(&config.database.url);

    let engine = tether_db::detect_database_engine(&config.database.url)?;
    let db = tether_db::create_pool(&config.database.url, config.database.max_connections).await?;
    tether_db::run_migrations(&db).await?;

    let app_config = tether_core::AppConfig {
        jwt_secret: config.auth.jwt_secret.clone(),
        synthetic_prefix: config.chat.synthetic_prefix.clone(),
        cache_max_conversations: config.chat.cache_max_conversations,
        cache_ttl_secs: config.chat.cache_ttl_secs,
    };
    let state = tether_core::AppState::new(db, app_config);
    let shutdown = state.shutdown.clone();

    let app = Router::new()
        .route("/health", get(health))
        .merge(tether_ws::gateway_router())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;

    tracing::info!("tether-server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("listening on http://{}", config.server.bind_address);
    tracing::info!(
        "database: {} ({} max connections)",
        engine.as_str(),
        config.database.max_connections
    );
    tracing::info!(
        "recent-message cache: {} conversations, {}s ttl",
        config.chat.cache_max_conversations,
        config.chat.cache_ttl_secs
    );

    // Graceful shutdown: stop accepting connections and wake any pending
    // auto-reply tasks so they exit instead of writing after teardown.
    let shutdown_signal = async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutting down (ctrl-c)...");
        shutdown.notify_waiters();
    };

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "tether-server",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok",
    }))
}

/// Ensure the sqlite database's parent directory exists before the pool opens.
fn ensure_database_dir(url: &str) {
    if let Some(db_path) = url
        .strip_prefix("sqlite://")
        .and_then(|s| s.split('?').next())
    {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
    }
}
