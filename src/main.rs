mod appointments;
mod auth;
mod config;
mod middleware;

mod db;
mod error;
mod live;
mod messaging;
mod models;
mod navigation;
mod routes;
mod storage;
#[cfg(test)]
mod test_support;

use std::sync::Arc;

use crate::{config::Config, live::LiveHub, models::AppState, storage::LocalFileStore};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::header;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg.database_url, cfg.db_max_connections).await?;
    let files = LocalFileStore::open(&cfg.records_dir).await?;
    tracing::info!(records_dir = %cfg.records_dir.display(), "record storage ready");

    let state = AppState {
        db: pool,
        session_ttl_hours: cfg.session_ttl_hours,
        max_record_bytes: cfg.max_record_bytes,
        live: LiveHub::new(),
        files: Arc::new(files),
    };

    // Browser clients run on another origin and send bearer tokens.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
