mod config;
mod db;
mod frame;
mod primitive;
mod routes;
mod services;
mod state;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::services::persistence::{BoardStore, MemoryStore};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::Config::from_env().expect("invalid configuration");
    let port = config.port;

    let store: Arc<dyn BoardStore> = if let Some(database_url) = &config.database_url {
        let pool = db::init_pool(database_url, config.db_max_connections)
            .await
            .expect("database init failed");
        info!("boards persisted to postgres");
        Arc::new(db::PgStore::new(pool))
    } else {
        info!("DATABASE_URL not set; boards are kept in memory only");
        Arc::new(MemoryStore)
    };

    tokio::fs::create_dir_all(&config.uploads_dir)
        .await
        .expect("failed to create uploads directory");

    let state = state::AppState::new(config, store);

    // Spawn background flush + eviction task.
    let _persistence = services::persistence::spawn_persistence_task(state.clone());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    info!(%port, "boardsync listening");
    axum::serve(listener, app).await.expect("server failed");
}
