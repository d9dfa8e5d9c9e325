//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds the websocket gateway and the small HTTP surface (board
//! creation, health, image uploads) under a single Axum router. Uploaded
//! images are served back as static files from the uploads directory.

pub mod boards;
pub mod uploads;
pub mod ws;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Headroom above the file limit for multipart boundaries and headers.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // `POST /uploads` stores a file; everything else under `/uploads` is a
    // static lookup in the uploads directory.
    let uploads = Router::new()
        .route(
            "/",
            post(uploads::upload_image)
                .layer(DefaultBodyLimit::max(state.config.upload_max_bytes + MULTIPART_OVERHEAD_BYTES)),
        )
        .fallback_service(ServeDir::new(&state.config.uploads_dir));

    Router::new()
        .route("/health", get(boards::health))
        .route("/boards", post(boards::create_board))
        .route("/ws", get(ws::handle_ws))
        .nest("/uploads", uploads)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
