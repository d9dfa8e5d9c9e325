//! Board REST routes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde::Serialize;
use tracing::error;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CreateBoardResponse {
    pub id: String,
}

/// `POST /boards` — allocate a new board id.
pub async fn create_board(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<CreateBoardResponse>), (StatusCode, Json<serde_json::Value>)> {
    match state.registry.create().await {
        Ok(id) => Ok((StatusCode::CREATED, Json(CreateBoardResponse { id }))),
        Err(e) => {
            error!(error = %e, "board create failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": "board create failed" }))))
        }
    }
}

/// `GET /health` — liveness plus the number of boards held in memory.
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true, "boards": state.registry.len().await }))
}
