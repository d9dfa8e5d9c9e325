//! Image upload route.
//!
//! `POST /uploads` accepts a multipart body with a `file` field holding an
//! `image/*` payload. The file is written under a fresh UUID name keeping its
//! extension and served back from `/uploads/<name>` by the static file
//! service mounted next to this route.

use std::path::Path;

use axum::extract::{Multipart, State};
use axum::extract::multipart::{Field, MultipartError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::AppState;

const UPLOAD_FIELD: &str = "file";
const DEFAULT_EXTENSION: &str = "png";

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("no file uploaded")]
    MissingFile,
    #[error("only image uploads are allowed")]
    NotImage,
    #[error("file exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("invalid multipart body: {message}")]
    Multipart { status: StatusCode, message: String },
    #[error("failed to store upload: {0}")]
    Io(#[from] std::io::Error),
}

impl From<MultipartError> for UploadError {
    fn from(e: MultipartError) -> Self {
        Self::Multipart { status: e.status(), message: e.body_text() }
    }
}

impl UploadError {
    fn status(&self) -> StatusCode {
        match self {
            Self::MissingFile | Self::NotImage => StatusCode::BAD_REQUEST,
            Self::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Multipart { status, .. } => *status,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, "upload failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub url: String,
}

/// `POST /uploads` — store one image and return its public URL.
pub async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, UploadError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let is_image = field
            .content_type()
            .is_some_and(|ct| ct.starts_with("image/"));
        if !is_image {
            return Err(UploadError::NotImage);
        }

        let extension = field
            .file_name()
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or(DEFAULT_EXTENSION)
            .to_ascii_lowercase();

        let bytes = read_limited(field, state.config.upload_max_bytes).await?;
        let name = format!("{}.{extension}", Uuid::new_v4());
        tokio::fs::create_dir_all(&state.config.uploads_dir).await?;
        tokio::fs::write(state.config.uploads_dir.join(&name), &bytes).await?;

        info!(%name, size = bytes.len(), "image uploaded");
        return Ok(Json(UploadResponse { url: format!("/uploads/{name}") }));
    }
    Err(UploadError::MissingFile)
}

/// Buffer a field, failing as soon as it exceeds `limit` bytes.
async fn read_limited(mut field: Field<'_>, limit: usize) -> Result<Vec<u8>, UploadError> {
    let mut buf = Vec::new();
    while let Some(chunk) = field.chunk().await? {
        if buf.len() + chunk.len() > limit {
            return Err(UploadError::TooLarge { limit });
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

#[cfg(test)]
#[path = "uploads_test.rs"]
mod tests;
