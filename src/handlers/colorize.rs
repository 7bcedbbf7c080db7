use axum::{
    extract::{Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::models::error::AppError;
use crate::services::pipeline;
use crate::AppState;

// ---------------------------------------------------------------------------
// POST /colorize
// ---------------------------------------------------------------------------

/// Accepts a multipart upload in the `file` field and responds with the
/// colorized image bytes. The whole numeric chain runs on the blocking pool
/// so a slow forward pass never stalls connection accept.
pub async fn colorize(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    // Nothing reaches inference before the backend installs.
    let backend = state.colorizer.backend().ok_or(AppError::ModelNotLoaded)?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Multipart error: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        if !content_type.starts_with("image/") {
            return Err(AppError::InvalidMimeType(content_type));
        }

        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to read upload: {}", e)))?;

        let _permit = state
            .colorize_semaphore
            .acquire()
            .await
            .map_err(|_| AppError::Internal("Colorize semaphore closed".to_string()))?;

        let result = tokio::task::spawn_blocking(move || {
            pipeline::colorize(backend.as_ref(), &data)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Task panicked: {}", e)))??;

        return Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, result.content_type.to_string()),
                (header::CONTENT_LENGTH, result.bytes.len().to_string()),
            ],
            result.bytes,
        )
            .into_response());
    }

    Err(AppError::Validation("No 'file' field in upload".to_string()))
}
