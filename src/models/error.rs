use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProblemDetail {
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub code: String,
    pub request_id: String,
}

/// Request-path errors. Startup failures use [`StartupError`] instead and are
/// fatal — they never reach a response body.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("File must be an image, got content type '{0}'")]
    InvalidMimeType(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Model not loaded")]
    ModelNotLoaded,

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn to_problem_detail(&self, request_id: &str) -> ProblemDetail {
        let (status, code, title, detail) = match self {
            AppError::InvalidMimeType(mime) => (
                StatusCode::BAD_REQUEST,
                "INVALID_MIME_TYPE",
                "Invalid MIME Type",
                format!("File must be an image, got content type '{}'", mime),
            ),
            AppError::Validation(detail) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                "Validation Error",
                detail.clone(),
            ),
            AppError::Decode(detail) => (
                StatusCode::BAD_REQUEST,
                "DECODE_ERROR",
                "Unreadable Image",
                detail.clone(),
            ),
            AppError::ModelNotLoaded => (
                StatusCode::SERVICE_UNAVAILABLE,
                "MODEL_NOT_LOADED",
                "Model Not Loaded",
                "The colorization model is not loaded yet".to_string(),
            ),
            AppError::Inference(detail) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INFERENCE_ERROR",
                "Inference Error",
                detail.clone(),
            ),
            AppError::Internal(detail) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal Error",
                detail.clone(),
            ),
        };

        ProblemDetail {
            title: title.to_string(),
            status: status.as_u16(),
            detail,
            code: code.to_string(),
            request_id: request_id.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Errors short-circuit before the request-id middleware runs, so a
        // fresh id is generated here; the middleware overwrites the header
        // with the canonical one afterwards.
        let request_id = uuid::Uuid::new_v4().to_string();
        let problem = self.to_problem_detail(&request_id);
        let status =
            StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut response = (status, Json(problem)).into_response();
        response
            .headers_mut()
            .insert("X-Request-Id", request_id.parse().unwrap());
        response
            .headers_mut()
            .insert("Content-Type", "application/problem+json".parse().unwrap());
        response
    }
}

/// Fatal startup errors: missing or undownloadable model artifacts. The
/// operator resolves these manually — there is no degraded mode.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Model file not found: {0}")]
    ModelFileMissing(PathBuf),

    #[error("All {mirrors} mirrors exhausted for artifact '{name}'")]
    MirrorsExhausted { name: String, mirrors: usize },

    #[error("Artifact I/O error for '{name}': {source}")]
    ArtifactIo {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Cluster center array has shape {0:?}, expected (313, 2)")]
    BadClusterCenters(Vec<usize>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        let cases = [
            (AppError::InvalidMimeType("text/plain".into()), 400),
            (AppError::Validation("no file".into()), 400),
            (AppError::Decode("bad png".into()), 400),
            (AppError::ModelNotLoaded, 503),
            (AppError::Inference("boom".into()), 500),
            (AppError::Internal("boom".into()), 500),
        ];
        for (err, expected) in cases {
            assert_eq!(err.to_problem_detail("test").status, expected);
        }
    }

    #[test]
    fn inference_detail_surfaces_underlying_message() {
        let problem =
            AppError::Inference("session run failed: bad shape".into()).to_problem_detail("rid");
        assert_eq!(problem.detail, "session run failed: bad shape");
        assert_eq!(problem.request_id, "rid");
    }
}
