use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use quarry_shared::QuarryError;
use serde_json::json;
use tracing::error;

/// Handler error. The body only ever carries [`QuarryError::public_message`].
#[derive(Debug)]
pub struct ApiError(pub QuarryError);

impl From<QuarryError> for ApiError {
    fn from(err: QuarryError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            QuarryError::Validation { .. } => StatusCode::BAD_REQUEST,
            QuarryError::NotFound(_) => StatusCode::NOT_FOUND,
            QuarryError::Config { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.public_message() }))).into_response()
    }
}
