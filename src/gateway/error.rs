use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::ForecastError;

/// Error returned by HTTP handlers.
///
/// Renders as `{"error", "code", "retryable"}` with the status derived from
/// the failure kind.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Forecast(#[from] ForecastError),

    /// Missing or unknown API key.
    #[error("forbidden: {0}")]
    Forbidden(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Forecast(ForecastError::InvalidRequest(rejection.body_text()))
    }
}

fn status_for(err: &ForecastError) -> StatusCode {
    match err {
        ForecastError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ForecastError::ModelNotFound { .. } => StatusCode::NOT_FOUND,
        ForecastError::InsufficientHistory { .. } | ForecastError::UpstreamUnavailable { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ForecastError::SchemaMismatch { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, retryable) = match &self {
            AppError::Forecast(err) => (status_for(err), err.kind(), err.is_retryable()),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN", false),
        };

        if status.is_server_error() {
            tracing::error!(code, error = %self, "request failed");
        } else {
            tracing::debug!(code, error = %self, "request rejected");
        }

        let body = json!({
            "error": self.to_string(),
            "code": code,
            "retryable": retryable,
        });
        (status, Json(body)).into_response()
    }
}
