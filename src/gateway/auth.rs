//! API key check for the forecast endpoints.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::error::AppError;
use super::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Proof that the request carried one of the configured keys.
///
/// Take `Option<ApiKey>` where the key is only needed for part of a
/// handler.
#[derive(Debug, Clone, Copy)]
pub struct ApiKey;

#[async_trait]
impl FromRequestParts<AppState> for ApiKey {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Forbidden(format!("missing {API_KEY_HEADER} header")))?;

        if state.config.api_keys.iter().any(|k| k == key) {
            Ok(ApiKey)
        } else {
            Err(AppError::Forbidden("invalid API key".into()))
        }
    }
}
