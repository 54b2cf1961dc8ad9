//! HTTP edge of the service.

pub mod arrival;
pub mod auth;
pub mod error;
mod handlers;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderName;
use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::artifact::{ArtifactStore, ModelCache};
use crate::config::ServiceConfig;
use crate::error::ForecastError;
use crate::forecast::{ForecastService, ForecastSettings};
use crate::repository::AvailabilityRepository;

pub use arrival::{ArrivalAvailability, LiveState, PredictionState, Preferred};
pub use auth::{ApiKey, API_KEY_HEADER};
pub use error::{AppError, AppResult};
pub use handlers::ModelCoverage;

/// Shared state behind every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub store: Arc<dyn ArtifactStore>,
    pub repository: Arc<dyn AvailabilityRepository>,
    pub forecasts: Arc<ForecastService>,
}

impl AppState {
    pub fn new(
        config: ServiceConfig,
        store: Arc<dyn ArtifactStore>,
        repository: Arc<dyn AvailabilityRepository>,
    ) -> Self {
        let forecasts = ForecastService::new(
            store.clone(),
            repository.clone(),
            Arc::new(ModelCache::new()),
            ForecastSettings::from(&config),
        );
        Self {
            config: Arc::new(config),
            store,
            repository,
            forecasts: Arc::new(forecasts),
        }
    }

    /// Runs an upstream call under the configured timeout.
    pub(crate) async fn bounded<T>(
        &self,
        upstream: &'static str,
        call: impl Future<Output = Result<T, ForecastError>>,
    ) -> Result<T, ForecastError> {
        let limit: Duration = self.config.upstream_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(ForecastError::UpstreamUnavailable {
                upstream,
                message: format!("no answer within {} ms", limit.as_millis()),
            }),
        }
    }
}

/// Builds the router with the full middleware stack, from the outside in:
/// request id, tracing, id propagation, request timeout, panic recovery.
pub fn router(state: AppState) -> Router {
    let request_id_header = HeaderName::from_static("x-request-id");
    let request_timeout = state.config.request_timeout;

    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/parkinglot",
            get(handlers::list_lots).post(handlers::lot_availability),
        )
        .route("/predict", post(handlers::predict))
        .route("/availability", post(handlers::arrival))
        .route("/models", get(handlers::model_coverage))
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .with_state(state)
}
