use std::collections::BTreeSet;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::arrival::ArrivalAvailability;
use super::auth::ApiKey;
use super::error::{AppError, AppResult};
use super::AppState;
use crate::error::ForecastError;
use crate::types::{is_valid_lot_id, ForecastResult, LotSummary};

#[derive(Debug, Deserialize)]
pub struct AvailabilityRequest {
    pub parking_lot_id: String,
    pub count: usize,
    /// Return the forecast instead of stored readings. Needs an API key.
    #[serde(default)]
    pub forecast: bool,
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub model_name: String,
}

#[derive(Debug, Deserialize)]
pub struct ArrivalRequest {
    pub parking_lot_id: String,
    pub driving_time_seconds: u64,
}

/// Which catalog lots have a deployed model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCoverage {
    pub deployed: Vec<String>,
    /// Catalog lots without an artifact.
    pub missing: Vec<String>,
}

fn check_lot_id(lot_id: &str) -> Result<(), ForecastError> {
    if is_valid_lot_id(lot_id) {
        Ok(())
    } else {
        Err(ForecastError::InvalidRequest(format!(
            "parking lot id must be 1-16 alphanumeric characters, got {lot_id:?}"
        )))
    }
}

async fn run_forecast(
    state: &AppState,
    lot_id: &str,
    now: DateTime<Utc>,
) -> Result<ForecastResult, ForecastError> {
    state
        .bounded("forecast", state.forecasts.forecast_result_at(lot_id, now))
        .await
}

pub(super) async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let db_healthy = match state.bounded("database", state.repository.ping()).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "health check: database unreachable");
            false
        }
    };
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "db_healthy": db_healthy,
    }))
}

pub(super) async fn list_lots(State(state): State<AppState>) -> AppResult<Json<Vec<LotSummary>>> {
    let lots = state.bounded("database", state.repository.list_lots()).await?;
    Ok(Json(lots))
}

/// Recent readings for a lot, newest first, or its forecast.
pub(super) async fn lot_availability(
    State(state): State<AppState>,
    key: Option<ApiKey>,
    payload: Result<Json<AvailabilityRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(req) = payload?;
    check_lot_id(&req.parking_lot_id)?;
    let max = state.config.max_readings;
    if req.count == 0 || req.count > max {
        return Err(ForecastError::InvalidRequest(format!(
            "count must be between 1 and {max}, got {}",
            req.count
        ))
        .into());
    }

    if req.forecast {
        if key.is_none() {
            return Err(AppError::Forbidden("forecasts need a valid x-api-key".into()));
        }
        let result = run_forecast(&state, &req.parking_lot_id, Utc::now()).await?;
        return Ok(Json(result).into_response());
    }

    let readings = state
        .bounded(
            "database",
            state.repository.recent_readings(&req.parking_lot_id, req.count),
        )
        .await?;
    tracing::debug!(lot_id = %req.parking_lot_id, rows = readings.len(), "served readings");
    Ok(Json(readings).into_response())
}

pub(super) async fn predict(
    State(state): State<AppState>,
    _key: ApiKey,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> AppResult<Json<serde_json::Value>> {
    let Json(req) = payload?;
    check_lot_id(&req.model_name)?;
    let result = run_forecast(&state, &req.model_name, Utc::now()).await?;
    Ok(Json(json!({ "predictions": [result.predictions] })))
}

pub(super) async fn arrival(
    State(state): State<AppState>,
    _key: ApiKey,
    payload: Result<Json<ArrivalRequest>, JsonRejection>,
) -> AppResult<Json<ArrivalAvailability>> {
    let Json(req) = payload?;
    let lot_id = req.parking_lot_id.as_str();
    check_lot_id(lot_id)?;

    let policy = state.config.slots;
    // one clock for both the slot arithmetic and the forecast window
    let now = Utc::now();
    let minute = now.with_timezone(&state.config.utc_offset).minute();
    let wants_forecast = !policy.prefers_live(req.driving_time_seconds);

    let live = state.bounded("database", state.repository.get_lot(lot_id));
    let forecast = async {
        if wants_forecast {
            Some(run_forecast(&state, lot_id, now).await)
        } else {
            None
        }
    };
    let (live, forecast) = futures::future::join(live, forecast).await;

    Ok(Json(ArrivalAvailability::assemble(
        lot_id,
        req.driving_time_seconds,
        minute,
        &policy,
        live?.as_ref(),
        forecast,
    )))
}

/// Deployed artifacts against the catalog.
pub(super) async fn model_coverage(State(state): State<AppState>) -> AppResult<Json<ModelCoverage>> {
    let (deployed, catalog) = futures::future::try_join(
        state.bounded("artifact store", state.store.list_lot_ids()),
        state.bounded("database", state.repository.list_lots()),
    )
    .await?;

    let have: BTreeSet<&str> = deployed.iter().map(String::as_str).collect();
    let missing: Vec<String> = catalog
        .into_iter()
        .map(|lot| lot.id)
        .filter(|id| !have.contains(id.as_str()))
        .collect();
    if !missing.is_empty() {
        tracing::info!(missing = missing.len(), "catalog lots without a deployed model");
    }

    Ok(Json(ModelCoverage { deployed, missing }))
}
