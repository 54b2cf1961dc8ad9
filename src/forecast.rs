//! The forecast pipeline: model lookup, window assembly, inference.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};

use crate::artifact::{ArtifactStore, LoadedModel, ModelCache};
use crate::config::ServiceConfig;
use crate::error::ForecastError;
use crate::features::{FeatureKind, WindowBuilder, WindowError};
use crate::repository::AvailabilityRepository;
use crate::types::{is_valid_lot_id, ForecastResult};

#[derive(Debug, Clone, Copy)]
pub struct ForecastSettings {
    pub utc_offset: FixedOffset,
    pub max_staleness: chrono::Duration,
    pub log_inputs: bool,
}

impl From<&ServiceConfig> for ForecastSettings {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            utc_offset: config.utc_offset,
            max_staleness: chrono::Duration::from_std(config.max_staleness)
                .unwrap_or_else(|_| chrono::Duration::minutes(60)),
            log_inputs: config.log_inputs,
        }
    }
}

pub struct ForecastService {
    store: Arc<dyn ArtifactStore>,
    repository: Arc<dyn AvailabilityRepository>,
    cache: Arc<ModelCache>,
    settings: ForecastSettings,
}

impl ForecastService {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        repository: Arc<dyn AvailabilityRepository>,
        cache: Arc<ModelCache>,
        settings: ForecastSettings,
    ) -> Self {
        Self {
            store,
            repository,
            cache,
            settings,
        }
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    pub fn settings(&self) -> &ForecastSettings {
        &self.settings
    }

    /// Predicted available lots for each future step of the lot's model.
    pub async fn forecast(&self, lot_id: &str) -> Result<Vec<f32>, ForecastError> {
        self.forecast_at(lot_id, Utc::now()).await
    }

    /// [`forecast`](Self::forecast) against an explicit clock.
    pub async fn forecast_at(
        &self,
        lot_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<f32>, ForecastError> {
        self.forecast_result_at(lot_id, now)
            .await
            .map(|result| result.predictions)
    }

    /// The forecast together with the model's step grid, so callers can map
    /// an arrival time onto an entry.
    pub async fn forecast_result(&self, lot_id: &str) -> Result<ForecastResult, ForecastError> {
        self.forecast_result_at(lot_id, Utc::now()).await
    }

    pub async fn forecast_result_at(
        &self,
        lot_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ForecastResult, ForecastError> {
        let result = self.run(lot_id, now).await;
        match &result {
            Ok(r) => tracing::debug!(
                lot_id,
                steps = r.predictions.len(),
                step_minutes = r.step_minutes,
                starts_at = %r.starts_at,
                "forecast ok"
            ),
            Err(e) => tracing::warn!(lot_id, kind = e.kind(), error = %e, "forecast failed"),
        }
        result
    }

    async fn run(&self, lot_id: &str, now: DateTime<Utc>) -> Result<ForecastResult, ForecastError> {
        if !is_valid_lot_id(lot_id) {
            return Err(ForecastError::InvalidRequest(format!(
                "malformed lot id {lot_id:?}"
            )));
        }

        let model = self.cache.get_or_load(self.store.as_ref(), lot_id).await?;
        let schema = &model.schema;

        let builder = WindowBuilder::new(schema, self.settings.utc_offset, self.settings.max_staleness)
            .with_time_origin(model.time_origin);
        let since = now - builder.lookback();

        let mut readings = self.repository.readings_since(lot_id, since).await?;
        // rows stamped after `now` belong to a later request
        readings.retain(|r| r.recorded_at <= now);
        let precipitation = if schema.uses(FeatureKind::Precipitation) {
            self.repository.precipitation_since(since).await?
        } else {
            Vec::new()
        };

        let window = builder
            .build(&readings, &precipitation, now)
            .map_err(|e| history_error(lot_id, schema.window, e))?;

        let mut rows = window.rows;
        if let Some(scaler) = &model.scalers.input {
            for row in &mut rows {
                scaler.transform(row);
            }
        }
        if self.settings.log_inputs {
            log_window(lot_id, &model, &rows);
        }

        let mut predictions = model
            .forecaster
            .predict(&rows)
            .map_err(|e| ForecastError::schema(lot_id, format!("inference failed: {e:#}")))?;
        if predictions.len() != schema.horizon {
            return Err(ForecastError::schema(
                lot_id,
                format!(
                    "model returned {} steps, schema horizon is {}",
                    predictions.len(),
                    schema.horizon
                ),
            ));
        }
        if let Some(scaler) = &model.scalers.target {
            scaler.inverse_transform(&mut predictions);
        }
        Ok(ForecastResult::new(
            lot_id,
            schema.step_minutes,
            builder.forecast_start(now).with_timezone(&Utc),
            predictions,
        ))
    }
}

fn history_error(lot_id: &str, required: usize, err: WindowError) -> ForecastError {
    let available = match err {
        WindowError::Insufficient { available, .. } => available,
        WindowError::Stale { newest } => {
            tracing::warn!(lot_id, %newest, "newest reading is stale");
            0
        }
        WindowError::NoPrecipitation => {
            tracing::warn!(lot_id, "no precipitation readings for the window");
            0
        }
    };
    ForecastError::InsufficientHistory {
        lot_id: lot_id.to_string(),
        required,
        available,
    }
}

// Confirms inputs are not all zeros when a model misbehaves.
fn log_window(lot_id: &str, model: &LoadedModel, rows: &[Vec<f32>]) {
    let values: Vec<f32> = rows.iter().flatten().copied().collect();
    let nz = values.iter().filter(|x| **x != 0.0).count();
    let mean = if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    };
    let std = if values.len() < 2 {
        0.0
    } else {
        (values.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / values.len() as f32).sqrt()
    };
    let sample: Vec<String> = match rows.last() {
        Some(last) => model
            .schema
            .features
            .iter()
            .zip(last)
            .take(6)
            .map(|(kind, v)| format!("{kind:?}={v:.3}"))
            .collect(),
        None => Vec::new(),
    };
    tracing::info!(
        lot_id,
        rows = rows.len(),
        in_dim = model.schema.width(),
        nonzero = nz,
        mean = %format!("{mean:.3}"),
        std = %format!("{std:.3}"),
        sample = %sample.join(", "),
        "forecast input window"
    );
}
