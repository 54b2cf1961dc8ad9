use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Catalog row for a car park, maintained by the ingestion job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ParkingLot {
    pub id: String,
    pub name: String,
    pub total_lots: i32,
    pub lots_available: i32,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LotSummary {
    pub id: String,
    pub name: String,
}

impl From<&ParkingLot> for LotSummary {
    fn from(lot: &ParkingLot) -> Self {
        Self {
            id: lot.id.clone(),
            name: lot.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OccupancyReading {
    pub lot_id: String,
    pub recorded_at: DateTime<Utc>,
    pub lots_available: i32,
    pub total_lots: i32,
}

/// Region-wide rainfall sample, only consumed by precipitation-aware models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PrecipitationReading {
    pub recorded_at: DateTime<Utc>,
    pub precipitation_mm: f64,
}

/// Forecast entry picked for an arrival time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectedSlot {
    pub step: usize,
    pub lots_available: f32,
}

/// Full forecast for one lot, one entry per step. Entry `k` covers the slot
/// starting `k * step_minutes` after `starts_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub lot_id: String,
    pub step_minutes: u32,
    pub starts_at: DateTime<Utc>,
    pub predictions: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<SelectedSlot>,
}

impl ForecastResult {
    pub fn new(
        lot_id: impl Into<String>,
        step_minutes: u32,
        starts_at: DateTime<Utc>,
        predictions: Vec<f32>,
    ) -> Self {
        Self {
            lot_id: lot_id.into(),
            step_minutes,
            starts_at,
            predictions,
            selected: None,
        }
    }

    /// Pins the entry at `step`; out-of-range steps leave nothing selected.
    pub fn select(mut self, step: usize) -> Self {
        self.selected = self.predictions.get(step).map(|value| SelectedSlot {
            step,
            lots_available: *value,
        });
        self
    }
}

/// Lot identifiers follow the carpark numbering scheme, e.g. `A70`, `BJ55`.
pub fn is_valid_lot_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 16 && id.chars().all(|c| c.is_ascii_alphanumeric())
}
