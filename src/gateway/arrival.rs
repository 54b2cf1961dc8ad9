//! Live reading plus forecast for a driver on their way to a lot.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ForecastError;
use crate::slot::SlotPolicy;
use crate::types::{ForecastResult, ParkingLot};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LiveState {
    Reported {
        lots_available: i32,
        total_lots: i32,
        updated_at: DateTime<Utc>,
    },
    NoReading,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PredictionState {
    Predicted {
        step: usize,
        /// Minutes from now to the slot the prediction describes.
        slot_offset_minutes: u32,
        lots_available: f32,
    },
    /// Not requested, the live reading is close enough.
    Skipped,
    Unavailable {
        kind: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Preferred {
    Live,
    Forecast,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArrivalAvailability {
    pub lot_id: String,
    pub driving_time_seconds: u64,
    pub live: LiveState,
    pub prediction: PredictionState,
    pub preferred: Preferred,
}

impl From<Option<&ParkingLot>> for LiveState {
    fn from(lot: Option<&ParkingLot>) -> Self {
        match lot {
            Some(ParkingLot {
                lots_available,
                total_lots,
                updated_at: Some(updated_at),
                ..
            }) => LiveState::Reported {
                lots_available: *lots_available,
                total_lots: *total_lots,
                updated_at: *updated_at,
            },
            _ => LiveState::NoReading,
        }
    }
}

impl ArrivalAvailability {
    /// Combines the lookups. `forecast` is `None` when it was skipped
    /// because the live reading is preferred. Steps are resolved on the
    /// forecast's own grid; `policy` supplies the fallback and live threshold.
    pub fn assemble(
        lot_id: &str,
        driving_time_seconds: u64,
        now_minute_of_hour: u32,
        policy: &SlotPolicy,
        live: Option<&ParkingLot>,
        forecast: Option<Result<ForecastResult, ForecastError>>,
    ) -> Self {
        let prediction = match forecast {
            None => PredictionState::Skipped,
            Some(Err(err)) => PredictionState::Unavailable {
                kind: err.kind(),
                message: err.to_string(),
            },
            Some(Ok(result)) => {
                // the model decides the step length and how many steps exist
                let sized = SlotPolicy {
                    step_minutes: result.step_minutes.max(1),
                    horizon_steps: result.predictions.len(),
                    ..*policy
                }
                .with_fallback_step(policy.fallback_step);
                let step = sized.resolve_step(now_minute_of_hour, driving_time_seconds);
                match result.select(step).selected {
                    Some(slot) => PredictionState::Predicted {
                        step: slot.step,
                        slot_offset_minutes: sized.slot_offset_minutes(now_minute_of_hour, slot.step),
                        lots_available: slot.lots_available,
                    },
                    None => {
                        let err = ForecastError::schema(lot_id, "forecast has no steps");
                        PredictionState::Unavailable {
                            kind: err.kind(),
                            message: err.to_string(),
                        }
                    }
                }
            }
        };

        let preferred = match prediction {
            PredictionState::Predicted { .. } if !policy.prefers_live(driving_time_seconds) => {
                Preferred::Forecast
            }
            _ => Preferred::Live,
        };

        Self {
            lot_id: lot_id.to_string(),
            driving_time_seconds,
            live: LiveState::from(live),
            prediction,
            preferred,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use serde_json::json;

    fn lot() -> ParkingLot {
        ParkingLot {
            id: "A70".into(),
            name: "Blk 70 Ang Mo Kio".into(),
            total_lots: 120,
            lots_available: 33,
            updated_at: Some(Utc.with_ymd_and_hms(2024, 3, 4, 1, 0, 0).unwrap()),
        }
    }

    fn result(step_minutes: u32, predictions: Vec<f32>) -> ForecastResult {
        let starts_at = Utc.with_ymd_and_hms(2024, 3, 4, 1, 15, 0).unwrap();
        ForecastResult::new("A70", step_minutes, starts_at, predictions)
    }

    fn forecast() -> ForecastResult {
        result(15, (0..8).map(|i| 10.0 * i as f32).collect())
    }

    #[test]
    fn forecast_is_preferred_for_longer_drives() {
        let a = ArrivalAvailability::assemble(
            "A70",
            300,
            50,
            &SlotPolicy::default(),
            Some(&lot()),
            Some(Ok(forecast())),
        );
        assert_eq!(
            a.prediction,
            PredictionState::Predicted {
                step: 1,
                slot_offset_minutes: 25,
                lots_available: 10.0
            }
        );
        assert_eq!(a.preferred, Preferred::Forecast);
        assert_matches!(a.live, LiveState::Reported { lots_available: 33, .. });
    }

    #[test]
    fn short_drives_skip_the_forecast() {
        let a = ArrivalAvailability::assemble("A70", 120, 10, &SlotPolicy::default(), Some(&lot()), None);
        assert_eq!(a.prediction, PredictionState::Skipped);
        assert_eq!(a.preferred, Preferred::Live);
    }

    #[test]
    fn forecast_failures_degrade_to_live() {
        let a = ArrivalAvailability::assemble(
            "A70",
            1800,
            0,
            &SlotPolicy::default(),
            None,
            Some(Err(ForecastError::ModelNotFound { lot_id: "A70".into() })),
        );
        assert_matches!(a.prediction, PredictionState::Unavailable { kind: "MODEL_NOT_FOUND", .. });
        assert_eq!(a.live, LiveState::NoReading);
        assert_eq!(a.preferred, Preferred::Live);
    }

    #[test]
    fn long_drives_use_the_fallback_step() {
        let a = ArrivalAvailability::assemble(
            "A70",
            3 * 3600,
            0,
            &SlotPolicy::default(),
            Some(&lot()),
            Some(Ok(forecast())),
        );
        assert_matches!(a.prediction, PredictionState::Predicted { step: 7, .. });
    }

    #[test]
    fn shorter_models_clamp_the_step() {
        let a = ArrivalAvailability::assemble(
            "A70",
            3600,
            0,
            &SlotPolicy::default(),
            Some(&lot()),
            Some(Ok(result(15, vec![1.0, 2.0]))),
        );
        assert_matches!(a.prediction, PredictionState::Predicted { step: 1, .. });
    }

    #[test]
    fn slots_follow_the_model_step() {
        // the configured policy stays on quarters; the model is half-hourly
        let a = ArrivalAvailability::assemble(
            "A70",
            3600,
            13,
            &SlotPolicy::default(),
            Some(&lot()),
            Some(Ok(result(30, vec![5.0, 6.0, 7.0, 8.0]))),
        );
        assert_eq!(
            a.prediction,
            PredictionState::Predicted {
                step: 3,
                slot_offset_minutes: 107,
                lots_available: 8.0
            }
        );
        assert_eq!(a.preferred, Preferred::Forecast);
    }

    #[test]
    fn empty_forecasts_are_schema_mismatches() {
        let a = ArrivalAvailability::assemble(
            "A70",
            1800,
            0,
            &SlotPolicy::default(),
            Some(&lot()),
            Some(Ok(result(15, Vec::new()))),
        );
        let expected = ForecastError::schema("A70", "forecast has no steps");
        assert_eq!(
            a.prediction,
            PredictionState::Unavailable {
                kind: expected.kind(),
                message: expected.to_string(),
            }
        );
        assert_eq!(a.preferred, Preferred::Live);
    }

    #[test]
    fn serializes_as_tagged_records() {
        let a = ArrivalAvailability::assemble("A70", 60, 0, &SlotPolicy::default(), None, None);
        assert_eq!(
            serde_json::to_value(&a).unwrap(),
            json!({
                "lot_id": "A70",
                "driving_time_seconds": 60,
                "live": {"status": "no_reading"},
                "prediction": {"status": "skipped"},
                "preferred": "live"
            })
        );
    }
}
