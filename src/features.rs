//! Inference-time feature construction.
//!
//! Models are trained on 15-minute resampled occupancy series with cyclical
//! calendar encodings. The artifact manifest lists the features in training
//! order; rows built here follow that order exactly and go through the same
//! MinMax scaling the training pipeline fit.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use chrono::{DateTime, Datelike, Duration, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{OccupancyReading, PrecipitationReading};

pub const SUPPORTED_SCHEMA_VERSION: u32 = 1;
/// Upper bound for `window` and `horizon` in a manifest.
pub const MAX_SCHEMA_STEPS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    LotsAvailable,
    Precipitation,
    HourSin,
    HourCos,
    MinuteSin,
    MinuteCos,
    DaySin,
    DayCos,
    DayOfMonthSin,
    DayOfMonthCos,
    MonthSin,
    MonthCos,
    IsWeekend,
    /// Minutes since the manifest's `time_origin`.
    TimeIndex,
    /// Minutes since local midnight over 1440.
    TimeOfDay,
    /// Monday = 0, over 7.
    DayOfWeek,
}

fn default_step_minutes() -> u32 {
    15
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub features: Vec<FeatureKind>,
    /// Number of past steps the model consumes.
    pub window: usize,
    /// Number of future steps the model emits.
    pub horizon: usize,
    #[serde(default = "default_step_minutes")]
    pub step_minutes: u32,
}

impl FeatureSchema {
    pub fn width(&self) -> usize {
        self.features.len()
    }

    pub fn uses(&self, kind: FeatureKind) -> bool {
        self.features.contains(&kind)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.version != SUPPORTED_SCHEMA_VERSION {
            return Err(format!(
                "schema version {} is not supported (expected {SUPPORTED_SCHEMA_VERSION})",
                self.version
            ));
        }
        if !self.uses(FeatureKind::LotsAvailable) {
            return Err("schema has no lots_available feature".into());
        }
        for (i, kind) in self.features.iter().enumerate() {
            if self.features[..i].contains(kind) {
                return Err(format!("feature {kind:?} listed twice"));
            }
        }
        if self.window == 0 || self.horizon == 0 {
            return Err("window and horizon must be positive".into());
        }
        if self.window > MAX_SCHEMA_STEPS || self.horizon > MAX_SCHEMA_STEPS {
            return Err(format!(
                "window {} / horizon {} exceed {MAX_SCHEMA_STEPS} steps",
                self.window, self.horizon
            ));
        }
        if self.step_minutes == 0 || 60 % self.step_minutes != 0 {
            return Err(format!(
                "step of {} minutes does not divide an hour",
                self.step_minutes
            ));
        }
        Ok(())
    }

    pub fn step(&self) -> Duration {
        Duration::minutes(i64::from(self.step_minutes))
    }
}

/// Per-column MinMax scaling onto `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub data_min: Vec<f32>,
    pub data_max: Vec<f32>,
}

impl MinMaxScaler {
    pub fn len(&self) -> usize {
        self.data_min.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_min.is_empty()
    }

    fn range(&self, i: usize) -> f32 {
        let range = self.data_max[i] - self.data_min[i];
        // constant columns were fit with a unit scale
        if range == 0.0 {
            1.0
        } else {
            range
        }
    }

    pub fn transform(&self, row: &mut [f32]) {
        for (i, x) in row.iter_mut().enumerate().take(self.len()) {
            *x = (*x - self.data_min[i]) / self.range(i);
        }
    }

    pub fn inverse_transform(&self, row: &mut [f32]) {
        for (i, x) in row.iter_mut().enumerate().take(self.len()) {
            *x = *x * self.range(i) + self.data_min[i];
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scalers {
    /// One column per schema feature.
    #[serde(default)]
    pub input: Option<MinMaxScaler>,
    /// One column per horizon step.
    #[serde(default)]
    pub target: Option<MinMaxScaler>,
}

impl Scalers {
    pub fn validate(&self, schema: &FeatureSchema) -> Result<(), String> {
        for (name, scaler, expected) in [
            ("input", &self.input, schema.width()),
            ("target", &self.target, schema.horizon),
        ] {
            if let Some(scaler) = scaler {
                if scaler.data_min.len() != expected || scaler.data_max.len() != expected {
                    return Err(format!(
                        "{name} scaler has {}/{} columns, expected {expected}",
                        scaler.data_min.len(),
                        scaler.data_max.len()
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Why a window could not be assembled.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowError {
    /// The stored history covers only `available` of the `required` steps.
    Insufficient { required: usize, available: usize },
    /// The newest reading is older than the staleness limit.
    Stale { newest: DateTime<Utc> },
    /// The schema wants precipitation but none is stored for the window.
    NoPrecipitation,
}

/// Model input for one forecast: `rows[k]` describes `slots[k]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureWindow {
    pub slots: Vec<DateTime<FixedOffset>>,
    pub rows: Vec<Vec<f32>>,
}

pub struct WindowBuilder<'a> {
    schema: &'a FeatureSchema,
    offset: FixedOffset,
    time_origin: Option<DateTime<Utc>>,
    max_staleness: Duration,
}

impl<'a> WindowBuilder<'a> {
    pub fn new(schema: &'a FeatureSchema, offset: FixedOffset, max_staleness: Duration) -> Self {
        Self {
            schema,
            offset,
            time_origin: None,
            max_staleness,
        }
    }

    pub fn with_time_origin(mut self, origin: Option<DateTime<Utc>>) -> Self {
        self.time_origin = origin;
        self
    }

    /// How far back readings must reach for a full window. Needs a
    /// validated schema.
    pub fn lookback(&self) -> Duration {
        let window = self.schema.window.min(MAX_SCHEMA_STEPS) as i32;
        self.schema.step() * window + self.max_staleness
    }

    fn step_secs(&self) -> i64 {
        i64::from(self.schema.step_minutes) * 60
    }

    fn bucket_of(&self, ts: DateTime<Utc>) -> i64 {
        let local_secs = ts.timestamp() + i64::from(self.offset.local_minus_utc());
        local_secs.div_euclid(self.step_secs())
    }

    // The bucket right before the first forecast entry, which starts at the
    // next step boundary at or after `now`.
    fn last_observed_bucket(&self, now: DateTime<Utc>) -> i64 {
        let local_secs = now.timestamp() + i64::from(self.offset.local_minus_utc());
        let bucket = local_secs.div_euclid(self.step_secs());
        let on_boundary =
            local_secs.rem_euclid(self.step_secs()) == 0 && now.timestamp_subsec_nanos() == 0;
        if on_boundary {
            bucket - 1
        } else {
            bucket
        }
    }

    /// Start of the slot described by forecast entry 0 at `now`.
    pub fn forecast_start(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        self.bucket_start(self.last_observed_bucket(now) + 1)
    }

    fn bucket_start(&self, bucket: i64) -> DateTime<FixedOffset> {
        let utc_secs = bucket * self.step_secs() - i64::from(self.offset.local_minus_utc());
        DateTime::from_timestamp(utc_secs, 0)
            .unwrap_or_default()
            .with_timezone(&self.offset)
    }

    /// Resamples `readings` (ascending) onto the step grid and encodes the
    /// `window` buckets that end where the forecast starts. Buckets after the
    /// newest reading carry it forward, so row `window - 1` always directly
    /// precedes [`forecast_start`](Self::forecast_start).
    pub fn build(
        &self,
        readings: &[OccupancyReading],
        precipitation: &[PrecipitationReading],
        now: DateTime<Utc>,
    ) -> Result<FeatureWindow, WindowError> {
        let window = self.schema.window;
        let newest = readings.last().ok_or(WindowError::Insufficient {
            required: window,
            available: 0,
        })?;
        if now - newest.recorded_at > self.max_staleness {
            return Err(WindowError::Stale {
                newest: newest.recorded_at,
            });
        }

        let end = self.last_observed_bucket(now);
        let first = end - (window as i64 - 1);

        let occupancy = bucket_means(
            readings
                .iter()
                .map(|r| (self.bucket_of(r.recorded_at), f64::from(r.lots_available))),
        );

        // value carried into the window from before its first bucket
        let mut carry = occupancy.range(..first).next_back().map(|(_, v)| *v);
        let mut lots = Vec::with_capacity(window);
        let mut leading_gaps = 0;
        for bucket in first..=end {
            match occupancy.get(&bucket).copied().or(carry) {
                Some(v) => {
                    lots.push(v);
                    carry = Some(v);
                }
                None => leading_gaps += 1,
            }
        }
        if leading_gaps > 0 {
            return Err(WindowError::Insufficient {
                required: window,
                available: window - leading_gaps,
            });
        }

        let rain = if self.schema.uses(FeatureKind::Precipitation) {
            Some(self.resample_precipitation(precipitation, first, end)?)
        } else {
            None
        };

        let slots: Vec<_> = (first..=end).map(|b| self.bucket_start(b)).collect();
        let rows = slots
            .iter()
            .enumerate()
            .map(|(k, slot)| {
                self.schema
                    .features
                    .iter()
                    .map(|kind| {
                        self.encode(*kind, slot, lots[k], rain.as_ref().map_or(0.0, |r| r[k]))
                    })
                    .collect()
            })
            .collect();

        Ok(FeatureWindow { slots, rows })
    }

    fn resample_precipitation(
        &self,
        precipitation: &[PrecipitationReading],
        first: i64,
        end: i64,
    ) -> Result<Vec<f64>, WindowError> {
        let means = bucket_means(
            precipitation
                .iter()
                .map(|p| (self.bucket_of(p.recorded_at), p.precipitation_mm)),
        );
        let mut values: Vec<Option<f64>> = (first..=end).map(|b| means.get(&b).copied()).collect();
        // neighbours outside the window anchor the interpolation
        let before = means.range(..first).next_back().map(|(b, v)| (first - b, *v));
        let after = means.range(end + 1..).next().map(|(b, v)| (b - end, *v));
        if fill_gaps(&mut values, before, after) {
            Ok(values.into_iter().map(|v| v.unwrap_or_default()).collect())
        } else {
            Err(WindowError::NoPrecipitation)
        }
    }

    fn encode(&self, kind: FeatureKind, slot: &DateTime<FixedOffset>, lots: f64, rain: f64) -> f32 {
        let cyclic = |value: u32, period: f64| 2.0 * PI * f64::from(value) / period;
        let weekday = slot.weekday().num_days_from_monday();
        let value = match kind {
            FeatureKind::LotsAvailable => lots,
            FeatureKind::Precipitation => rain,
            FeatureKind::HourSin => cyclic(slot.hour(), 24.0).sin(),
            FeatureKind::HourCos => cyclic(slot.hour(), 24.0).cos(),
            FeatureKind::MinuteSin => cyclic(slot.minute(), 60.0).sin(),
            FeatureKind::MinuteCos => cyclic(slot.minute(), 60.0).cos(),
            FeatureKind::DaySin => cyclic(weekday, 7.0).sin(),
            FeatureKind::DayCos => cyclic(weekday, 7.0).cos(),
            FeatureKind::DayOfMonthSin => cyclic(slot.day(), 31.0).sin(),
            FeatureKind::DayOfMonthCos => cyclic(slot.day(), 31.0).cos(),
            FeatureKind::MonthSin => cyclic(slot.month(), 12.0).sin(),
            FeatureKind::MonthCos => cyclic(slot.month(), 12.0).cos(),
            FeatureKind::IsWeekend => {
                if weekday >= 5 {
                    1.0
                } else {
                    0.0
                }
            }
            FeatureKind::TimeIndex => self
                .time_origin
                .map_or(0.0, |origin| (slot.with_timezone(&Utc) - origin).num_seconds() as f64 / 60.0),
            FeatureKind::TimeOfDay => f64::from(slot.hour() * 60 + slot.minute()) / 1440.0,
            FeatureKind::DayOfWeek => f64::from(weekday) / 7.0,
        };
        value as f32
    }
}

fn bucket_means(samples: impl Iterator<Item = (i64, f64)>) -> BTreeMap<i64, f64> {
    let mut sums: BTreeMap<i64, (f64, u32)> = BTreeMap::new();
    for (bucket, value) in samples {
        let entry = sums.entry(bucket).or_default();
        entry.0 += value;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(bucket, (sum, n))| (bucket, sum / f64::from(n)))
        .collect()
}

/// Linear interpolation of interior gaps; edges take the nearest known
/// value. `before`/`after` are `(distance in steps, value)` anchors outside
/// the slice. Returns `false` when nothing is known.
fn fill_gaps(values: &mut [Option<f64>], before: Option<(i64, f64)>, after: Option<(i64, f64)>) -> bool {
    let n = values.len() as i64;
    let mut known: Vec<(i64, f64)> = Vec::new();
    if let Some((distance, v)) = before {
        known.push((-distance, v));
    }
    known.extend(
        values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|v| (i as i64, v))),
    );
    if let Some((distance, v)) = after {
        known.push((n - 1 + distance, v));
    }
    if known.is_empty() {
        return false;
    }

    for (i, slot) in values.iter_mut().enumerate() {
        if slot.is_some() {
            continue;
        }
        let i = i as i64;
        let left = known.iter().rev().find(|(k, _)| *k < i);
        let right = known.iter().find(|(k, _)| *k > i);
        *slot = Some(match (left, right) {
            (Some(&(l, lv)), Some(&(r, rv))) => lv + (rv - lv) * (i - l) as f64 / (r - l) as f64,
            (Some(&(_, v)), None) | (None, Some(&(_, v))) => v,
            (None, None) => return false,
        });
    }
    true
}
