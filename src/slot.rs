//! Arrival time to forecast slot mapping.
//!
//! Forecast entry `k` describes the wall-clock step boundary `k` steps
//! after the next one, on the grid of the model that produced it. The resolver rounds the driving time onto that grid
//! and never yields an index the model does not produce.

use serde::Serialize;

pub const DEFAULT_STEP_MINUTES: u32 = 15;
pub const DEFAULT_HORIZON_STEPS: usize = 8;
/// Below this driving time the live reading beats any forecast.
pub const DEFAULT_LIVE_THRESHOLD_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SlotPolicy {
    pub step_minutes: u32,
    pub horizon_steps: usize,
    /// Index returned when the arrival lies beyond the horizon.
    pub fallback_step: usize,
    pub live_threshold_secs: u64,
}

impl Default for SlotPolicy {
    fn default() -> Self {
        Self::for_horizon(DEFAULT_STEP_MINUTES, DEFAULT_HORIZON_STEPS)
    }
}

impl SlotPolicy {
    /// Policy whose fallback is the last forecast entry.
    pub fn for_horizon(step_minutes: u32, horizon_steps: usize) -> Self {
        let horizon_steps = horizon_steps.max(1);
        Self {
            step_minutes: step_minutes.max(1),
            horizon_steps,
            fallback_step: horizon_steps - 1,
            live_threshold_secs: DEFAULT_LIVE_THRESHOLD_SECS,
        }
    }

    pub fn with_fallback_step(mut self, fallback_step: usize) -> Self {
        self.fallback_step = fallback_step.min(self.max_step());
        self
    }

    pub fn max_step(&self) -> usize {
        self.horizon_steps.saturating_sub(1)
    }

    /// Forecast index for a driver arriving `driving_time_seconds` from now,
    /// where `now_minute_of_hour` is the current wall-clock minute.
    ///
    /// A remainder of exactly half a step rounds down.
    pub fn resolve_step(&self, now_minute_of_hour: u32, driving_time_seconds: u64) -> usize {
        let step = f64::from(self.step_minutes);
        let minute = now_minute_of_hour % 60;
        let next_boundary_offset = (self.step_minutes - minute % self.step_minutes) % self.step_minutes;

        let total_minutes = f64::from(next_boundary_offset) + driving_time_seconds as f64 / 60.0;
        let quotient = (total_minutes / step).floor();
        let remainder = total_minutes - quotient * step;

        let mut index = quotient;
        if remainder > step / 2.0 {
            index += 1.0;
        }

        if index > self.max_step() as f64 {
            tracing::debug!(
                now_minute_of_hour,
                driving_time_seconds,
                fallback = self.fallback_step,
                "arrival beyond forecast horizon"
            );
            return self.fallback_step.min(self.max_step());
        }
        index as usize
    }

    /// Whether the caller should show the live reading instead of a forecast.
    pub fn prefers_live(&self, driving_time_seconds: u64) -> bool {
        driving_time_seconds < self.live_threshold_secs
    }

    /// Minutes from `now_minute_of_hour` to the boundary described by `step`.
    pub fn slot_offset_minutes(&self, now_minute_of_hour: u32, step: usize) -> u32 {
        let minute = now_minute_of_hour % 60;
        let next_boundary_offset = (self.step_minutes - minute % self.step_minutes) % self.step_minutes;
        next_boundary_offset + self.step_minutes * step as u32
    }
}

/// [`SlotPolicy::resolve_step`] with the 15-minute, 8-step defaults.
pub fn resolve_step(now_minute_of_hour: u32, driving_time_seconds: u64) -> usize {
    SlotPolicy::default().resolve_step(now_minute_of_hour, driving_time_seconds)
}
