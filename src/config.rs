use std::path::PathBuf;
use std::time::Duration;

use chrono::FixedOffset;

use crate::slot::{SlotPolicy, DEFAULT_HORIZON_STEPS, DEFAULT_STEP_MINUTES};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Service configuration, read from the environment.
///
/// | Env Var                 | Default         |
/// |-------------------------|-----------------|
/// | `HOST`                  | `0.0.0.0`       |
/// | `PORT`                  | `8080`          |
/// | `DATABASE_URL`          | required        |
/// | `ARTIFACT_DIR`          | `./artifacts`   |
/// | `API_KEYS`              | required        |
/// | `UPSTREAM_TIMEOUT_MS`   | `5000`          |
/// | `REQUEST_TIMEOUT_SECS`  | `30`            |
/// | `UTC_OFFSET_MINUTES`    | `480`           |
/// | `MAX_STALENESS_MINUTES` | `60`            |
/// | `MAX_READINGS`          | `288`           |
/// | `FALLBACK_STEP`         | last step       |
/// | `LOG_PRED`              | `0`             |
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub artifact_dir: PathBuf,
    /// Accepted `x-api-key` values.
    pub api_keys: Vec<String>,
    /// Applied around each artifact load and database read.
    pub upstream_timeout: Duration,
    pub request_timeout: Duration,
    /// Local time used for calendar features and slot resolution.
    pub utc_offset: FixedOffset,
    pub max_staleness: Duration,
    /// Upper bound for `count` on `POST /parkinglot`.
    pub max_readings: usize,
    pub slots: SlotPolicy,
    /// Log per-request input window statistics.
    pub log_inputs: bool,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            name: &'static str,
            default: T,
        ) -> Result<T, ConfigError> {
            match lookup(name) {
                None => Ok(default),
                Some(value) => value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::Invalid { name, value }),
            }
        }

        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parsed(&lookup, "PORT", 8080)?;
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let artifact_dir = PathBuf::from(lookup("ARTIFACT_DIR").unwrap_or_else(|| "./artifacts".into()));

        let api_keys: Vec<String> = lookup("API_KEYS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if api_keys.is_empty() {
            return Err(ConfigError::Missing("API_KEYS"));
        }

        let upstream_timeout = Duration::from_millis(parsed::<u64>(&lookup, "UPSTREAM_TIMEOUT_MS", 5000)?);
        let request_timeout = Duration::from_secs(parsed::<u64>(&lookup, "REQUEST_TIMEOUT_SECS", 30)?);

        let offset_minutes: i32 = parsed(&lookup, "UTC_OFFSET_MINUTES", 480)?;
        let utc_offset = FixedOffset::east_opt(offset_minutes * 60).ok_or(ConfigError::Invalid {
            name: "UTC_OFFSET_MINUTES",
            value: offset_minutes.to_string(),
        })?;

        let max_staleness = Duration::from_secs(60 * parsed::<u64>(&lookup, "MAX_STALENESS_MINUTES", 60)?);
        let max_readings: usize = parsed(&lookup, "MAX_READINGS", 288)?;

        let mut slots = SlotPolicy::for_horizon(DEFAULT_STEP_MINUTES, DEFAULT_HORIZON_STEPS);
        if let Some(value) = lookup("FALLBACK_STEP") {
            let step: usize = value
                .trim()
                .parse()
                .ok()
                .filter(|s| *s <= slots.max_step())
                .ok_or(ConfigError::Invalid {
                    name: "FALLBACK_STEP",
                    value,
                })?;
            slots = slots.with_fallback_step(step);
        }

        let log_inputs = lookup("LOG_PRED").as_deref() == Some("1");

        Ok(Self {
            host,
            port,
            database_url,
            artifact_dir,
            api_keys,
            upstream_timeout,
            request_timeout,
            utc_offset,
            max_staleness,
            max_readings,
            slots,
            log_inputs,
        })
    }
}
