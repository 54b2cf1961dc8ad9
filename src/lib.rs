//! Near-term parking availability forecasts for Singapore car parks.
//!
//! One trained model per lot is loaded on demand, fed the most recent
//! occupancy window and served over HTTP next to the live readings.

pub mod artifact;
pub mod config;
pub mod error;
pub mod features;
pub mod forecast;
pub mod gateway;
pub mod model;
pub mod repository;
pub mod slot;
pub mod types;

pub use error::ForecastError;
pub use forecast::ForecastService;
