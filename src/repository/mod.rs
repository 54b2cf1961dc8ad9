//! Lot catalog and occupancy history.
//!
//! Rows are written by the external ingestion job and pruned by the
//! retention job; this service only reads them.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ForecastError;
use crate::types::{LotSummary, OccupancyReading, ParkingLot, PrecipitationReading};

pub use memory::MemoryRepository;
pub use postgres::{create_pool, run_migrations, DbPool, PgRepository};

#[async_trait]
pub trait AvailabilityRepository: Send + Sync {
    /// Every catalog lot, ordered by id.
    async fn list_lots(&self) -> Result<Vec<LotSummary>, ForecastError>;

    async fn get_lot(&self, lot_id: &str) -> Result<Option<ParkingLot>, ForecastError>;

    /// The `count` most recent readings, newest first. Unknown lots yield an
    /// empty list.
    async fn recent_readings(
        &self,
        lot_id: &str,
        count: usize,
    ) -> Result<Vec<OccupancyReading>, ForecastError>;

    /// Readings at or after `since`, oldest first.
    async fn readings_since(
        &self,
        lot_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<OccupancyReading>, ForecastError>;

    /// Precipitation samples at or after `since`, oldest first.
    async fn precipitation_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<PrecipitationReading>, ForecastError>;

    async fn ping(&self) -> Result<(), ForecastError>;
}
