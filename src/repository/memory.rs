use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::AvailabilityRepository;
use crate::error::ForecastError;
use crate::types::{LotSummary, OccupancyReading, ParkingLot, PrecipitationReading};

#[derive(Default)]
struct Tables {
    lots: BTreeMap<String, ParkingLot>,
    // kept sorted by recorded_at
    readings: BTreeMap<String, Vec<OccupancyReading>>,
    precipitation: Vec<PrecipitationReading>,
}

/// Repository held in process memory, mirroring the Postgres tables.
#[derive(Default)]
pub struct MemoryRepository {
    tables: RwLock<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_lot(&self, lot: ParkingLot) {
        self.tables.write().lots.insert(lot.id.clone(), lot);
    }

    /// Appends a reading and refreshes the lot's live columns, like the
    /// ingestion job. Readings for lots missing from the catalog are
    /// rejected, matching the foreign key.
    pub fn record(&self, reading: OccupancyReading) -> Result<(), ForecastError> {
        let mut tables = self.tables.write();
        let lot = tables
            .lots
            .get_mut(&reading.lot_id)
            .ok_or_else(|| ForecastError::InvalidRequest(format!("unknown lot {}", reading.lot_id)))?;
        if lot.updated_at.map_or(true, |at| at <= reading.recorded_at) {
            lot.lots_available = reading.lots_available;
            lot.total_lots = reading.total_lots;
            lot.updated_at = Some(reading.recorded_at);
        }

        let rows = tables.readings.entry(reading.lot_id.clone()).or_default();
        let at = rows.partition_point(|r| r.recorded_at <= reading.recorded_at);
        rows.insert(at, reading);
        Ok(())
    }

    pub fn record_precipitation(&self, reading: PrecipitationReading) {
        let mut tables = self.tables.write();
        let at = tables
            .precipitation
            .partition_point(|r| r.recorded_at <= reading.recorded_at);
        tables.precipitation.insert(at, reading);
    }
}

#[async_trait]
impl AvailabilityRepository for MemoryRepository {
    async fn list_lots(&self) -> Result<Vec<LotSummary>, ForecastError> {
        Ok(self.tables.read().lots.values().map(LotSummary::from).collect())
    }

    async fn get_lot(&self, lot_id: &str) -> Result<Option<ParkingLot>, ForecastError> {
        Ok(self.tables.read().lots.get(lot_id).cloned())
    }

    async fn recent_readings(
        &self,
        lot_id: &str,
        count: usize,
    ) -> Result<Vec<OccupancyReading>, ForecastError> {
        let tables = self.tables.read();
        Ok(tables
            .readings
            .get(lot_id)
            .map(|rows| rows.iter().rev().take(count).cloned().collect())
            .unwrap_or_default())
    }

    async fn readings_since(
        &self,
        lot_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<OccupancyReading>, ForecastError> {
        let tables = self.tables.read();
        Ok(tables
            .readings
            .get(lot_id)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.recorded_at >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn precipitation_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<PrecipitationReading>, ForecastError> {
        Ok(self
            .tables
            .read()
            .precipitation
            .iter()
            .filter(|r| r.recorded_at >= since)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), ForecastError> {
        Ok(())
    }
}
