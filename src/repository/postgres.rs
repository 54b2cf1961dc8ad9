use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;

use super::AvailabilityRepository;
use crate::error::ForecastError;
use crate::types::{LotSummary, OccupancyReading, ParkingLot, PrecipitationReading};

pub type DbPool = sqlx::PgPool;

const LOT_COLUMNS: &str = "id, name, total_lots, lots_available, updated_at";
const READING_COLUMNS: &str = "lot_id, recorded_at, lots_available, total_lots";

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

#[derive(Clone)]
pub struct PgRepository {
    pool: DbPool,
}

impl PgRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AvailabilityRepository for PgRepository {
    async fn list_lots(&self) -> Result<Vec<LotSummary>, ForecastError> {
        sqlx::query_as::<_, LotSummary>("SELECT id, name FROM parking_lots ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(ForecastError::database)
    }

    async fn get_lot(&self, lot_id: &str) -> Result<Option<ParkingLot>, ForecastError> {
        let query = format!("SELECT {LOT_COLUMNS} FROM parking_lots WHERE id = $1");
        sqlx::query_as::<_, ParkingLot>(&query)
            .bind(lot_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ForecastError::database)
    }

    async fn recent_readings(
        &self,
        lot_id: &str,
        count: usize,
    ) -> Result<Vec<OccupancyReading>, ForecastError> {
        let query = format!(
            "SELECT {READING_COLUMNS} FROM occupancy_readings \
             WHERE lot_id = $1 ORDER BY recorded_at DESC LIMIT $2"
        );
        sqlx::query_as::<_, OccupancyReading>(&query)
            .bind(lot_id)
            .bind(i64::try_from(count).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(ForecastError::database)
    }

    async fn readings_since(
        &self,
        lot_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<OccupancyReading>, ForecastError> {
        let query = format!(
            "SELECT {READING_COLUMNS} FROM occupancy_readings \
             WHERE lot_id = $1 AND recorded_at >= $2 ORDER BY recorded_at ASC"
        );
        sqlx::query_as::<_, OccupancyReading>(&query)
            .bind(lot_id)
            .bind(since)
            .fetch_all(&self.pool)
            .await
            .map_err(ForecastError::database)
    }

    async fn precipitation_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<PrecipitationReading>, ForecastError> {
        sqlx::query_as::<_, PrecipitationReading>(
            "SELECT recorded_at, precipitation_mm FROM precipitation_readings \
             WHERE recorded_at >= $1 ORDER BY recorded_at ASC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(ForecastError::database)
    }

    async fn ping(&self) -> Result<(), ForecastError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(ForecastError::database)
    }
}
