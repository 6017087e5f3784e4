//! Postgres-backed record and summary stores.
//!
//! Both share one r2d2 pool. Every connection handed out by the pool carries a
//! `statement_timeout`, and checkout itself is bounded by the pool's connection
//! timeout, so no store call blocks indefinitely.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::info;
use std::time::Duration;

use crate::db::models::{
    summary_from_rows, summary_to_rows, AirQualityRow, DbClock, NewRow, StatsRow, TemperatureRow,
};
use crate::error::PipelineError;
use crate::models::reading::{NewReading, ReadingKind, StoredReading};
use crate::models::summary::Summary;
use crate::schema;
use crate::store::{store_precision, RecordStore, SummaryStore};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type PgPool = Pool<ConnectionManager<PgConnection>>;
type PgPooled = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Debug, Clone, Copy)]
struct StatementTimeout(Duration);

impl CustomizeConnection<PgConnection, diesel::r2d2::Error> for StatementTimeout {
    fn on_acquire(&self, conn: &mut PgConnection) -> Result<(), diesel::r2d2::Error> {
        diesel::sql_query(format!("SET statement_timeout = {}", self.0.as_millis()))
            .execute(conn)
            .map(|_| ())
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Build the shared pool; `timeout` bounds both checkout and each statement.
pub fn build_pool(database_url: &str, max_size: u32, timeout: Duration) -> Result<PgPool, String> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder()
        .max_size(max_size)
        .connection_timeout(timeout)
        .connection_customizer(Box::new(StatementTimeout(timeout)))
        .build(manager)
        .map_err(|e| format!("DB connection failed: {}", e))
}

pub fn apply_database_migrations(pool: &PgPool) -> Result<(), String> {
    let mut conn = pool.get().map_err(|e| format!("DB connection failed: {}", e))?;
    match conn.run_pending_migrations(MIGRATIONS) {
        Ok(applied) => {
            if applied.is_empty() {
                info!("Database schema is up to date; no migrations were applied");
            } else {
                let names = applied.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
                info!("Applied {} database migration(s): {}", applied.len(), names);
            }
            Ok(())
        }
        Err(e) => Err(format!("Applying database migrations failed: {}", e)),
    }
}

fn checkout(pool: &PgPool) -> Result<PgPooled, PipelineError> {
    pool.get()
        .map_err(|e| PipelineError::storage(format!("no database connection: {}", e)))
}

#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        PgRecordStore { pool }
    }
}

impl RecordStore for PgRecordStore {
    fn insert(&self, reading: &NewReading) -> Result<i64, PipelineError> {
        let mut conn = checkout(&self.pool)?;
        let result = match NewRow::from(reading) {
            NewRow::Temperature(row) => {
                use schema::temperature_readings::dsl as T;
                diesel::insert_into(T::temperature_readings)
                    .values(&row)
                    .returning(T::id)
                    .get_result::<i64>(&mut conn)
            }
            NewRow::AirQuality(row) => {
                use schema::airquality_readings::dsl as A;
                diesel::insert_into(A::airquality_readings)
                    .values(&row)
                    .returning(A::id)
                    .get_result::<i64>(&mut conn)
            }
        };
        result.map_err(|e| PipelineError::storage(format!("insert {} reading failed: {}", reading.kind(), e)))
    }

    fn query_by_arrival_range(
        &self,
        kind: ReadingKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredReading>, PipelineError> {
        let mut conn = checkout(&self.pool)?;
        // single SELECT, so the window is read from one snapshot
        let rows: Result<Vec<StoredReading>, diesel::result::Error> = match kind {
            ReadingKind::Temperature => {
                use schema::temperature_readings::dsl as T;
                T::temperature_readings
                    .filter(T::arrival_time.ge(start).and(T::arrival_time.lt(end)))
                    .select(TemperatureRow::as_select())
                    .load(&mut conn)
                    .map(|rows| rows.into_iter().map(StoredReading::from).collect())
            }
            ReadingKind::AirQuality => {
                use schema::airquality_readings::dsl as A;
                A::airquality_readings
                    .filter(A::arrival_time.ge(start).and(A::arrival_time.lt(end)))
                    .select(AirQualityRow::as_select())
                    .load(&mut conn)
                    .map(|rows| rows.into_iter().map(StoredReading::from).collect())
            }
        };
        rows.map_err(|e| PipelineError::storage(format!("query {} readings failed: {}", kind, e)))
    }

    fn now(&self) -> Result<DateTime<Utc>, PipelineError> {
        let mut conn = checkout(&self.pool)?;
        // the same clock the arrival_time column default reads
        diesel::sql_query("SELECT clock_timestamp() AS now")
            .get_result::<DbClock>(&mut conn)
            .map(|clock| store_precision(clock.now))
            .map_err(|e| PipelineError::storage(format!("read database clock failed: {}", e)))
    }

    fn reading_at(&self, kind: ReadingKind, index: u64) -> Result<Option<StoredReading>, PipelineError> {
        let offset = i64::try_from(index).unwrap_or(i64::MAX);
        let mut conn = checkout(&self.pool)?;
        let row: Result<Option<StoredReading>, diesel::result::Error> = match kind {
            ReadingKind::Temperature => {
                use schema::temperature_readings::dsl as T;
                T::temperature_readings
                    .order((T::arrival_time.asc(), T::id.asc()))
                    .offset(offset)
                    .select(TemperatureRow::as_select())
                    .first::<TemperatureRow>(&mut conn)
                    .optional()
                    .map(|row| row.map(StoredReading::from))
            }
            ReadingKind::AirQuality => {
                use schema::airquality_readings::dsl as A;
                A::airquality_readings
                    .order((A::arrival_time.asc(), A::id.asc()))
                    .offset(offset)
                    .select(AirQualityRow::as_select())
                    .first::<AirQualityRow>(&mut conn)
                    .optional()
                    .map(|row| row.map(StoredReading::from))
            }
        };
        row.map_err(|e| PipelineError::storage(format!("look up {} reading {} failed: {}", kind, index, e)))
    }

    fn count(&self, kind: ReadingKind) -> Result<u64, PipelineError> {
        let mut conn = checkout(&self.pool)?;
        let count: Result<i64, diesel::result::Error> = match kind {
            ReadingKind::Temperature => {
                use schema::temperature_readings::dsl as T;
                T::temperature_readings.count().get_result(&mut conn)
            }
            ReadingKind::AirQuality => {
                use schema::airquality_readings::dsl as A;
                A::airquality_readings.count().get_result(&mut conn)
            }
        };
        count
            .map(|n| n.max(0) as u64)
            .map_err(|e| PipelineError::storage(format!("count {} readings failed: {}", kind, e)))
    }
}

#[derive(Clone)]
pub struct PgSummaryStore {
    pool: PgPool,
}

impl PgSummaryStore {
    pub fn new(pool: PgPool) -> Self {
        PgSummaryStore { pool }
    }
}

impl SummaryStore for PgSummaryStore {
    fn read(&self) -> Result<Option<Summary>, PipelineError> {
        use schema::reading_stats::dsl as S;

        let mut conn = checkout(&self.pool)?;
        let rows = S::reading_stats
            .select(StatsRow::as_select())
            .load(&mut conn)
            .map_err(|e| PipelineError::storage(format!("read reading_stats failed: {}", e)))?;
        summary_from_rows(rows)
    }

    fn write(&self, summary: &Summary) -> Result<(), PipelineError> {
        use schema::reading_stats::dsl as S;

        let rows = summary_to_rows(summary)?;
        let mut conn = checkout(&self.pool)?;
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            for row in &rows {
                diesel::insert_into(S::reading_stats)
                    .values(row)
                    .on_conflict(S::kind)
                    .do_update()
                    .set(row)
                    .execute(conn)?;
            }
            Ok(())
        })
        .map_err(|e| PipelineError::storage(format!("write reading_stats failed: {}", e)))
    }
}
