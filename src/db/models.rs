//! Diesel row structs for the reading tables and the stats table.
//!
//! The reading rows double as the JSON wire shape of the remote record store,
//! so they also derive serde.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::models::reading::{
    AirQualityReading, NewReading, Reading, ReadingKind, StoredReading, TemperatureReading, TraceId,
};
use crate::models::summary::{KindStats, Summary};
use crate::schema;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::temperature_readings)]
pub struct TemperatureRow {
    pub id: i64,
    pub trace_id: i64,
    pub fire_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub temperature_celsius: f64,
    pub humidity_level: Option<f64>,
    pub batch_timestamp: DateTime<Utc>,
    pub reading_timestamp: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::temperature_readings)]
pub struct NewTemperatureRow {
    pub trace_id: i64,
    pub fire_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub temperature_celsius: f64,
    pub humidity_level: Option<f64>,
    pub batch_timestamp: DateTime<Utc>,
    pub reading_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::airquality_readings)]
pub struct AirQualityRow {
    pub id: i64,
    pub trace_id: i64,
    pub fire_id: String,
    pub location_name: String,
    pub particulate_level: f64,
    pub air_quality: f64,
    pub smoke_opacity: f64,
    pub batch_timestamp: DateTime<Utc>,
    pub reading_timestamp: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::airquality_readings)]
pub struct NewAirQualityRow {
    pub trace_id: i64,
    pub fire_id: String,
    pub location_name: String,
    pub particulate_level: f64,
    pub air_quality: f64,
    pub smoke_opacity: f64,
    pub batch_timestamp: DateTime<Utc>,
    pub reading_timestamp: DateTime<Utc>,
}

/// Insert payload for either reading table.
#[derive(Debug, Clone)]
pub enum NewRow {
    Temperature(NewTemperatureRow),
    AirQuality(NewAirQualityRow),
}

impl From<&NewReading> for NewRow {
    fn from(value: &NewReading) -> Self {
        let trace_id = value.trace_id.to_db();
        match &value.reading {
            Reading::Temperature(t) => NewRow::Temperature(NewTemperatureRow {
                trace_id,
                fire_id: t.fire_id.clone(),
                latitude: t.latitude,
                longitude: t.longitude,
                temperature_celsius: t.temperature_celsius,
                humidity_level: t.humidity_level,
                batch_timestamp: value.batch_timestamp,
                reading_timestamp: value.reading_timestamp,
            }),
            Reading::AirQuality(a) => NewRow::AirQuality(NewAirQualityRow {
                trace_id,
                fire_id: a.fire_id.clone(),
                location_name: a.location_name.clone(),
                particulate_level: a.particulate_level,
                air_quality: a.air_quality,
                smoke_opacity: a.smoke_opacity,
                batch_timestamp: value.batch_timestamp,
                reading_timestamp: value.reading_timestamp,
            }),
        }
    }
}

impl From<TemperatureRow> for StoredReading {
    fn from(row: TemperatureRow) -> Self {
        StoredReading {
            id: row.id,
            trace_id: TraceId::from_db(row.trace_id),
            batch_timestamp: row.batch_timestamp,
            reading_timestamp: row.reading_timestamp,
            arrival_time: row.arrival_time,
            reading: Reading::Temperature(TemperatureReading {
                fire_id: row.fire_id,
                latitude: row.latitude,
                longitude: row.longitude,
                temperature_celsius: row.temperature_celsius,
                humidity_level: row.humidity_level,
            }),
        }
    }
}

impl From<AirQualityRow> for StoredReading {
    fn from(row: AirQualityRow) -> Self {
        StoredReading {
            id: row.id,
            trace_id: TraceId::from_db(row.trace_id),
            batch_timestamp: row.batch_timestamp,
            reading_timestamp: row.reading_timestamp,
            arrival_time: row.arrival_time,
            reading: Reading::AirQuality(AirQualityReading {
                fire_id: row.fire_id,
                location_name: row.location_name,
                particulate_level: row.particulate_level,
                air_quality: row.air_quality,
                smoke_opacity: row.smoke_opacity,
            }),
        }
    }
}

/// Result of `SELECT clock_timestamp() AS now`.
#[derive(Debug, QueryableByName)]
pub struct DbClock {
    #[diesel(sql_type = diesel::sql_types::Timestamptz)]
    pub now: DateTime<Utc>,
}

// One row per kind in `reading_stats`
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = schema::reading_stats)]
#[diesel(primary_key(kind))]
#[diesel(treat_none_as_null = true)]
pub struct StatsRow {
    pub kind: String,
    pub count: i64,
    pub max_value: Option<f64>,
    pub checkpoint: DateTime<Utc>,
}

/// Split a summary into its per-kind rows.
pub fn summary_to_rows(summary: &Summary) -> Result<Vec<StatsRow>, PipelineError> {
    ReadingKind::ALL
        .iter()
        .map(|kind| {
            let stats = summary.stats(*kind);
            let count = i64::try_from(stats.count)
                .map_err(|_| PipelineError::storage(format!("{} count {} exceeds BIGINT", kind, stats.count)))?;
            Ok(StatsRow {
                kind: kind.as_str().to_string(),
                count,
                max_value: stats.max_value,
                checkpoint: summary.checkpoint,
            })
        })
        .collect()
}

/// Rebuild the summary from persisted rows; `None` when nothing was persisted yet.
///
/// Rows are always written together, so they share a checkpoint. Should they
/// ever disagree the earliest one wins: re-folding a window can only be
/// avoided by the caller, skipping one would lose readings.
pub fn summary_from_rows(rows: Vec<StatsRow>) -> Result<Option<Summary>, PipelineError> {
    let Some(checkpoint) = rows.iter().map(|r| r.checkpoint).min() else {
        return Ok(None);
    };

    let mut summary = Summary::initial(checkpoint);
    for row in rows {
        let kind = ReadingKind::parse(&row.kind)
            .ok_or_else(|| PipelineError::storage(format!("unknown kind {:?} in reading_stats", row.kind)))?;
        let count = u64::try_from(row.count)
            .map_err(|_| PipelineError::storage(format!("negative count {} for {}", row.count, kind)))?;
        *summary.stats_mut(kind) = KindStats {
            count,
            max_value: row.max_value,
        };
    }
    Ok(Some(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 14, h, m, 0).unwrap()
    }

    #[test]
    fn no_rows_means_no_summary() {
        assert_eq!(summary_from_rows(Vec::new()).unwrap(), None);
    }

    #[test]
    fn summary_rows_share_checkpoint_and_restore() {
        let summary = Summary {
            temperature: KindStats {
                count: 12,
                max_value: Some(48.25),
            },
            air_quality: KindStats {
                count: 0,
                max_value: None,
            },
            checkpoint: ts(10, 30),
        };

        let rows = summary_to_rows(&summary).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.checkpoint == ts(10, 30)));
        assert_eq!(rows[1].kind, "air_quality");
        assert_eq!(rows[1].max_value, None);

        assert_eq!(summary_from_rows(rows).unwrap(), Some(summary));
    }

    #[test]
    fn disagreeing_checkpoints_resolve_to_earliest() {
        let rows = vec![
            StatsRow {
                kind: "temperature".into(),
                count: 3,
                max_value: Some(25.5),
                checkpoint: ts(10, 0),
            },
            StatsRow {
                kind: "air_quality".into(),
                count: 1,
                max_value: Some(90.0),
                checkpoint: ts(9, 55),
            },
        ];
        let summary = summary_from_rows(rows).unwrap().unwrap();
        assert_eq!(summary.checkpoint, ts(9, 55));
        assert_eq!(summary.temperature.count, 3);
        assert_eq!(summary.air_quality.max_value, Some(90.0));
    }

    #[test]
    fn rejects_unknown_kind_and_negative_count() {
        let unknown = StatsRow {
            kind: "smoke".into(),
            count: 1,
            max_value: None,
            checkpoint: ts(1, 0),
        };
        assert!(matches!(
            summary_from_rows(vec![unknown]),
            Err(PipelineError::StorageUnavailable(_))
        ));

        let negative = StatsRow {
            kind: "temperature".into(),
            count: -1,
            max_value: None,
            checkpoint: ts(1, 0),
        };
        assert!(summary_from_rows(vec![negative]).is_err());
    }

    #[test]
    fn new_row_copies_envelope_and_fields() {
        let reading = NewReading {
            trace_id: TraceId(1_760_000_000_000_000_001),
            batch_timestamp: ts(8, 0),
            reading_timestamp: ts(7, 59),
            reading: Reading::AirQuality(AirQualityReading {
                fire_id: "F-9".into(),
                location_name: "North ridge".into(),
                particulate_level: 35.0,
                air_quality: 151.0,
                smoke_opacity: 0.2,
            }),
        };
        let NewRow::AirQuality(row) = NewRow::from(&reading) else {
            panic!("expected an air quality row");
        };
        assert_eq!(row.trace_id, 1_760_000_000_000_000_001);
        assert_eq!(row.location_name, "North ridge");
        assert_eq!(row.reading_timestamp, ts(7, 59));
    }
}
