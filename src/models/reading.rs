//! Reading types shared by ingestion, the record stores and the aggregator.
//!
//! A reading is one sensor measurement. The kind-specific fields live in the
//! [`Reading`] variant, the envelope (trace id, client timestamps, arrival time)
//! lives in [`NewReading`] before insert and [`StoredReading`] after.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ingestion-assigned correlation id. Time based, not a dedup key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(pub u64);

impl TraceId {
    /// Postgres has no unsigned BIGINT; the cast is bit-preserving in both directions.
    pub fn to_db(self) -> i64 {
        self.0 as i64
    }

    pub fn from_db(value: i64) -> Self {
        TraceId(value as u64)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingKind {
    Temperature,
    AirQuality,
}

impl ReadingKind {
    pub const ALL: [ReadingKind; 2] = [ReadingKind::Temperature, ReadingKind::AirQuality];

    /// Stable name used in persisted summaries and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ReadingKind::Temperature => "temperature",
            ReadingKind::AirQuality => "air_quality",
        }
    }

    /// Path segment of the remote record store endpoints.
    pub fn path_segment(self) -> &'static str {
        match self {
            ReadingKind::Temperature => "temperature",
            ReadingKind::AirQuality => "airquality",
        }
    }

    /// Event name logged per reading, e.g. "temperature_reading".
    pub fn event_name(self) -> &'static str {
        match self {
            ReadingKind::Temperature => "temperature_reading",
            ReadingKind::AirQuality => "airquality_reading",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "temperature" => Some(ReadingKind::Temperature),
            "air_quality" | "airquality" => Some(ReadingKind::AirQuality),
            _ => None,
        }
    }
}

impl fmt::Display for ReadingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemperatureReading {
    pub fire_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub temperature_celsius: f64,
    pub humidity_level: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AirQualityReading {
    pub fire_id: String,
    pub location_name: String,
    pub particulate_level: f64,
    pub air_quality: f64,
    pub smoke_opacity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reading {
    Temperature(TemperatureReading),
    AirQuality(AirQualityReading),
}

impl Reading {
    pub fn kind(&self) -> ReadingKind {
        match self {
            Reading::Temperature(_) => ReadingKind::Temperature,
            Reading::AirQuality(_) => ReadingKind::AirQuality,
        }
    }

    /// The measurement whose running maximum is tracked for this kind.
    pub fn primary_value(&self) -> f64 {
        match self {
            Reading::Temperature(t) => t.temperature_celsius,
            Reading::AirQuality(a) => a.air_quality,
        }
    }

    pub fn fire_id(&self) -> &str {
        match self {
            Reading::Temperature(t) => &t.fire_id,
            Reading::AirQuality(a) => &a.fire_id,
        }
    }
}

/// A reading stamped by ingestion, not yet committed.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    pub trace_id: TraceId,
    pub batch_timestamp: DateTime<Utc>,
    pub reading_timestamp: DateTime<Utc>,
    pub reading: Reading,
}

impl NewReading {
    pub fn kind(&self) -> ReadingKind {
        self.reading.kind()
    }
}

/// A committed reading as returned by range queries and lookups.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredReading {
    pub id: i64,
    pub trace_id: TraceId,
    pub batch_timestamp: DateTime<Utc>,
    pub reading_timestamp: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
    #[serde(flatten)]
    pub reading: Reading,
}

impl StoredReading {
    pub fn kind(&self) -> ReadingKind {
        self.reading.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip_through_parse() {
        for kind in ReadingKind::ALL {
            assert_eq!(ReadingKind::parse(kind.as_str()), Some(kind));
            assert_eq!(ReadingKind::parse(kind.path_segment()), Some(kind));
        }
        assert_eq!(ReadingKind::parse("smoke"), None);
    }

    #[test]
    fn trace_id_survives_signed_storage() {
        let big = TraceId(u64::MAX - 7);
        assert_eq!(TraceId::from_db(big.to_db()), big);
        let ns = TraceId(1_760_000_000_123_456_789);
        assert_eq!(ns.to_db(), 1_760_000_000_123_456_789);
    }

    #[test]
    fn primary_value_follows_kind() {
        let t = Reading::Temperature(TemperatureReading {
            fire_id: "F-1".into(),
            latitude: 49.2,
            longitude: -123.1,
            temperature_celsius: 41.5,
            humidity_level: None,
        });
        let a = Reading::AirQuality(AirQualityReading {
            fire_id: "F-1".into(),
            location_name: "Ridge".into(),
            particulate_level: 80.0,
            air_quality: 212.0,
            smoke_opacity: 0.4,
        });
        assert_eq!(t.primary_value(), 41.5);
        assert_eq!(a.primary_value(), 212.0);
        assert_eq!(a.kind(), ReadingKind::AirQuality);
    }
}
