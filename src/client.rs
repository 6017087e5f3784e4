//! Blocking HTTP client for a remote record store.
//!
//! Lets the aggregator (and ingestion) run against a storage service on the
//! other side of a network boundary instead of a local database.
//!
//! - `POST {base}/{temperature|airquality}` stores one reading, answers `{"id": n}`.
//! - `GET {base}/{temperature|airquality}?start_timestamp=..&end_timestamp=..`
//!   returns the readings whose arrival time falls in `[start, end)`.
//! - `GET {base}/{temperature|airquality}/{index}` returns the index-th reading
//!   in arrival order, `404` past the end.
//! - `GET {base}/{temperature|airquality}/count` answers `{"count": n}`.
//! - `GET {base}/clock` answers `{"now": ts}`, read from the clock that stamps
//!   arrival times.
//!
//! Timestamps go over the wire as RFC 3339 with a `Z` suffix and microsecond
//! precision, which matches what Postgres keeps.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use crate::db::models::{AirQualityRow, NewRow, TemperatureRow};
use crate::error::PipelineError;
use crate::models::reading::{NewReading, ReadingKind, StoredReading};
use crate::store::{store_precision, RecordStore};

#[derive(Debug)]
pub enum StorageClientError {
    Timeout(String),
    Transport(String),
    Http { status: u16 },
    Json(String),
}

impl core::fmt::Display for StorageClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            StorageClientError::Timeout(s) => write!(f, "timed out: {}", s),
            StorageClientError::Transport(s) => write!(f, "transport error: {}", s),
            StorageClientError::Http { status } => write!(f, "http {}", status),
            StorageClientError::Json(e) => write!(f, "json error: {}", e),
        }
    }
}

impl std::error::Error for StorageClientError {}

impl From<ureq::Error> for StorageClientError {
    fn from(value: ureq::Error) -> Self {
        match value {
            ureq::Error::StatusCode(status) => StorageClientError::Http { status },
            ureq::Error::Timeout(t) => StorageClientError::Timeout(t.to_string()),
            other => StorageClientError::Transport(other.to_string()),
        }
    }
}

impl From<StorageClientError> for PipelineError {
    fn from(value: StorageClientError) -> Self {
        PipelineError::storage(format!("remote record store: {}", value))
    }
}

#[derive(Debug, Deserialize)]
struct InsertResponse {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct ClockResponse {
    now: DateTime<Utc>,
}

pub struct StorageClient {
    agent: ureq::Agent,
    base_url: String,
}

impl StorageClient {
    /// `timeout` bounds each request end to end.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder().timeout_global(Some(timeout)).build();
        let base_url = base_url.into().trim_end_matches('/').to_string();
        StorageClient {
            agent: config.into(),
            base_url,
        }
    }

    fn url(&self, kind: ReadingKind) -> String {
        format!("{}/{}", self.base_url, kind.path_segment())
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T, StorageClientError> {
        let mut req = self.agent.get(url).header("Accept", "application/json");
        for (k, v) in query {
            req = req.query(*k, v);
        }
        let mut res = req.call()?;
        let body = res.body_mut().read_to_string()?;
        decode(&body)
    }

    pub fn insert_row(&self, kind: ReadingKind, row: &NewRow) -> Result<i64, StorageClientError> {
        let req = self.agent.post(&self.url(kind)).header("Accept", "application/json");
        let mut res = match row {
            NewRow::Temperature(r) => req.send_json(r)?,
            NewRow::AirQuality(r) => req.send_json(r)?,
        };
        let body = res.body_mut().read_to_string()?;
        decode::<InsertResponse>(&body).map(|r| r.id)
    }

    pub fn get_clock(&self) -> Result<DateTime<Utc>, StorageClientError> {
        let url = format!("{}/clock", self.base_url);
        self.get_json::<ClockResponse>(&url, &[]).map(|r| r.now)
    }

    pub fn get_count(&self, kind: ReadingKind) -> Result<u64, StorageClientError> {
        let url = format!("{}/count", self.url(kind));
        self.get_json::<CountResponse>(&url, &[]).map(|r| r.count)
    }

    /// `None` when the store answers 404.
    pub fn get_reading_at(&self, kind: ReadingKind, index: u64) -> Result<Option<StoredReading>, StorageClientError> {
        let url = format!("{}/{}", self.url(kind), index);
        let found = match kind {
            ReadingKind::Temperature => self.get_json::<TemperatureRow>(&url, &[]).map(StoredReading::from),
            ReadingKind::AirQuality => self.get_json::<AirQualityRow>(&url, &[]).map(StoredReading::from),
        };
        match found {
            Ok(reading) => Ok(Some(reading)),
            Err(StorageClientError::Http { status: 404 }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn get_temperature_readings(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TemperatureRow>, StorageClientError> {
        self.get_json(&self.url(ReadingKind::Temperature), &window_query(start, end))
    }

    pub fn get_airquality_readings(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AirQualityRow>, StorageClientError> {
        self.get_json(&self.url(ReadingKind::AirQuality), &window_query(start, end))
    }
}

impl RecordStore for StorageClient {
    fn insert(&self, reading: &NewReading) -> Result<i64, PipelineError> {
        Ok(self.insert_row(reading.kind(), &NewRow::from(reading))?)
    }

    fn query_by_arrival_range(
        &self,
        kind: ReadingKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredReading>, PipelineError> {
        let rows: Vec<StoredReading> = match kind {
            ReadingKind::Temperature => self
                .get_temperature_readings(start, end)?
                .into_iter()
                .map(StoredReading::from)
                .collect(),
            ReadingKind::AirQuality => self
                .get_airquality_readings(start, end)?
                .into_iter()
                .map(StoredReading::from)
                .collect(),
        };
        // the window is half-open; drop anything a lenient server let through
        Ok(rows
            .into_iter()
            .filter(|r| r.arrival_time >= start && r.arrival_time < end)
            .collect())
    }

    fn now(&self) -> Result<DateTime<Utc>, PipelineError> {
        Ok(store_precision(self.get_clock()?))
    }

    fn reading_at(&self, kind: ReadingKind, index: u64) -> Result<Option<StoredReading>, PipelineError> {
        Ok(self.get_reading_at(kind, index)?)
    }

    fn count(&self, kind: ReadingKind) -> Result<u64, PipelineError> {
        Ok(self.get_count(kind)?)
    }
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn window_query(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<(&'static str, String)> {
    vec![
        ("start_timestamp", format_timestamp(start)),
        ("end_timestamp", format_timestamp(end)),
    ]
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, StorageClientError> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|e| StorageClientError::Json(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_are_utc_with_z() {
        let ts = Utc.with_ymd_and_hms(2025, 10, 9, 16, 5, 0).unwrap() + chrono::Duration::microseconds(250);
        assert_eq!(format_timestamp(ts), "2025-10-09T16:05:00.000250Z");
    }

    #[test]
    fn window_query_names_match_storage_endpoints() {
        let start = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 10, 9, 16, 0, 0).unwrap();
        let q = window_query(start, end);
        assert_eq!(q[0], ("start_timestamp", "2000-01-01T00:00:00.000000Z".to_string()));
        assert_eq!(q[1].0, "end_timestamp");
    }

    #[test]
    fn decodes_stored_rows_from_fixture() {
        let json = std::fs::read_to_string("tests/data/temperature-rows.json").expect("fixture present");
        let rows: Vec<TemperatureRow> = decode(&json).expect("parse rows");
        assert_eq!(rows.len(), 2);
        let stored: Vec<StoredReading> = rows.into_iter().map(StoredReading::from).collect();
        assert_eq!(stored[0].kind(), ReadingKind::Temperature);
        assert_eq!(stored[1].reading.primary_value(), 51.75);
    }

    #[test]
    fn decode_errors_name_the_field() {
        let err = decode::<Vec<TemperatureRow>>(r#"[{"id": 1, "trace_id": "x"}]"#).unwrap_err();
        assert!(err.to_string().contains("[0].trace_id"), "{err}");
    }

    #[test]
    fn decodes_clock_and_count_answers() {
        let clock: ClockResponse = decode(r#"{"now": "2025-10-09T16:05:00.104871Z"}"#).unwrap();
        assert_eq!(clock.now.timestamp_subsec_micros(), 104_871);
        let count: CountResponse = decode(r#"{"count": 42}"#).unwrap();
        assert_eq!(count.count, 42);
    }

    #[test]
    fn unreachable_store_clock_is_storage_unavailable() {
        let client = StorageClient::new("http://127.0.0.1:9", Duration::from_millis(200));
        assert!(matches!(client.now(), Err(PipelineError::StorageUnavailable(_))));
        assert!(matches!(
            client.reading_at(ReadingKind::Temperature, 0),
            Err(PipelineError::StorageUnavailable(_))
        ));
    }

    #[test]
    fn unreachable_store_is_storage_unavailable() {
        let client = StorageClient::new("http://127.0.0.1:9/", Duration::from_millis(200));
        let start = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let err = client
            .query_by_arrival_range(ReadingKind::AirQuality, start, Utc::now())
            .unwrap_err();
        assert!(matches!(err, PipelineError::StorageUnavailable(_)));
    }
}
