//! Inbound batch payloads as delivered by field devices.
//!
//! Shared subject fields sit on the batch, each entry of `readings` carries its
//! own measurement and recording time. Field names follow the device wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::reading::ReadingKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureBatch {
    pub fire_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub reporting_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub readings: Vec<TemperatureMeasurement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureMeasurement {
    pub temperature_celsius: f64,
    #[serde(default)]
    pub humidity_level: Option<f64>,
    pub recorded_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirQualityBatch {
    pub fire_id: String,
    pub location_name: String,
    /// Batch-level; copied onto every stored reading.
    pub particulate_level: f64,
    pub reporting_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub readings: Vec<AirQualityMeasurement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirQualityMeasurement {
    pub air_quality: f64,
    pub smoke_opacity: f64,
    pub recorded_timestamp: DateTime<Utc>,
}

/// Envelope used by transports that multiplex both kinds on one channel:
/// `{"kind": "temperature", "batch": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "batch", rename_all = "snake_case")]
pub enum Batch {
    Temperature(TemperatureBatch),
    AirQuality(AirQualityBatch),
}

impl Batch {
    pub fn kind(&self) -> ReadingKind {
        match self {
            Batch::Temperature(_) => ReadingKind::Temperature,
            Batch::AirQuality(_) => ReadingKind::AirQuality,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Batch::Temperature(b) => b.readings.len(),
            Batch::AirQuality(b) => b.readings.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fire_id(&self) -> &str {
        match self {
            Batch::Temperature(b) => &b.fire_id,
            Batch::AirQuality(b) => &b.fire_id,
        }
    }
}
