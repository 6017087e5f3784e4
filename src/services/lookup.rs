//! Direct reads over the record store: the n-th reading of a kind and exact
//! per-kind counts. Unlike the summary these always reflect every committed row.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::models::reading::{ReadingKind, StoredReading};
use crate::store::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCounts {
    pub num_temperature_readings: u64,
    pub num_airquality_readings: u64,
}

/// The `index`-th stored reading of `kind` in arrival order, or `NotFound`.
pub fn get_reading(store: &dyn RecordStore, kind: ReadingKind, index: u64) -> Result<StoredReading, PipelineError> {
    info!("Looking up {} reading at index {}", kind, index);
    match store.reading_at(kind, index)? {
        Some(reading) => {
            debug!("Reading found: {:?}", reading);
            Ok(reading)
        }
        None => {
            warn!("{} reading at index {} not found", kind, index);
            Err(PipelineError::NotFound(format!("{} reading at index {} not found", kind, index)))
        }
    }
}

pub fn get_event_counts(store: &dyn RecordStore) -> Result<EventCounts, PipelineError> {
    info!("Counting stored readings");
    let counts = EventCounts {
        num_temperature_readings: store.count(ReadingKind::Temperature)?,
        num_airquality_readings: store.count(ReadingKind::AirQuality)?,
    };
    debug!("Event counts: {:?}", counts);
    Ok(counts)
}
