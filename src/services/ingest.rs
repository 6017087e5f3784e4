//! Ingestion boundary: turns inbound batches into stamped readings and writes
//! each one to the record store.
//!
//! A batch is validated as a whole before anything is written. After that each
//! reading is inserted independently; if any insert fails the batch reports
//! failure, even though its siblings may already be stored.

use chrono::Utc;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use std::io::BufRead;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use crate::error::PipelineError;
use crate::models::batch::{AirQualityBatch, Batch, TemperatureBatch};
use crate::models::reading::{AirQualityReading, NewReading, Reading, ReadingKind, TemperatureReading, TraceId};
use crate::store::RecordStore;

/// Time-based trace ids, strictly increasing within the process.
///
/// Starts from the wall clock in nanoseconds; when two calls land on the same
/// nanosecond (or the clock steps back) the previous id plus one is used.
#[derive(Debug, Default)]
pub struct TraceIdGenerator {
    last: AtomicU64,
}

impl TraceIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> TraceId {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX) as u64;
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev.wrapping_add(1));
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return TraceId(candidate),
                Err(actual) => prev = actual,
            }
        }
    }
}

pub struct IngestService {
    store: Arc<dyn RecordStore>,
    trace_ids: TraceIdGenerator,
}

impl IngestService {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        IngestService {
            store,
            trace_ids: TraceIdGenerator::new(),
        }
    }

    /// Decode a single-kind batch body (one endpoint per kind) and ingest it.
    pub fn ingest_json(&self, kind: ReadingKind, body: &str) -> Result<usize, PipelineError> {
        let batch = match kind {
            ReadingKind::Temperature => Batch::Temperature(decode::<TemperatureBatch>(body)?),
            ReadingKind::AirQuality => Batch::AirQuality(decode::<AirQualityBatch>(body)?),
        };
        self.ingest(&batch)
    }

    /// Validate, stamp and store every reading of `batch`. Returns the number
    /// of readings stored.
    pub fn ingest(&self, batch: &Batch) -> Result<usize, PipelineError> {
        debug!(
            "Ingesting {} batch of {} reading(s) for fire {}",
            batch.kind(),
            batch.len(),
            batch.fire_id()
        );
        validate(batch)?;
        let readings = self.stamp(batch);
        let total = readings.len();

        let mut stored = 0usize;
        let mut first_error: Option<PipelineError> = None;
        for reading in &readings {
            let event = reading.kind().event_name();
            info!("Received event {} with a trace id of {}", event, reading.trace_id);
            match self.store.insert(reading) {
                Ok(id) => {
                    stored += 1;
                    debug!("Stored event {} with a trace id of {} as row {}", event, reading.trace_id, id);
                }
                Err(e) => {
                    warn!("Storing event {} (trace id {}) failed: {}", event, reading.trace_id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            None => Ok(stored),
            Some(e) => Err(PipelineError::storage(format!(
                "{} of {} reading(s) for fire {} not stored: {}",
                total - stored,
                total,
                batch.fire_id(),
                e
            ))),
        }
    }

    fn stamp(&self, batch: &Batch) -> Vec<NewReading> {
        match batch {
            Batch::Temperature(b) => b
                .readings
                .iter()
                .map(|m| NewReading {
                    trace_id: self.trace_ids.next_id(),
                    batch_timestamp: b.reporting_timestamp,
                    reading_timestamp: m.recorded_timestamp,
                    reading: Reading::Temperature(TemperatureReading {
                        fire_id: b.fire_id.clone(),
                        latitude: b.latitude,
                        longitude: b.longitude,
                        temperature_celsius: m.temperature_celsius,
                        humidity_level: m.humidity_level,
                    }),
                })
                .collect(),
            Batch::AirQuality(b) => b
                .readings
                .iter()
                .map(|m| NewReading {
                    trace_id: self.trace_ids.next_id(),
                    batch_timestamp: b.reporting_timestamp,
                    reading_timestamp: m.recorded_timestamp,
                    reading: Reading::AirQuality(AirQualityReading {
                        fire_id: b.fire_id.clone(),
                        location_name: b.location_name.clone(),
                        particulate_level: b.particulate_level,
                        air_quality: m.air_quality,
                        smoke_opacity: m.smoke_opacity,
                    }),
                })
                .collect(),
        }
    }
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, PipelineError> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(PipelineError::validation)
}

fn require_text(field: &str, value: &str) -> Result<(), PipelineError> {
    if value.trim().is_empty() {
        Err(PipelineError::validation(format!("{} must not be empty", field)))
    } else {
        Ok(())
    }
}

fn require_finite(field: &str, value: f64) -> Result<(), PipelineError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(PipelineError::validation(format!("{} must be a finite number", field)))
    }
}

/// Checks the fields serde cannot: blank identifiers and non-finite numbers.
pub fn validate(batch: &Batch) -> Result<(), PipelineError> {
    match batch {
        Batch::Temperature(b) => {
            require_text("fire_id", &b.fire_id)?;
            require_finite("latitude", b.latitude)?;
            require_finite("longitude", b.longitude)?;
            for (i, m) in b.readings.iter().enumerate() {
                require_finite(&format!("readings[{}].temperature_celsius", i), m.temperature_celsius)?;
                if let Some(h) = m.humidity_level {
                    require_finite(&format!("readings[{}].humidity_level", i), h)?;
                }
            }
        }
        Batch::AirQuality(b) => {
            require_text("fire_id", &b.fire_id)?;
            require_text("location_name", &b.location_name)?;
            require_finite("particulate_level", b.particulate_level)?;
            for (i, m) in b.readings.iter().enumerate() {
                require_finite(&format!("readings[{}].air_quality", i), m.air_quality)?;
                require_finite(&format!("readings[{}].smoke_opacity", i), m.smoke_opacity)?;
            }
        }
    }
    Ok(())
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestTally {
    pub accepted: usize,
    pub rejected: usize,
    pub failed: usize,
    pub readings: usize,
}

/// How each input line of [`serve_lines`] is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFormat {
    /// `{"kind": .., "batch": {..}}`, both kinds on one stream.
    Envelope,
    /// A bare batch body of one kind, as posted to that kind's endpoint.
    Kind(ReadingKind),
}

/// Line transport: one batch per line, framed as `format` says.
///
/// Lines are handed to `workers` threads, one batch per task, so batches are
/// ingested concurrently. Blank lines are skipped. Returns once the reader is
/// exhausted and every dispatched batch has finished.
pub fn serve_lines<R: BufRead>(
    service: &IngestService,
    reader: R,
    format: LineFormat,
    workers: NonZeroUsize,
) -> Result<IngestTally, String> {
    let (tx, rx) = mpsc::channel::<(usize, String)>();
    let rx = Mutex::new(rx);
    let tally = Mutex::new(IngestTally::default());

    thread::scope(|scope| -> Result<(), String> {
        for _ in 0..workers.get() {
            scope.spawn(|| {
                loop {
                    let next = match rx.lock() {
                        Ok(guard) => guard.recv(),
                        Err(_) => return,
                    };
                    let Ok((line_no, line)) = next else { return };
                    let outcome = match format {
                        LineFormat::Envelope => decode::<Batch>(&line).and_then(|batch| service.ingest(&batch)),
                        LineFormat::Kind(kind) => service.ingest_json(kind, &line),
                    };
                    record_outcome(&tally, line_no, outcome);
                }
            });
        }

        for (index, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| format!("failed to read batch line {}: {}", index + 1, e))?;
            if line.trim().is_empty() {
                continue;
            }
            tx.send((index + 1, line))
                .map_err(|_| "ingest workers stopped unexpectedly".to_string())?;
        }
        drop(tx);
        Ok(())
    })?;

    tally
        .into_inner()
        .map_err(|_| "ingest tally lock poisoned".to_string())
}

fn record_outcome(tally: &Mutex<IngestTally>, line_no: usize, outcome: Result<usize, PipelineError>) {
    let status = match &outcome {
        Ok(_) => http::StatusCode::CREATED,
        Err(e) => e.status(),
    };
    match &outcome {
        Ok(n) => info!("Batch on line {}: {} reading(s) stored -> {}", line_no, n, status),
        Err(e) => warn!("Batch on line {}: {} -> {}", line_no, e, status),
    }

    let Ok(mut t) = tally.lock() else { return };
    match outcome {
        Ok(n) => {
            t.accepted += 1;
            t.readings += n;
        }
        Err(e) if e.is_retryable() => t.failed += 1,
        Err(_) => t.rejected += 1,
    }
}
