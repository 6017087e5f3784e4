//! Deterministic synthetic batches for local demos and load runs.

use chrono::{DateTime, Duration, Utc};
use log::info;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::error::PipelineError;
use crate::models::batch::{AirQualityBatch, AirQualityMeasurement, Batch, TemperatureBatch, TemperatureMeasurement};
use crate::services::ingest::IngestService;

const SEED: u64 = 0x0F1E_2D3C_4B5A_6978;
const FIRES: [(&str, f64, f64, &str); 4] = [
    ("BC-K20637", 50.6745, -120.3273, "Juniper Ridge"),
    ("BC-G80122", 53.9171, -122.7497, "Fraser Flats"),
    ("BC-N51447", 49.4991, -117.2948, "Kootenay Pass"),
    ("BC-C10982", 51.2538, -121.9423, "Chasm Lookout"),
];
const MAX_READINGS_PER_BATCH: usize = 6;

/// `count` batches alternating between kinds, reported relative to `now`.
pub fn generate_batches(count: usize, now: DateTime<Utc>) -> Vec<Batch> {
    let mut rng = SmallRng::seed_from_u64(SEED);
    (0..count)
        .map(|i| {
            let (fire_id, lat, lon, location) = FIRES[i % FIRES.len()];
            let reporting_timestamp = now - Duration::seconds(rng.random_range(0..=30));
            let n = rng.random_range(1..=MAX_READINGS_PER_BATCH);
            if i % 2 == 0 {
                Batch::Temperature(TemperatureBatch {
                    fire_id: fire_id.to_string(),
                    latitude: lat,
                    longitude: lon,
                    reporting_timestamp,
                    readings: (0..n)
                        .map(|_| TemperatureMeasurement {
                            temperature_celsius: fire_temperature(&mut rng),
                            humidity_level: rng.random_bool(0.8).then(|| rng.random_range(4.0..=60.0)),
                            recorded_timestamp: reporting_timestamp - Duration::seconds(rng.random_range(0..=120)),
                        })
                        .collect(),
                })
            } else {
                Batch::AirQuality(AirQualityBatch {
                    fire_id: fire_id.to_string(),
                    location_name: location.to_string(),
                    particulate_level: rng.random_range(5.0..=500.0),
                    reporting_timestamp,
                    readings: (0..n)
                        .map(|_| AirQualityMeasurement {
                            air_quality: rng.random_range(0.0..=500.0),
                            smoke_opacity: rng.random_range(0.0..=1.0),
                            recorded_timestamp: reporting_timestamp - Duration::seconds(rng.random_range(0..=120)),
                        })
                        .collect(),
                })
            }
        })
        .collect()
}

/// Ambient readings most of the time, with the occasional flare-up.
fn fire_temperature(rng: &mut SmallRng) -> f64 {
    let ambient = rng.random_range(-5.0..=35.0);
    if rng.random_bool(0.1) {
        ambient + rng.random_range(100.0..=600.0)
    } else {
        ambient
    }
}

/// Ingest `count` synthetic batches; stops at the first storage failure.
pub fn run(service: &IngestService, count: usize) -> Result<usize, String> {
    let batches = generate_batches(count, Utc::now());
    let mut stored = 0usize;
    for (i, batch) in batches.iter().enumerate() {
        match service.ingest(batch) {
            Ok(n) => stored += n,
            Err(e @ PipelineError::StorageUnavailable(_)) => {
                return Err(format!("fake batch {} of {} failed: {}", i + 1, count, e));
            }
            Err(e) => return Err(format!("fake batch {} is invalid: {}", i + 1, e)),
        }
    }
    info!("Fake data: ingested {} batch(es), {} reading(s)", batches.len(), stored);
    Ok(stored)
}
