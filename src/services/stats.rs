//! Read-only statistics view over the summary store.

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::models::reading::ReadingKind;
use crate::models::summary::Summary;
use crate::store::SummaryStore;

pub const STATS_NOT_FOUND: &str = "Statistics do not exist";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindStatsView {
    pub count: u64,
    /// `null` until a reading of this kind has been folded in.
    pub max_value: Option<f64>,
    pub checkpoint: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsResponse {
    pub temperature: KindStatsView,
    pub air_quality: KindStatsView,
}

impl From<&Summary> for StatsResponse {
    fn from(summary: &Summary) -> Self {
        let view = |kind: ReadingKind| {
            let stats = summary.stats(kind);
            KindStatsView {
                count: stats.count,
                max_value: stats.max_value,
                checkpoint: summary.checkpoint,
            }
        };
        StatsResponse {
            temperature: view(ReadingKind::Temperature),
            air_quality: view(ReadingKind::AirQuality),
        }
    }
}

/// Current statistics, or `NotFound` before the first completed pass.
///
/// A stale `checkpoint` is how callers notice a stalled pipeline.
pub fn get_stats(store: &dyn SummaryStore) -> Result<StatsResponse, PipelineError> {
    info!("Started request for statistics");
    match store.read() {
        Ok(Some(summary)) => {
            let response = StatsResponse::from(&summary);
            debug!("Statistics: {:?}", response);
            info!("Request for statistics has completed");
            Ok(response)
        }
        Ok(None) => {
            error!("{}", STATS_NOT_FOUND);
            Err(PipelineError::NotFound(STATS_NOT_FOUND.to_string()))
        }
        Err(e) => {
            error!("Reading statistics failed: {}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::summary::KindStats;
    use crate::store::memory::MemorySummaryStore;
    use chrono::TimeZone;

    #[test]
    fn not_found_before_first_pass() {
        let store = MemorySummaryStore::new();
        let err = get_stats(&store).unwrap_err();
        assert_eq!(err, PipelineError::NotFound(STATS_NOT_FOUND.to_string()));
        assert_eq!(err.status(), http::StatusCode::NOT_FOUND);
    }

    #[test]
    fn store_failure_is_not_reported_as_missing() {
        let store = MemorySummaryStore::new();
        store.set_offline(true);
        assert!(matches!(get_stats(&store), Err(PipelineError::StorageUnavailable(_))));
    }

    #[test]
    fn exposes_count_max_and_checkpoint_per_kind() {
        let store = MemorySummaryStore::new();
        let checkpoint = Utc.with_ymd_and_hms(2025, 10, 9, 16, 5, 0).unwrap();
        store
            .write(&Summary {
                temperature: KindStats {
                    count: 150,
                    max_value: Some(45.3),
                },
                air_quality: KindStats {
                    count: 0,
                    max_value: None,
                },
                checkpoint,
            })
            .unwrap();

        let stats = get_stats(&store).unwrap();
        assert_eq!(stats.temperature.count, 150);
        assert_eq!(stats.air_quality.checkpoint, checkpoint);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["temperature"]["max_value"], 45.3);
        assert!(json["air_quality"]["max_value"].is_null());
        assert_eq!(json["temperature"]["checkpoint"], "2025-10-09T16:05:00Z");
    }
}
