//! Running statistics folded by the aggregator.

use crate::models::reading::ReadingKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cumulative statistics for one reading kind.
///
/// `max_value` is `None` until the first reading of the kind is folded in, so
/// negative measurements are reported correctly.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KindStats {
    pub count: u64,
    pub max_value: Option<f64>,
}

/// The single current summary. `checkpoint` is the exclusive upper bound of the
/// arrival times already folded in and is shared by all kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub temperature: KindStats,
    pub air_quality: KindStats,
    pub checkpoint: DateTime<Utc>,
}

impl Summary {
    /// Zero-valued summary used before the first pass has been persisted.
    pub fn initial(epoch_start: DateTime<Utc>) -> Self {
        Summary {
            temperature: KindStats::default(),
            air_quality: KindStats::default(),
            checkpoint: epoch_start,
        }
    }

    pub fn stats(&self, kind: ReadingKind) -> &KindStats {
        match kind {
            ReadingKind::Temperature => &self.temperature,
            ReadingKind::AirQuality => &self.air_quality,
        }
    }

    pub fn stats_mut(&mut self, kind: ReadingKind) -> &mut KindStats {
        match kind {
            ReadingKind::Temperature => &mut self.temperature,
            ReadingKind::AirQuality => &mut self.air_quality,
        }
    }
}
