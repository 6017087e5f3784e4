//! Storage seams for readings and the running summary.
//!
//! Aggregation only needs insert-by-record and range-query-by-arrival-time, so
//! the physical engine is pluggable: Postgres via diesel, a remote record store
//! over HTTP, a JSON file for the summary, and in-memory stores for tests.

use chrono::{DateTime, SubsecRound, Utc};

use crate::error::PipelineError;
use crate::models::reading::{NewReading, ReadingKind, StoredReading};
use crate::models::summary::Summary;

pub mod file;
#[cfg(test)]
pub mod memory;
pub mod pg;

/// Timestamps are kept to the microsecond by Postgres and on the wire.
pub fn store_precision(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

/// Append-only reading persistence, shared by many writers and one reader.
pub trait RecordStore: Send + Sync {
    /// Commit one reading, stamping `arrival_time = now()`. Returns the row id.
    ///
    /// Arrival times are non-decreasing in commit order.
    fn insert(&self, reading: &NewReading) -> Result<i64, PipelineError>;

    /// All committed rows of `kind` with `start <= arrival_time < end`, in no
    /// particular order. An empty window is `Ok(vec![])`.
    fn query_by_arrival_range(
        &self,
        kind: ReadingKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredReading>, PipelineError>;

    /// Current time on the clock that stamps `arrival_time`, at store precision.
    ///
    /// Rows committed after this call carry an arrival time at or after it, so
    /// it is the only safe end for an aggregation window.
    fn now(&self) -> Result<DateTime<Utc>, PipelineError>;

    /// The `index`-th reading of `kind` (zero based) in arrival order, ties
    /// broken by id. `None` past the end.
    fn reading_at(&self, kind: ReadingKind, index: u64) -> Result<Option<StoredReading>, PipelineError>;

    /// Exact number of stored readings of `kind`.
    fn count(&self, kind: ReadingKind) -> Result<u64, PipelineError>;
}

/// Durable holder of the single current summary. Only the aggregator writes.
pub trait SummaryStore: Send + Sync {
    /// `None` until the first pass has been persisted.
    fn read(&self) -> Result<Option<Summary>, PipelineError>;

    /// Atomic replace: readers see the old summary or the new one, never a mix.
    fn write(&self, summary: &Summary) -> Result<(), PipelineError>;
}
