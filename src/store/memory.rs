//! In-memory stores used by the test suites.

use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::PipelineError;
use crate::models::reading::{NewReading, ReadingKind, StoredReading};
use crate::models::summary::Summary;
use crate::store::{store_precision, RecordStore, SummaryStore};

#[derive(Debug, Default)]
struct Records {
    next_id: i64,
    last_arrival: Option<DateTime<Utc>>,
    rows: Vec<StoredReading>,
}

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<Records>,
    offline: AtomicBool,
    /// Fail every insert after this many successful ones (0 = never).
    fail_after: AtomicUsize,
    inserted: AtomicUsize,
    /// How far this store's clock runs behind the host clock, in microseconds.
    clock_lag_us: AtomicI64,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fail_inserts_after(&self, successes: usize) {
        self.fail_after.store(successes, Ordering::SeqCst);
    }

    /// Stamp arrivals (and answer `now`) with a clock running `lag` behind the host.
    pub fn set_clock_lag(&self, lag: Duration) {
        self.clock_lag_us
            .store(lag.num_microseconds().unwrap_or(i64::MAX), Ordering::SeqCst);
    }

    fn clock(&self) -> DateTime<Utc> {
        let lag = Duration::microseconds(self.clock_lag_us.load(Ordering::SeqCst));
        store_precision(Utc::now() - lag)
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.rows.len()).unwrap_or(0)
    }

    pub fn rows(&self) -> Vec<StoredReading> {
        self.records.lock().map(|r| r.rows.clone()).unwrap_or_default()
    }

    fn check_online(&self) -> Result<(), PipelineError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(PipelineError::storage("memory record store is offline"))
        } else {
            Ok(())
        }
    }
}

impl RecordStore for MemoryRecordStore {
    fn insert(&self, reading: &NewReading) -> Result<i64, PipelineError> {
        self.check_online()?;
        let limit = self.fail_after.load(Ordering::SeqCst);
        if limit > 0 && self.inserted.load(Ordering::SeqCst) >= limit {
            return Err(PipelineError::storage("memory record store rejected insert"));
        }

        let mut records = self
            .records
            .lock()
            .map_err(|_| PipelineError::storage("record store lock poisoned"))?;
        // non-decreasing even if the wall clock steps back
        let now = self.clock();
        let arrival_time = match records.last_arrival {
            Some(last) if last > now => last,
            _ => now,
        };
        records.next_id += 1;
        let id = records.next_id;
        records.last_arrival = Some(arrival_time);
        records.rows.push(StoredReading {
            id,
            trace_id: reading.trace_id,
            batch_timestamp: reading.batch_timestamp,
            reading_timestamp: reading.reading_timestamp,
            arrival_time,
            reading: reading.reading.clone(),
        });
        self.inserted.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    fn query_by_arrival_range(
        &self,
        kind: ReadingKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredReading>, PipelineError> {
        self.check_online()?;
        let records = self
            .records
            .lock()
            .map_err(|_| PipelineError::storage("record store lock poisoned"))?;
        Ok(records
            .rows
            .iter()
            .filter(|r| r.kind() == kind && r.arrival_time >= start && r.arrival_time < end)
            .cloned()
            .collect())
    }

    fn now(&self) -> Result<DateTime<Utc>, PipelineError> {
        self.check_online()?;
        Ok(self.clock())
    }

    fn reading_at(&self, kind: ReadingKind, index: u64) -> Result<Option<StoredReading>, PipelineError> {
        self.check_online()?;
        let records = self
            .records
            .lock()
            .map_err(|_| PipelineError::storage("record store lock poisoned"))?;
        let index = usize::try_from(index).unwrap_or(usize::MAX);
        // rows are kept in commit order, which is arrival order
        Ok(records.rows.iter().filter(|r| r.kind() == kind).nth(index).cloned())
    }

    fn count(&self, kind: ReadingKind) -> Result<u64, PipelineError> {
        self.check_online()?;
        let records = self
            .records
            .lock()
            .map_err(|_| PipelineError::storage("record store lock poisoned"))?;
        Ok(records.rows.iter().filter(|r| r.kind() == kind).count() as u64)
    }
}

#[derive(Debug, Default)]
pub struct MemorySummaryStore {
    current: Mutex<Option<Summary>>,
    offline: AtomicBool,
    writes: AtomicUsize,
}

impl MemorySummaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl SummaryStore for MemorySummaryStore {
    fn read(&self) -> Result<Option<Summary>, PipelineError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(PipelineError::storage("memory summary store is offline"));
        }
        self.current
            .lock()
            .map(|s| s.clone())
            .map_err(|_| PipelineError::storage("summary store lock poisoned"))
    }

    fn write(&self, summary: &Summary) -> Result<(), PipelineError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(PipelineError::storage("memory summary store is offline"));
        }
        let mut current = self
            .current
            .lock()
            .map_err(|_| PipelineError::storage("summary store lock poisoned"))?;
        *current = Some(summary.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
