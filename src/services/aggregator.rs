//! Checkpointed aggregation.
//!
//! Each pass folds the readings that arrived in `[checkpoint, now)` into the
//! running summary and moves the checkpoint to `now`. The window end is read
//! once, before any query, from the record store's own clock (the one that
//! stamps arrival times): a reading committed while the queries run, or right
//! after the pass, has an arrival time at or after it and lands in the next
//! window. A host clock running ahead of the store would instead push the
//! checkpoint past rows that are yet to arrive.
//!
//! A pass either persists a complete new summary or nothing at all. Failed or
//! abandoned passes leave the checkpoint where it was, so the next tick retries
//! the same window. Readings are immutable and the fold is order independent,
//! which makes such a retry produce the same summary.

use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::{Duration, Instant};

use crate::error::PipelineError;
use crate::models::reading::{ReadingKind, StoredReading};
use crate::models::summary::{KindStats, Summary};
use crate::store::{store_precision, RecordStore, SummaryStore};

#[derive(Debug)]
pub enum PassError {
    /// A read or write against one of the stores failed.
    Store(PipelineError),
    /// The pass ran past its time budget and was abandoned.
    BudgetExceeded { elapsed: Duration, budget: Duration },
}

impl fmt::Display for PassError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassError::Store(e) => write!(f, "{}", e),
            PassError::BudgetExceeded { elapsed, budget } => write!(
                f,
                "pass abandoned after {}ms (budget {}ms)",
                elapsed.as_millis(),
                budget.as_millis()
            ),
        }
    }
}

impl std::error::Error for PassError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PassError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PipelineError> for PassError {
    fn from(value: PipelineError) -> Self {
        PassError::Store(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    /// A new summary was persisted.
    Completed(Summary),
    /// The window end did not lie past the checkpoint; nothing to do.
    Unchanged(Summary),
    /// Another pass was still running.
    Skipped,
}

/// Fold a window's rows into one kind's running stats.
pub fn fold(stats: KindStats, rows: &[StoredReading]) -> KindStats {
    let max_value = rows
        .iter()
        .map(|r| r.reading.primary_value())
        .fold(stats.max_value, |acc, v| Some(acc.map_or(v, |m| m.max(v))));
    KindStats {
        count: stats.count + rows.len() as u64,
        max_value,
    }
}

/// Derive the next summary from the previous one and every kind's window rows.
pub fn fold_window(
    prev: &Summary,
    windows: &[(ReadingKind, Vec<StoredReading>)],
    window_end: DateTime<Utc>,
) -> Summary {
    let mut next = prev.clone();
    for (kind, rows) in windows {
        let stats = next.stats_mut(*kind);
        *stats = fold(*stats, rows);
    }
    next.checkpoint = window_end;
    next
}

pub struct Aggregator {
    records: Arc<dyn RecordStore>,
    summaries: Arc<dyn SummaryStore>,
    epoch_start: DateTime<Utc>,
    pass_budget: Duration,
    running: Mutex<()>,
}

impl Aggregator {
    pub fn new(
        records: Arc<dyn RecordStore>,
        summaries: Arc<dyn SummaryStore>,
        epoch_start: DateTime<Utc>,
        pass_budget: Duration,
    ) -> Self {
        Aggregator {
            records,
            summaries,
            epoch_start,
            pass_budget,
            running: Mutex::new(()),
        }
    }

    /// One aggregation pass with the window ending at the record store's now.
    pub fn run_pass(&self) -> Result<PassOutcome, PassError> {
        self.exclusive(|| {
            let prev = self.load_summary()?;
            let window_end = self.records.now()?;
            self.advance(prev, window_end)
        })
    }

    /// One aggregation pass with a caller-chosen window end.
    pub fn run_pass_until(&self, window_end: DateTime<Utc>) -> Result<PassOutcome, PassError> {
        self.exclusive(|| {
            let prev = self.load_summary()?;
            self.advance(prev, window_end)
        })
    }

    fn exclusive<F>(&self, pass: F) -> Result<PassOutcome, PassError>
    where
        F: FnOnce() -> Result<PassOutcome, PassError>,
    {
        let _guard = match self.running.try_lock() {
            Ok(guard) => guard,
            // a panicked pass persisted nothing; the lock only serializes passes
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Ok(PassOutcome::Skipped),
        };
        pass()
    }

    fn load_summary(&self) -> Result<Summary, PassError> {
        match self.summaries.read()? {
            Some(summary) => Ok(summary),
            None => {
                info!(
                    "No summary persisted yet; starting from {}",
                    self.epoch_start.to_rfc3339_opts(SecondsFormat::Secs, true)
                );
                Ok(Summary::initial(self.epoch_start))
            }
        }
    }

    fn check_budget(&self, started: Instant) -> Result<(), PassError> {
        let elapsed = started.elapsed();
        if elapsed > self.pass_budget {
            Err(PassError::BudgetExceeded {
                elapsed,
                budget: self.pass_budget,
            })
        } else {
            Ok(())
        }
    }

    fn advance(&self, prev: Summary, window_end: DateTime<Utc>) -> Result<PassOutcome, PassError> {
        // a checkpoint stored below the queried end would overlap the next window
        let window_end = store_precision(window_end);
        let window_start = prev.checkpoint;
        if window_end <= window_start {
            if window_end < window_start {
                warn!(
                    "Window end {} is before checkpoint {}; clock stepped back, keeping checkpoint",
                    window_end.to_rfc3339(),
                    window_start.to_rfc3339()
                );
            }
            return Ok(PassOutcome::Unchanged(prev));
        }

        let started = Instant::now();
        info!(
            "Querying readings from {} to {}",
            window_start.to_rfc3339_opts(SecondsFormat::Micros, true),
            window_end.to_rfc3339_opts(SecondsFormat::Micros, true)
        );

        // every kind must succeed before anything is folded; the checkpoint is shared
        let mut windows = Vec::with_capacity(ReadingKind::ALL.len());
        for kind in ReadingKind::ALL {
            let rows = self.records.query_by_arrival_range(kind, window_start, window_end)?;
            info!("Received {} new {} reading(s)", rows.len(), kind);
            self.check_budget(started)?;
            windows.push((kind, rows));
        }

        let next = fold_window(&prev, &windows, window_end);
        self.check_budget(started)?;
        self.summaries.write(&next)?;
        debug!("Updated statistics: {:?}", next);
        Ok(PassOutcome::Completed(next))
    }
}

/// Periodic driver: one pass per `interval` until `stop` fires or disconnects.
///
/// Passes run on this thread only, so they never overlap; ticks missed while a
/// slow pass was running are coalesced into the next one.
pub fn run_loop(aggregator: &Aggregator, interval: Duration, stop: &Receiver<()>) {
    loop {
        let tick_start = Instant::now();

        info!("Started periodic processing");
        match aggregator.run_pass() {
            Ok(PassOutcome::Completed(summary)) => info!(
                "Periodic processing has ended (temperature={}, air_quality={}, checkpoint={})",
                summary.temperature.count,
                summary.air_quality.count,
                summary.checkpoint.to_rfc3339_opts(SecondsFormat::Secs, true)
            ),
            Ok(PassOutcome::Unchanged(_)) => debug!("Periodic processing found an empty window"),
            Ok(PassOutcome::Skipped) => debug!("Previous pass still running; tick skipped"),
            Err(e) => error!("Periodic processing failed, window will be retried: {}", e),
        }

        // Maintain steady cadence
        let elapsed = tick_start.elapsed();
        let wait = if elapsed < interval {
            interval - elapsed
        } else {
            warn!(
                "Pass took {}ms, longer than the {}ms interval",
                elapsed.as_millis(),
                interval.as_millis()
            );
            Duration::ZERO
        };
        match stop.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                info!("Aggregation loop stopping");
                return;
            }
        }
    }
}
