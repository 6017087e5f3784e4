pub mod models {
    pub mod batch;
    pub mod reading;
    pub mod summary;
}

pub mod client;
pub mod config;
pub mod db {
    pub mod models;
}
pub mod error;
pub mod schema;
pub mod store;
pub mod services {
    pub mod aggregator;
    pub mod fake_data;
    pub mod ingest;
    pub mod lookup;
    pub mod stats;
}

use crate::client::StorageClient;
use crate::config::Config;
use crate::error::PipelineError;
use crate::services::aggregator::{self, Aggregator, PassOutcome};
use crate::models::reading::ReadingKind;
use crate::services::ingest::{self, IngestService, LineFormat};
use crate::services::{fake_data, lookup, stats};
use crate::store::file::FileSummaryStore;
use crate::store::pg::{self, PgRecordStore, PgSummaryStore};
use crate::store::{RecordStore, SummaryStore};
use log::{error, info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

const POOL_SIZE: u32 = 8;
const EXIT_NOT_FOUND: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Aggregate on the configured cadence until killed.
    Serve,
    IngestStdin(LineFormat),
    FakeBatches(usize),
    Stats,
    /// Print the n-th stored reading of a kind.
    Reading(ReadingKind, u64),
    EventCounts,
}

impl Mode {
    fn is_read_only(self) -> bool {
        matches!(self, Mode::Stats | Mode::Reading(..) | Mode::EventCounts)
    }
}

fn set_mode(m: Mode, mode: &mut Option<Mode>) -> Result<(), String> {
    if mode.is_some() {
        return Err(
            "only one of `--stats`, `--reading`, `--event-counts`, `--ingest-stdin`, `--fake-batches` may be given"
                .to_string(),
        );
    }
    *mode = Some(m);
    Ok(())
}

#[derive(Debug)]
struct Cli {
    env_file: Option<PathBuf>,
    mode: Mode,
}

fn parse_cli<I>(args: I) -> Result<Cli, String>
where
    I: IntoIterator<Item = std::ffi::OsString>,
{
    let mut args = args.into_iter();
    let mut env_file: Option<PathBuf> = None;
    let mut mode: Option<Mode> = None;

    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("--env-file") => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let value = args
                    .next()
                    .ok_or_else(|| "`--env-file` requires a path argument".to_string())?;
                env_file = Some(PathBuf::from(value));
            }
            Some(s) if s.starts_with("--env-file=") => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let path_str = &s["--env-file=".len()..];
                if path_str.is_empty() {
                    return Err("`--env-file` requires a path argument".to_string());
                }
                env_file = Some(PathBuf::from(path_str));
            }
            Some("--stats") => set_mode(Mode::Stats, &mut mode)?,
            Some("--event-counts") => set_mode(Mode::EventCounts, &mut mode)?,
            Some("--ingest-stdin") => set_mode(Mode::IngestStdin(LineFormat::Envelope), &mut mode)?,
            Some(s) if s.starts_with("--ingest-stdin=") => {
                let name = &s["--ingest-stdin=".len()..];
                let kind = ReadingKind::parse(name).ok_or_else(|| format!("unknown reading kind: {}", name))?;
                set_mode(Mode::IngestStdin(LineFormat::Kind(kind)), &mut mode)?;
            }
            Some("--reading") => {
                let kind = args
                    .next()
                    .and_then(|v| v.to_str().and_then(ReadingKind::parse))
                    .ok_or_else(|| "`--reading` requires a reading kind and an index".to_string())?;
                let index = args
                    .next()
                    .and_then(|v| v.to_str().and_then(|s| s.parse::<u64>().ok()))
                    .ok_or_else(|| "`--reading` requires a reading kind and an index".to_string())?;
                set_mode(Mode::Reading(kind, index), &mut mode)?;
            }
            Some("--fake-batches") => {
                let count = args
                    .next()
                    .and_then(|v| v.to_str().and_then(|s| s.parse::<usize>().ok()))
                    .filter(|n| *n > 0)
                    .ok_or_else(|| "`--fake-batches` requires a positive count".to_string())?;
                set_mode(Mode::FakeBatches(count), &mut mode)?;
            }
            Some("--") => break,
            Some(other) => return Err(format!("unrecognised argument: {}", other)),
            None => return Err("argument contains invalid UTF-8".to_string()),
        }
    }

    Ok(Cli {
        env_file,
        mode: mode.unwrap_or(Mode::Serve),
    })
}

/// Loads the explicit env file, or `.env` from the working directory when present.
/// Variables already in the process environment win over file values.
fn load_env(explicit: Option<&PathBuf>) -> Result<Option<PathBuf>, String> {
    match explicit {
        Some(path) => {
            if !path.is_file() {
                return Err(format!("env file not found: {}", path.display()));
            }
            dotenv::from_path(path).map_err(|e| format!("failed to load {}: {}", path.display(), e))?;
            Ok(Some(path.clone()))
        }
        None => match dotenv::dotenv() {
            Ok(path) => Ok(Some(path)),
            Err(dotenv::Error::Io(_)) => Ok(None),
            Err(e) => Err(format!("failed to load .env: {}", e)),
        },
    }
}

struct Stores {
    records: Arc<dyn RecordStore>,
    summaries: Arc<dyn SummaryStore>,
}

fn build_stores(cfg: &Config) -> Result<Stores, String> {
    let pool = if cfg.needs_database() {
        let pool = pg::build_pool(&cfg.database_url, POOL_SIZE, cfg.store_timeout)?;
        info!("Connected to database");
        pg::apply_database_migrations(&pool)?;
        Some(pool)
    } else {
        None
    };

    let records: Arc<dyn RecordStore> = match (&cfg.record_store_url, &pool) {
        (Some(url), _) => {
            info!("Readings are stored through {}", url);
            Arc::new(StorageClient::new(url.as_str(), cfg.store_timeout))
        }
        (None, Some(pool)) => Arc::new(PgRecordStore::new(pool.clone())),
        (None, None) => return Err("no record store configured".to_string()),
    };

    let summaries: Arc<dyn SummaryStore> = match (&cfg.summary_file, &pool) {
        (Some(path), _) => {
            info!("Summary is stored in {}", path.display());
            Arc::new(FileSummaryStore::new(path.clone()))
        }
        (None, Some(pool)) => Arc::new(PgSummaryStore::new(pool.clone())),
        (None, None) => return Err("no summary store configured".to_string()),
    };

    Ok(Stores { records, summaries })
}

/// Prints a read result as JSON; `NotFound` becomes `{"message": ..}` and exit code 2.
fn print_json<T: Serialize>(result: Result<T, PipelineError>) -> Result<i32, String> {
    match result {
        Ok(response) => {
            let json = serde_json::to_string_pretty(&response).map_err(|e| format!("encoding response: {}", e))?;
            println!("{}", json);
            Ok(0)
        }
        Err(PipelineError::NotFound(message)) => {
            println!("{}", serde_json::json!({ "message": message }));
            Ok(EXIT_NOT_FOUND)
        }
        Err(e) => Err(e.to_string()),
    }
}

/// One pass after the transport has drained, so the last readings are counted.
fn final_pass(aggregator: &Aggregator) {
    match aggregator.run_pass() {
        Ok(PassOutcome::Completed(summary)) => info!(
            "Final aggregation pass: temperature={}, air_quality={}",
            summary.temperature.count, summary.air_quality.count
        ),
        Ok(_) => info!("Final aggregation pass had nothing to do"),
        Err(e) => warn!("Final aggregation pass failed: {}", e),
    }
}

fn run(mode: Mode) -> Result<i32, String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (aggregation_interval={}s, pass_budget={}s, store_timeout={}ms, epoch_start={}, ingest_workers={}, aggregation_enabled={})",
        cfg.aggregation_interval.as_secs(),
        cfg.pass_budget.as_secs(),
        cfg.store_timeout.as_millis(),
        cfg.epoch_start.to_rfc3339(),
        cfg.ingest_workers,
        cfg.aggregation_enabled
    );

    // 2) Connect stores and apply migrations
    let stores = build_stores(&cfg)?;

    if mode.is_read_only() {
        return match mode {
            Mode::Reading(kind, index) => print_json(lookup::get_reading(stores.records.as_ref(), kind, index)),
            Mode::EventCounts => print_json(lookup::get_event_counts(stores.records.as_ref())),
            _ => print_json(stats::get_stats(stores.summaries.as_ref())),
        };
    }

    let aggregator = Aggregator::new(
        stores.records.clone(),
        stores.summaries.clone(),
        cfg.epoch_start,
        cfg.pass_budget,
    );
    let service = IngestService::new(stores.records.clone());

    if mode == Mode::Serve {
        if !cfg.aggregation_enabled {
            info!("Aggregation disabled via AGGREGATION_ENABLED; nothing to do");
            return Ok(0);
        }
        info!("Starting aggregation loop: interval={}s", cfg.aggregation_interval.as_secs());
        // the sender stays alive for the life of the process
        let (_stop_tx, stop_rx) = mpsc::channel::<()>();
        aggregator::run_loop(&aggregator, cfg.aggregation_interval, &stop_rx);
        return Ok(0);
    }

    // 3) Run the transport with the aggregation loop alongside
    thread::scope(|scope| -> Result<i32, String> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let agg = &aggregator;
        let looper = if cfg.aggregation_enabled {
            info!("Starting aggregation loop: interval={}s", cfg.aggregation_interval.as_secs());
            let interval = cfg.aggregation_interval;
            Some(scope.spawn(move || aggregator::run_loop(agg, interval, &stop_rx)))
        } else {
            info!("Aggregation disabled via AGGREGATION_ENABLED");
            None
        };

        let result = match mode {
            Mode::IngestStdin(format) => {
                let stdin = std::io::stdin();
                ingest::serve_lines(&service, stdin.lock(), format, cfg.ingest_workers).map(|tally| {
                    info!(
                        "Input exhausted: {} batch(es) accepted, {} rejected, {} failed, {} reading(s) stored",
                        tally.accepted, tally.rejected, tally.failed, tally.readings
                    );
                    if tally.failed > 0 { 1 } else { 0 }
                })
            }
            Mode::FakeBatches(count) => fake_data::run(&service, count).map(|_| 0),
            _ => Ok(0),
        };

        drop(stop_tx);
        if let Some(handle) = looper {
            if handle.join().is_err() {
                error!("Aggregation loop panicked");
            }
            final_pass(agg);
        }
        result
    })
}

fn main() {
    let cli = match parse_cli(std::env::args_os().skip(1)) {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };
    let loaded_env = match load_env(cli.env_file.as_ref()) {
        Ok(path) => path,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(path) = loaded_env.as_ref() {
        let origin = if cli.env_file.is_some() { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, path.display());
    }

    info!(
        "fire-telemetry {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    match run(cli.mode) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("fatal: {}", e);
            std::process::exit(1);
        }
    }
}
