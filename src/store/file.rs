//! JSON file summary store.
//!
//! The summary is small and has one writer, so a whole-document rewrite per
//! pass is fine. Writes land in a sibling temp file that is renamed over the
//! target; a crash mid-write leaves the previous summary intact.

use log::debug;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::models::summary::Summary;
use crate::store::SummaryStore;

#[derive(Debug, Clone)]
pub struct FileSummaryStore {
    path: PathBuf,
}

impl FileSummaryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSummaryStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "summary.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SummaryStore for FileSummaryStore {
    fn read(&self) -> Result<Option<Summary>, PipelineError> {
        let json = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PipelineError::storage(format!("read {}: {}", self.path.display(), e))),
        };
        let de = &mut serde_json::Deserializer::from_str(&json);
        serde_path_to_error::deserialize(de)
            .map(Some)
            .map_err(|e| PipelineError::storage(format!("parse {}: {}", self.path.display(), e)))
    }

    fn write(&self, summary: &Summary) -> Result<(), PipelineError> {
        let json = serde_json::to_vec_pretty(summary)
            .map_err(|e| PipelineError::storage(format!("serialize summary: {}", e)))?;
        let tmp = self.temp_path();

        let write_tmp = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()
        };
        write_tmp().map_err(|e| PipelineError::storage(format!("write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            PipelineError::storage(format!("replace {} with {}: {}", self.path.display(), tmp.display(), e))
        })?;

        debug!("Summary written to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::summary::KindStats;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempdir().unwrap();
        let store = FileSummaryStore::new(dir.path().join("stats.json"));
        assert_eq!(store.read().unwrap(), None);
    }

    #[test]
    fn write_replaces_previous_summary() {
        let dir = tempdir().unwrap();
        let store = FileSummaryStore::new(dir.path().join("stats.json"));
        let first = Summary::initial(Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap());
        store.write(&first).unwrap();

        let second = Summary {
            temperature: KindStats {
                count: 3,
                max_value: Some(25.5),
            },
            air_quality: KindStats::default(),
            checkpoint: Utc.with_ymd_and_hms(2025, 9, 1, 12, 0, 5).unwrap(),
        };
        store.write(&second).unwrap();

        assert_eq!(store.read().unwrap(), Some(second));
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn null_max_is_preserved() {
        let dir = tempdir().unwrap();
        let store = FileSummaryStore::new(dir.path().join("stats.json"));
        store
            .write(&Summary::initial(Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()))
            .unwrap();
        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"max_value\": null"));
    }

    #[test]
    fn corrupt_file_is_a_storage_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.json");
        fs::write(&path, "{\"temperature\": {\"count\": \"three\"}}").unwrap();
        let err = FileSummaryStore::new(path).read().unwrap_err();
        match err {
            PipelineError::StorageUnavailable(msg) => assert!(msg.contains("temperature.count"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
