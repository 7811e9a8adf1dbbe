//! Per-day batch progress, persisted so an interrupted run can resume.
//!
//! State belongs to a single calendar day. Loading on a different day starts
//! over, so every product gets one fresh price per day. Within a day, a
//! product recorded as done (with or without a price) is skipped.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::aggregate::AggregationResult;
use crate::error::PersistenceError;

/// Progress of one day's batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchState {
    pub day: NaiveDate,
    pub completed: BTreeSet<String>,
    /// `None` records a query that finished without a price.
    pub results: BTreeMap<String, Option<AggregationResult>>,
}

impl BatchState {
    pub fn new(day: NaiveDate) -> Self {
        Self {
            day,
            completed: BTreeSet::new(),
            results: BTreeMap::new(),
        }
    }

    pub fn is_done(&self, keyword_id: &str) -> bool {
        self.completed.contains(keyword_id)
    }

    /// Record a finished query. Both maps are updated together.
    pub fn record(&mut self, keyword_id: &str, result: Option<AggregationResult>) {
        self.completed.insert(keyword_id.to_string());
        self.results.insert(keyword_id.to_string(), result);
    }

    pub fn result(&self, keyword_id: &str) -> Option<AggregationResult> {
        self.results.get(keyword_id).copied().flatten()
    }
}

/// Extra statistics kept next to the median in the state file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct StoredStats {
    min: i64,
    max: i64,
    count: usize,
}

/// On-disk layout: `results` holds medians only, `stats` the rest.
#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    day: NaiveDate,
    #[serde(default)]
    completed: Vec<String>,
    #[serde(default)]
    results: BTreeMap<String, Option<i64>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    stats: BTreeMap<String, StoredStats>,
}

impl From<&BatchState> for StateFile {
    fn from(state: &BatchState) -> Self {
        let mut results = BTreeMap::new();
        let mut stats = BTreeMap::new();
        for (key, result) in &state.results {
            let result = (*result).filter(|r| !r.is_empty());
            results.insert(key.clone(), result.and_then(|r| r.median));
            if let Some(AggregationResult {
                min: Some(min),
                max: Some(max),
                count,
                ..
            }) = result
            {
                stats.insert(key.clone(), StoredStats { min, max, count });
            }
        }
        Self {
            day: state.day,
            completed: state.completed.iter().cloned().collect(),
            results,
            stats,
        }
    }
}

impl From<StateFile> for BatchState {
    fn from(file: StateFile) -> Self {
        let mut state = BatchState::new(file.day);
        for key in file.completed {
            let result = file.results.get(&key).copied().flatten().map(|median| {
                match file.stats.get(&key) {
                    Some(s) => AggregationResult {
                        median: Some(median),
                        min: Some(s.min),
                        max: Some(s.max),
                        count: s.count,
                    },
                    // Files written without stats only know the median
                    None => AggregationResult {
                        median: Some(median),
                        min: Some(median),
                        max: Some(median),
                        count: 1,
                    },
                }
            });
            state.record(&key, result);
        }
        state
    }
}

/// Loads and saves [`BatchState`].
#[async_trait]
pub trait BatchStateStore: Send + Sync {
    /// Raw persisted state, whatever its day.
    async fn read(&self) -> Result<Option<BatchState>, PersistenceError>;

    async fn save(&self, state: &BatchState) -> Result<(), PersistenceError>;

    /// Remove persisted state.
    async fn clear(&self) -> Result<(), PersistenceError>;

    /// Persisted state for `today`, or a fresh one if the stored state is from
    /// another day (or there is none).
    async fn load(&self, today: NaiveDate) -> Result<BatchState, PersistenceError> {
        match self.read().await? {
            Some(state) if state.day == today => {
                info!(
                    "Resuming batch for {} ({} queries already done)",
                    today,
                    state.completed.len()
                );
                Ok(state)
            }
            Some(stale) => {
                info!("Discarding batch state from {}", stale.day);
                Ok(BatchState::new(today))
            }
            None => Ok(BatchState::new(today)),
        }
    }

    /// Record a finished query and persist immediately.
    async fn mark_done(
        &self,
        state: &mut BatchState,
        keyword_id: &str,
        result: Option<AggregationResult>,
    ) -> Result<(), PersistenceError> {
        state.record(keyword_id, result);
        self.save(state).await
    }
}

/// JSON file store with atomic replace-on-save.
#[derive(Debug, Clone)]
pub struct JsonFileStateStore {
    path: PathBuf,
}

impl JsonFileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| PersistenceError::io(&dir, e))?;

        let mut tmp =
            tempfile::NamedTempFile::new_in(&dir).map_err(|e| PersistenceError::io(&dir, e))?;
        tmp.write_all(bytes)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| PersistenceError::io(tmp.path(), e))?;
        tmp.persist(path)
            .map_err(|e| PersistenceError::io(path, e.error))?;
        Ok(())
    }
}

#[async_trait]
impl BatchStateStore for JsonFileStateStore {
    async fn read(&self) -> Result<Option<BatchState>, PersistenceError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistenceError::io(&self.path, e)),
        };
        let file: StateFile =
            serde_json::from_str(&contents).map_err(|source| PersistenceError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        Ok(Some(file.into()))
    }

    async fn save(&self, state: &BatchState) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec_pretty(&StateFile::from(state))?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::write_atomic(&path, &bytes))
            .await
            .map_err(|e| PersistenceError::io(&self.path, std::io::Error::other(e)))??;
        debug!("Saved batch state to {}", self.path.display());
        Ok(())
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistenceError::io(&self.path, e)),
        }
    }
}

/// Store that keeps state in process memory only; nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    state: Mutex<Option<BatchState>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: BatchState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
        }
    }

    /// Last saved state.
    pub fn snapshot(&self) -> Option<BatchState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl BatchStateStore for InMemoryStateStore {
    async fn read(&self) -> Result<Option<BatchState>, PersistenceError> {
        Ok(self.snapshot())
    }

    async fn save(&self, state: &BatchState) -> Result<(), PersistenceError> {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = Some(state.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn priced(median: i64) -> Option<AggregationResult> {
        Some(AggregationResult {
            median: Some(median),
            min: Some(median - 1000),
            max: Some(median + 1000),
            count: 12,
        })
    }

    #[tokio::test]
    async fn test_round_trip_through_file() {
        let dir = tempdir().unwrap();
        let store = JsonFileStateStore::new(dir.path().join("state/batch.json"));

        let mut state = BatchState::new(day("2026-10-15"));
        store.mark_done(&mut state, "A", priced(12000)).await.unwrap();
        store.mark_done(&mut state, "B", None).await.unwrap();

        let loaded = store.load(day("2026-10-15")).await.unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_file_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("batch.json");
        let store = JsonFileStateStore::new(&path);

        let mut state = BatchState::new(day("2026-10-15"));
        store.mark_done(&mut state, "A", priced(12000)).await.unwrap();
        store.mark_done(&mut state, "B", None).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["day"], "2026-10-15");
        assert_eq!(raw["completed"], serde_json::json!(["A", "B"]));
        assert_eq!(raw["results"], serde_json::json!({"A": 12000, "B": null}));
        assert_eq!(raw["stats"]["A"]["count"], 12);
    }

    #[tokio::test]
    async fn test_stale_day_is_discarded() {
        let dir = tempdir().unwrap();
        let store = JsonFileStateStore::new(dir.path().join("batch.json"));

        let mut old = BatchState::new(day("2026-10-14"));
        store.mark_done(&mut old, "A", priced(12000)).await.unwrap();

        let loaded = store.load(day("2026-10-15")).await.unwrap();
        assert_eq!(loaded, BatchState::new(day("2026-10-15")));
    }

    #[tokio::test]
    async fn test_missing_file_is_fresh_state() {
        let dir = tempdir().unwrap();
        let store = JsonFileStateStore::new(dir.path().join("nope.json"));
        let loaded = store.load(day("2026-10-15")).await.unwrap();
        assert!(loaded.completed.is_empty());
        assert!(loaded.results.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("batch.json");
        std::fs::write(&path, "{\"day\": \"2026-10-").unwrap();

        let err = JsonFileStateStore::new(&path)
            .load(day("2026-10-15"))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_minimal_file_without_stats_loads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("batch.json");
        std::fs::write(
            &path,
            r#"{"day":"2026-10-15","completed":["A"],"results":{"A":12000}}"#,
        )
        .unwrap();

        let loaded = JsonFileStateStore::new(&path)
            .load(day("2026-10-15"))
            .await
            .unwrap();
        assert!(loaded.is_done("A"));
        assert_eq!(loaded.result("A").and_then(|r| r.median), Some(12000));
    }

    #[tokio::test]
    async fn test_mark_done_is_idempotent() {
        let store = InMemoryStateStore::new();
        let mut state = BatchState::new(day("2026-10-15"));

        store.mark_done(&mut state, "A", priced(12000)).await.unwrap();
        let once = state.clone();
        store.mark_done(&mut state, "A", priced(12000)).await.unwrap();

        assert_eq!(state, once);
        assert_eq!(store.snapshot(), Some(once));
    }

    #[tokio::test]
    async fn test_clear_removes_state() {
        let dir = tempdir().unwrap();
        let store = JsonFileStateStore::new(dir.path().join("batch.json"));
        let mut state = BatchState::new(day("2026-10-15"));
        store.mark_done(&mut state, "A", None).await.unwrap();

        store.clear().await.unwrap();
        assert!(store.read().await.unwrap().is_none());
        // Clearing twice is fine
        store.clear().await.unwrap();
    }
}
