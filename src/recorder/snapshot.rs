// src/recorder/snapshot.rs
//! Crash/reload recovery: the persisted snapshot of an in-progress session,
//! the key-value stores it lives in, and the restore policy.

use crate::error::StorageError;
use crate::hike::TrackPoint;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

/// Key holding the in-progress session
pub const SNAPSHOT_KEY: &str = "hike-recorder.active-session";
/// Key holding the instant the last session was finished
pub const LAST_FINISHED_KEY: &str = "hike-recorder.last-finished";

/// Synchronous key-value storage
pub trait SnapshotStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
}

/// State as written to storage. Only `Tracking` and `Paused` are ever
/// written by the recorder, the rest exist so foreign values still parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotState {
    Idle,
    Tracking,
    Paused,
    Ended,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub state: SnapshotState,
    pub points: Vec<TrackPoint>,
    pub distance_meters: f64,
    pub elapsed_sec: u64,
    pub accuracy: Option<f64>,
    pub last_point: Option<TrackPoint>,
    /// Active seconds up to `saved_at`, including the running interval
    pub accumulated_sec: f64,
    pub session_started_at: Option<DateTime<Utc>>,
    pub saved_at: DateTime<Utc>,
    /// Set when the track was cut down to the last point to fit the quota
    #[serde(default)]
    pub degraded: bool,
}

impl PersistedSnapshot {
    /// Same snapshot keeping only the most recent point
    pub fn degraded(&self) -> Self {
        let last = self.last_point.or_else(|| self.points.last().copied());
        Self {
            points: last.into_iter().collect(),
            degraded: true,
            ..self.clone()
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// How a snapshot write ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Full,
    Degraded,
    Dropped,
}

/// Write a snapshot, falling back to a single-point payload when the store
/// is out of quota. Never fails: when nothing can be written the previous
/// snapshot is removed, leaving the session unprotected against a restart
/// rather than restorable into an older state.
pub fn write_snapshot<S: SnapshotStore + ?Sized>(store: &mut S, snapshot: &PersistedSnapshot) -> WriteOutcome {
    let payload = match snapshot.to_json() {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!("Failed to serialize session snapshot: {}", e);
            return drop_snapshot(store);
        }
    };

    match store.set(SNAPSHOT_KEY, &payload) {
        Ok(()) => return WriteOutcome::Full,
        Err(StorageError::QuotaExceeded) => {
            tracing::warn!(
                "Snapshot of {} points exceeds storage quota, keeping only the last point",
                snapshot.points.len()
            );
        }
        Err(e) => {
            tracing::warn!("Failed to persist session snapshot: {}", e);
            return drop_snapshot(store);
        }
    }

    let fallback = match snapshot.degraded().to_json() {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!("Failed to serialize degraded snapshot: {}", e);
            return drop_snapshot(store);
        }
    };

    match store.set(SNAPSHOT_KEY, &fallback) {
        Ok(()) => WriteOutcome::Degraded,
        Err(e) => {
            tracing::warn!("Dropping session snapshot: {}", e);
            drop_snapshot(store)
        }
    }
}

/// A stale snapshot would restore a state the session has already left
fn drop_snapshot<S: SnapshotStore + ?Sized>(store: &mut S) -> WriteOutcome {
    clear_snapshot(store);
    WriteOutcome::Dropped
}

pub fn clear_snapshot<S: SnapshotStore + ?Sized>(store: &mut S) {
    if let Err(e) = store.remove(SNAPSHOT_KEY) {
        tracing::warn!("Failed to clear session snapshot: {}", e);
    }
}

pub fn read_last_finished<S: SnapshotStore + ?Sized>(store: &S) -> Option<DateTime<Utc>> {
    let raw = store.get(LAST_FINISHED_KEY).ok()??;
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(t) => Some(t.with_timezone(&Utc)),
        Err(e) => {
            tracing::warn!("Ignoring unreadable last-finished marker: {}", e);
            None
        }
    }
}

pub fn write_last_finished<S: SnapshotStore + ?Sized>(store: &mut S, at: DateTime<Utc>) {
    if let Err(e) = store.set(LAST_FINISHED_KEY, &at.to_rfc3339()) {
        tracing::warn!("Failed to record last finished session: {}", e);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    NotInProgress,
    MissingStart,
    AlreadyFinished,
}

/// What to do with a snapshot found at startup
#[derive(Debug, Clone, PartialEq)]
pub enum RestorePlan {
    /// Recent tracking snapshot: continue live, crediting `extra_secs`
    ResumeLive { snapshot: PersistedSnapshot, extra_secs: f64 },
    /// Paused snapshot, or a tracking one too old to extrapolate
    RestorePaused { snapshot: PersistedSnapshot },
    Discard(DiscardReason),
}

pub fn plan_restore(
    snapshot: PersistedSnapshot,
    last_finished: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    freshness_window: Duration,
) -> RestorePlan {
    if !matches!(snapshot.state, SnapshotState::Tracking | SnapshotState::Paused) {
        return RestorePlan::Discard(DiscardReason::NotInProgress);
    }

    let started_at = match snapshot.session_started_at {
        Some(started_at) => started_at,
        None => return RestorePlan::Discard(DiscardReason::MissingStart),
    };

    if let Some(finished_at) = last_finished {
        if started_at <= finished_at {
            return RestorePlan::Discard(DiscardReason::AlreadyFinished);
        }
    }

    if snapshot.state == SnapshotState::Paused {
        return RestorePlan::RestorePaused { snapshot };
    }

    let age = (now - snapshot.saved_at).max(Duration::zero());
    if age <= freshness_window {
        let extra_secs = age.num_milliseconds() as f64 / 1000.0;
        RestorePlan::ResumeLive { snapshot, extra_secs }
    } else {
        RestorePlan::RestorePaused { snapshot }
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    entries: HashMap<String, String>,
    quota_bytes: Option<usize>,
    writes: usize,
}

/// In-memory store with an optional byte quota over keys and values.
/// Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Rc<RefCell<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        let store = Self::default();
        store.inner.borrow_mut().quota_bytes = Some(quota_bytes);
        store
    }

    pub fn set_quota(&self, quota_bytes: Option<usize>) {
        self.inner.borrow_mut().quota_bytes = quota_bytes;
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.borrow().entries.contains_key(key)
    }

    /// Successful writes so far
    pub fn writes(&self) -> usize {
        self.inner.borrow().writes
    }

    pub fn snapshot(&self) -> Option<PersistedSnapshot> {
        let inner = self.inner.borrow();
        let raw = inner.entries.get(SNAPSHOT_KEY)?;
        PersistedSnapshot::from_json(raw).ok()
    }

    fn used_bytes_without(entries: &HashMap<String, String>, key: &str) -> usize {
        entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

impl SnapshotStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.inner.borrow().entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.borrow_mut();
        if let Some(quota) = inner.quota_bytes {
            let used = Self::used_bytes_without(&inner.entries, key);
            if used + key.len() + value.len() > quota {
                return Err(StorageError::QuotaExceeded);
            }
        }
        inner.entries.insert(key.to_string(), value.to_string());
        inner.writes += 1;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.inner.borrow_mut().entries.remove(key);
        Ok(())
    }
}

/// One file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

impl SnapshotStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        // Write then rename so a crash never leaves a half-written snapshot
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
