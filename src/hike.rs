// src/hike.rs
//! Track points, finished hike records and the on-disk hike store

use crate::error::{RecorderError, Result};
use crate::geo;
use crate::location::Fix;
use crate::recorder::SessionResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// An accepted fix, as stored in the track
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    pub accuracy: f64,
}

impl TrackPoint {
    pub fn from_fix(fix: &Fix) -> Self {
        Self {
            latitude: fix.latitude,
            longitude: fix.longitude,
            timestamp: fix.timestamp,
            accuracy: fix.accuracy,
        }
    }

    /// Great-circle distance to another point in meters
    pub fn distance_to(&self, other: &TrackPoint) -> f64 {
        geo::haversine_meters(self.latitude, self.longitude, other.latitude, other.longitude)
    }

    /// Seconds from this point to `later` (negative if `later` is earlier)
    pub fn seconds_until(&self, later: &TrackPoint) -> f64 {
        (later.timestamp - self.timestamp).num_milliseconds() as f64 / 1000.0
    }
}

/// A finished hike, ready for durable storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HikeRecord {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_sec: u64,
    pub distance_meters: f64,
    pub created_at: DateTime<Utc>,
    pub points: Vec<TrackPoint>,
}

impl HikeRecord {
    pub fn from_session(result: &SessionResult, distance_meters: f64, points: Vec<TrackPoint>) -> Self {
        Self {
            name: "Untitled hike".to_string(),
            started_at: result.started_at,
            ended_at: result.ended_at,
            duration_sec: result.duration_sec,
            distance_meters,
            created_at: Utc::now(),
            points,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.trim().is_empty() {
            self.name = name;
        }
        self
    }

    pub fn summary(&self) -> String {
        format!(
            "{} | {} | {} | {} | {} points",
            self.started_at.format("%Y-%m-%d %H:%M"),
            geo::format_distance(self.distance_meters),
            geo::format_duration(self.duration_sec),
            geo::format_pace(self.distance_meters, self.duration_sec),
            self.points.len()
        )
    }
}

/// Directory of JSON files, one per hike
#[derive(Debug, Clone)]
pub struct HikeStore {
    dir: PathBuf,
}

impl HikeStore {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .map_err(|e| RecorderError::Other(format!("Failed to create hike directory: {}", e)))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save a hike and return the file it was written to
    pub fn save(&self, hike: &HikeRecord) -> Result<PathBuf> {
        let path = self
            .dir
            .join(format!("hike-{}.json", hike.started_at.format("%Y%m%dT%H%M%S")));
        let contents = serde_json::to_string_pretty(hike)?;
        std::fs::write(&path, contents)?;
        tracing::info!("Saved hike to {}", path.display());
        Ok(path)
    }

    /// All stored hikes, oldest first. Unreadable files are skipped.
    pub fn list(&self) -> Result<Vec<HikeRecord>> {
        let mut hikes = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = std::fs::read_to_string(&path)
                .map_err(RecorderError::from)
                .and_then(|s| serde_json::from_str::<HikeRecord>(&s).map_err(RecorderError::from));
            match parsed {
                Ok(hike) => hikes.push(hike),
                Err(e) => tracing::warn!("Skipping {}: {}", path.display(), e),
            }
        }
        hikes.sort_by_key(|h| h.started_at);
        Ok(hikes)
    }
}
