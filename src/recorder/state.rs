// src/recorder/state.rs
//! Session states and the values the recorder reports outward

use super::keep_awake::KeepAwakeStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Tracking,
    Paused,
    Ended,
    Error(String),
}

impl SessionState {
    /// Tracking or paused: a session exists that has not been finished
    pub fn is_in_progress(&self) -> bool {
        matches!(self, SessionState::Tracking | SessionState::Paused)
    }

    pub fn is_tracking(&self) -> bool {
        matches!(self, SessionState::Tracking)
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            SessionState::Error(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Tracking => "tracking",
            SessionState::Paused => "paused",
            SessionState::Ended => "ended",
            SessionState::Error(_) => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Error(msg) => write!(f, "error: {}", msg),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// What `finish()` hands back for durable storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResult {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_sec: u64,
}

/// Live view for presentation code
#[derive(Debug, Clone, PartialEq)]
pub struct RecorderStatus {
    pub state: SessionState,
    pub point_count: usize,
    pub distance_meters: f64,
    pub elapsed_sec: u64,
    pub accuracy: Option<f64>,
    pub error: Option<String>,
    pub restored: bool,
    pub keep_awake: KeepAwakeStatus,
}
