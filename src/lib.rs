// src/lib.rs
//! Hike Recorder Library
//!
//! Records a hike from a stream of location fixes: filters out noisy fixes,
//! accumulates distance and moving time, and keeps a snapshot so a recording
//! interrupted by a crash or restart can be picked up again.

pub mod clock;
pub mod config;
pub mod display;
pub mod error;
pub mod geo;
pub mod hike;
pub mod location;
pub mod monitor;
pub mod recorder;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use config::{RecorderConfig, SessionConfig};
pub use error::{LocationError, RecorderError, Result, StorageError, WakeLockError};
pub use hike::{HikeRecord, HikeStore, TrackPoint};
pub use location::{Fix, LocationEvent, LocationSource, LocationWatch, WatchOptions};
pub use monitor::{Command, HikeMonitor, Outcome};
pub use recorder::{Recorder, RecorderStatus, SessionResult, SessionState};
