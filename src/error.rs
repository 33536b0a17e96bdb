// src/error.rs
//! Error types for the hike recorder

use std::fmt;

pub type Result<T> = std::result::Result<T, RecorderError>;

#[derive(Debug)]
pub enum RecorderError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Connection(String),
    Parse(String),
    Config(String),
    Storage(StorageError),
    Location(LocationError),
    Other(String),
}

impl fmt::Display for RecorderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecorderError::Io(e) => write!(f, "IO error: {}", e),
            RecorderError::Json(e) => write!(f, "JSON error: {}", e),
            RecorderError::Connection(msg) => write!(f, "Connection error: {}", msg),
            RecorderError::Parse(msg) => write!(f, "Parse error: {}", msg),
            RecorderError::Config(msg) => write!(f, "Config error: {}", msg),
            RecorderError::Storage(e) => write!(f, "Storage error: {}", e),
            RecorderError::Location(e) => write!(f, "Location error: {}", e),
            RecorderError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for RecorderError {}

impl From<std::io::Error> for RecorderError {
    fn from(error: std::io::Error) -> Self {
        RecorderError::Io(error)
    }
}

impl From<serde_json::Error> for RecorderError {
    fn from(error: serde_json::Error) -> Self {
        RecorderError::Json(error)
    }
}

impl From<StorageError> for RecorderError {
    fn from(error: StorageError) -> Self {
        RecorderError::Storage(error)
    }
}

impl From<LocationError> for RecorderError {
    fn from(error: LocationError) -> Self {
        RecorderError::Location(error)
    }
}

impl From<anyhow::Error> for RecorderError {
    fn from(error: anyhow::Error) -> Self {
        RecorderError::Other(error.to_string())
    }
}

/// Failures of the key-value snapshot store.
///
/// Quota exhaustion is kept apart because the recorder reacts to it by
/// writing a smaller payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    QuotaExceeded,
    Unavailable(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::QuotaExceeded => write!(f, "storage quota exceeded"),
            StorageError::Unavailable(msg) => write!(f, "storage unavailable: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(error: std::io::Error) -> Self {
        // ENOSPC / EDQUOT surface as StorageFull on recent toolchains
        if error.kind() == std::io::ErrorKind::StorageFull {
            StorageError::QuotaExceeded
        } else {
            StorageError::Unavailable(error.to_string())
        }
    }
}

/// Runtime failures of a location stream. The message is shown to the user
/// as-is, so keep it readable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    PermissionDenied(String),
    PositionUnavailable(String),
    Timeout,
    Unsupported,
}

impl fmt::Display for LocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationError::PermissionDenied(msg) if msg.is_empty() => {
                write!(f, "Location permission was denied.")
            }
            LocationError::PermissionDenied(msg) => write!(f, "{}", msg),
            LocationError::PositionUnavailable(msg) if msg.is_empty() => {
                write!(f, "Unable to access your location.")
            }
            LocationError::PositionUnavailable(msg) => write!(f, "{}", msg),
            LocationError::Timeout => write!(f, "Timed out waiting for a location fix."),
            LocationError::Unsupported => write!(f, "Geolocation is not supported on this device."),
        }
    }
}

impl std::error::Error for LocationError {}

/// Wake-lock failures. Never fatal to a recording, only shown as advice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeLockError {
    Unsupported,
    Denied(String),
}

impl fmt::Display for WakeLockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WakeLockError::Unsupported => write!(f, "Keeping the screen awake is not supported on this device."),
            WakeLockError::Denied(msg) => write!(f, "Could not keep the screen awake: {}", msg),
        }
    }
}

impl std::error::Error for WakeLockError {}
