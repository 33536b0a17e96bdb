// src/config.rs
//! Configuration management with file-based storage

use crate::error::{RecorderError, Result};
use crate::location::WatchOptions;
use crate::recorder::FilterConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Knobs of the recording engine itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub filter: FilterConfig,
    pub watch: WatchOptions,
    /// Elapsed-time refresh cadence
    pub tick_interval_ms: u64,
    /// Snapshot refresh cadence while nothing else changes
    pub snapshot_interval_secs: u64,
    /// Max snapshot age that still resumes live tracking on restore
    pub freshness_window_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            filter: FilterConfig::default(),
            watch: WatchOptions::default(),
            tick_interval_ms: 1000,
            snapshot_interval_secs: 10,
            freshness_window_secs: 5 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub gpsd_host: String,
    pub gpsd_port: u16,
    /// Where snapshots and finished hikes live; defaults under $HOME
    pub data_dir: Option<PathBuf>,
    pub keep_awake: bool,
    pub session: SessionConfig,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            gpsd_host: "localhost".to_string(),
            gpsd_port: 2947,
            data_dir: None,
            keep_awake: false,
            session: SessionConfig::default(),
        }
    }
}

impl RecorderConfig {
    /// Load configuration from the config file, defaulting when absent
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)
            .map_err(|e| RecorderError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(contents)
            .map_err(|e| RecorderError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save to the config file
    pub fn save(&self) -> Result<PathBuf> {
        let config_path = Self::get_config_path()?;

        // Create config directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RecorderError::Config(format!("Failed to create config directory: {}", e)))?;
        }

        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| RecorderError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&config_path, contents)
            .map_err(|e| RecorderError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(config_path)
    }

    pub fn validate(&self) -> Result<()> {
        let filter = &self.session.filter;
        if filter.max_accuracy_m <= 0.0 || filter.max_speed_mps <= 0.0 {
            return Err(RecorderError::Config(
                "max_accuracy_m and max_speed_mps must be positive".to_string(),
            ));
        }
        if filter.min_interval_secs < 0.0 || filter.min_movement_m < 0.0 {
            return Err(RecorderError::Config(
                "min_interval_secs and min_movement_m must not be negative".to_string(),
            ));
        }
        if self.session.tick_interval_ms == 0 {
            return Err(RecorderError::Config("tick_interval_ms must be positive".to_string()));
        }
        Ok(())
    }

    /// Get config file path
    pub fn get_config_path() -> Result<PathBuf> {
        Ok(Self::home_dir()?.join(".config").join("hike-recorder").join("config.json"))
    }

    /// Data directory, falling back to ~/.local/share/hike-recorder
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::home_dir()?.join(".local").join("share").join("hike-recorder")),
        }
    }

    fn home_dir() -> Result<PathBuf> {
        let home = std::env::var("HOME")
            .map_err(|_| RecorderError::Config("HOME environment variable not set".to_string()))?;
        Ok(PathBuf::from(home))
    }

    /// Update gpsd settings
    pub fn update_gpsd(&mut self, host: String, port: u16) {
        self.gpsd_host = host;
        self.gpsd_port = port;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RecorderConfig::default();
        assert_eq!(config.gpsd_host, "localhost");
        assert_eq!(config.gpsd_port, 2947);
        assert_eq!(config.session.freshness_window_secs, 300);
        assert_eq!(config.session.filter.max_accuracy_m, 50.0);
        assert_eq!(config.session.watch.timeout_ms, 10_000);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = RecorderConfig::from_json(
            r#"{"gpsd_port": 3000, "session": {"freshness_window_secs": 60, "filter": {"max_speed_mps": 4.0}}}"#,
        )
        .unwrap();
        assert_eq!(config.gpsd_port, 3000);
        assert_eq!(config.gpsd_host, "localhost");
        assert_eq!(config.session.freshness_window_secs, 60);
        assert_eq!(config.session.filter.max_speed_mps, 4.0);
        assert_eq!(config.session.filter.min_movement_m, 2.0);
        assert_eq!(config.session.tick_interval_ms, 1000);
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let err = RecorderConfig::from_json(r#"{"session": {"filter": {"max_speed_mps": 0.0}}}"#);
        assert!(matches!(err, Err(RecorderError::Config(_))));

        let err = RecorderConfig::from_json(r#"{"session": {"tick_interval_ms": 0}}"#);
        assert!(matches!(err, Err(RecorderError::Config(_))));
    }

    #[test]
    fn test_update_gpsd() {
        let mut config = RecorderConfig::default();
        config.update_gpsd("10.0.0.5".to_string(), 2948);
        assert_eq!(config.gpsd_host, "10.0.0.5");
        assert_eq!(config.gpsd_port, 2948);
    }

    #[test]
    fn test_explicit_data_dir() {
        let config = RecorderConfig {
            data_dir: Some(PathBuf::from("/tmp/hikes")),
            ..RecorderConfig::default()
        };
        assert_eq!(config.data_dir().unwrap(), PathBuf::from("/tmp/hikes"));
    }
}
