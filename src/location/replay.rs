// src/location/replay.rs
//! Replays a recorded gpsd log as a live location stream

use super::{gpsd, Fix, LocationEvent, LocationSource, LocationWatch, WatchOptions};
use crate::error::{LocationError, RecorderError, Result};
use std::path::Path;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

/// Plays back fixes with their original spacing divided by `speedup`.
///
/// Playback position survives across watches, so pausing and resuming a
/// recording continues the log instead of starting it over.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    fixes: Arc<Vec<Fix>>,
    cursor: Arc<AtomicUsize>,
    speedup: f64,
}

impl ReplaySource {
    pub fn new(fixes: Vec<Fix>, speedup: f64) -> Self {
        Self {
            fixes: Arc::new(fixes),
            cursor: Arc::new(AtomicUsize::new(0)),
            speedup: if speedup > 0.0 { speedup } else { 1.0 },
        }
    }

    /// Load a file of gpsd JSON lines; lines that are not TPV fixes are skipped
    pub fn from_file(path: &Path, speedup: f64) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RecorderError::Other(format!("Failed to read replay file {}: {}", path.display(), e)))?;

        let mut fixes = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match gpsd::parse_gpsd_json(line) {
                Ok(Some(fix)) => fixes.push(fix),
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping line {} of {}: {}", index + 1, path.display(), e),
            }
        }

        tracing::info!("Loaded {} fixes from {}", fixes.len(), path.display());
        Ok(Self::new(fixes, speedup))
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }

    /// Number of fixes not yet delivered
    pub fn remaining(&self) -> usize {
        self.fixes.len().saturating_sub(self.cursor.load(Ordering::Relaxed))
    }

    fn delay_before(&self, index: usize) -> Duration {
        if index == 0 {
            return Duration::ZERO;
        }
        let gap = self.fixes[index].timestamp - self.fixes[index - 1].timestamp;
        let secs = gap.num_milliseconds().max(0) as f64 / 1000.0 / self.speedup;
        Duration::from_secs_f64(secs)
    }
}

impl LocationSource for ReplaySource {
    fn watch(&mut self, _options: &WatchOptions) -> std::result::Result<LocationWatch, LocationError> {
        let (tx, watch) = LocationWatch::channel();

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                // No runtime to pace with: hand over everything that is left
                let start = self.cursor.swap(self.fixes.len(), Ordering::Relaxed);
                for fix in self.fixes.iter().skip(start) {
                    let _ = tx.send(LocationEvent::Position(*fix));
                }
                return Ok(watch);
            }
        };

        let source = self.clone();
        let task = runtime.spawn(async move {
            loop {
                let index = source.cursor.load(Ordering::Relaxed);
                if index >= source.fixes.len() {
                    break;
                }
                tokio::time::sleep(source.delay_before(index)).await;
                if tx.send(LocationEvent::Position(source.fixes[index])).is_err() {
                    break;
                }
                source.cursor.store(index + 1, Ordering::Relaxed);
            }
            tracing::info!("Replay finished");
        });

        Ok(watch.on_cancel(move || task.abort()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::io::Write;

    fn fixes(n: usize) -> Vec<Fix> {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        (0..n)
            .map(|i| Fix::new(46.0 + i as f64 * 0.0001, 7.0, 5.0, start + chrono::Duration::seconds(i as i64 * 5)))
            .collect()
    }

    #[test]
    fn test_without_runtime_delivers_everything_once() {
        let mut source = ReplaySource::new(fixes(3), 1.0);

        let mut watch = source.watch(&WatchOptions::default()).unwrap();
        let mut delivered = 0;
        while let Some(LocationEvent::Position(_)) = watch.try_next() {
            delivered += 1;
        }
        assert_eq!(delivered, 3);
        assert_eq!(source.remaining(), 0);

        let mut watch = source.watch(&WatchOptions::default()).unwrap();
        assert!(watch.try_next().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_paced_playback_keeps_order() {
        let mut source = ReplaySource::new(fixes(3), 10.0);
        let mut watch = source.watch(&WatchOptions::default()).unwrap();

        let mut latitudes = Vec::new();
        for _ in 0..3 {
            match watch.next().await {
                Some(LocationEvent::Position(fix)) => latitudes.push(fix.latitude),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(latitudes.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_from_file_skips_noise() {
        let dir = std::env::temp_dir().join(format!("hike-replay-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("log.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, r#"{{"class":"VERSION","release":"3.25"}}"#).unwrap();
        writeln!(file, r#"{{"class":"TPV","mode":3,"lat":46.0,"lon":7.0,"eph":5.0}}"#).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file, r#"{{"class":"TPV","mode":3,"lat":46.1,"lon":7.0,"eph":5.0}}"#).unwrap();

        let source = ReplaySource::from_file(&path, 1.0).unwrap();
        assert_eq!(source.len(), 2);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
