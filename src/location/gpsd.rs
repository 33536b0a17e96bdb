// src/location/gpsd.rs
//! gpsd client feeding the recorder with position fixes

use super::{Fix, LocationEvent, LocationSender, LocationSource, LocationWatch, WatchOptions};
use crate::error::{LocationError, RecorderError, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
};

#[derive(Debug, Deserialize)]
struct GpsdMessage {
    class: String,
    #[serde(flatten)]
    data: HashMap<String, serde_json::Value>,
}

/// Connect to a gpsd daemon and return a stream reader
pub async fn connect_gpsd(host: &str, port: u16) -> Result<BufReader<TcpStream>> {
    let mut stream = TcpStream::connect(format!("{}:{}", host, port))
        .await
        .map_err(|e| RecorderError::Connection(format!("Failed to connect to gpsd at {}:{}: {}", host, port, e)))?;

    // Send WATCH command to start receiving JSON data
    let watch_cmd = "?WATCH={\"enable\":true,\"json\":true}\n";
    stream
        .write_all(watch_cmd.as_bytes())
        .await
        .map_err(|e| RecorderError::Connection(format!("Failed to send WATCH command: {}", e)))?;

    Ok(BufReader::new(stream))
}

/// Parse a single line of gpsd JSON.
///
/// Returns a fix for TPV reports that carry a 2D/3D position and an error
/// estimate; every other message class yields `None`.
pub fn parse_gpsd_json(line: &str) -> Result<Option<Fix>> {
    let msg: GpsdMessage = serde_json::from_str(line)
        .map_err(|e| RecorderError::Parse(format!("Failed to parse gpsd JSON: {}", e)))?;

    match msg.class.as_str() {
        "TPV" => Ok(parse_tpv_message(&msg.data)),
        "VERSION" => {
            if let Some(version) = msg.data.get("release").and_then(|v| v.as_str()) {
                tracing::info!("Connected to gpsd version: {}", version);
            }
            Ok(None)
        }
        "DEVICES" => {
            if let Some(devices) = msg.data.get("devices").and_then(|v| v.as_array()) {
                tracing::info!("gpsd managing {} device(s)", devices.len());
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}

/// Parse TPV (Time Position Velocity) message
fn parse_tpv_message(msg_data: &HashMap<String, serde_json::Value>) -> Option<Fix> {
    let mode = msg_data.get("mode").and_then(|v| v.as_u64()).unwrap_or(0);
    if mode < 2 {
        return None;
    }

    let lat = msg_data.get("lat").and_then(|v| v.as_f64())?;
    let lon = msg_data.get("lon").and_then(|v| v.as_f64())?;

    // Prefer the combined horizontal estimate, fall back to the axis errors
    let accuracy = match msg_data.get("eph").and_then(|v| v.as_f64()) {
        Some(eph) => eph,
        None => {
            let epx = msg_data.get("epx").and_then(|v| v.as_f64());
            let epy = msg_data.get("epy").and_then(|v| v.as_f64());
            match (epx, epy) {
                (Some(x), Some(y)) => x.hypot(y),
                _ => {
                    tracing::debug!("TPV without error estimate, skipping");
                    return None;
                }
            }
        }
    };

    let timestamp = msg_data
        .get("time")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Some(Fix::new(lat, lon, accuracy, timestamp))
}

/// Location source backed by a gpsd daemon
#[derive(Debug, Clone)]
pub struct GpsdSource {
    host: String,
    port: u16,
}

impl GpsdSource {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl LocationSource for GpsdSource {
    fn watch(&mut self, options: &WatchOptions) -> std::result::Result<LocationWatch, LocationError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            LocationError::PositionUnavailable("gpsd source needs a running tokio runtime".to_string())
        })?;

        if !options.high_accuracy {
            tracing::debug!("gpsd has no accuracy mode, ignoring high_accuracy=false");
        }

        let (tx, watch) = LocationWatch::channel();
        let running = Arc::new(AtomicBool::new(true));
        let host = self.host.clone();
        let port = self.port;
        let timeout = Duration::from_millis(options.timeout_ms.max(1));

        let task = runtime.spawn(stream_fixes(host, port, timeout, tx, Arc::clone(&running)));

        Ok(watch.on_cancel(move || {
            running.store(false, Ordering::Relaxed);
            task.abort();
        }))
    }
}

async fn stream_fixes(
    host: String,
    port: u16,
    timeout: Duration,
    tx: LocationSender,
    running: Arc<AtomicBool>,
) {
    let mut reader = match connect_gpsd(&host, port).await {
        Ok(reader) => reader,
        Err(e) => {
            let _ = tx.send(LocationEvent::Error(LocationError::PositionUnavailable(e.to_string())));
            return;
        }
    };
    tracing::info!("Streaming fixes from gpsd at {}:{}", host, port);

    let mut line = String::new();
    while running.load(Ordering::Relaxed) {
        line.clear();
        let read = match tokio::time::timeout(timeout, reader.read_line(&mut line)).await {
            Ok(read) => read,
            Err(_) => {
                let _ = tx.send(LocationEvent::Error(LocationError::Timeout));
                break;
            }
        };

        match read {
            Ok(0) => {
                let _ = tx.send(LocationEvent::Error(LocationError::PositionUnavailable(
                    "gpsd closed the connection".to_string(),
                )));
                break;
            }
            Ok(_) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match parse_gpsd_json(line) {
                    Ok(Some(fix)) => {
                        if tx.send(LocationEvent::Position(fix)).is_err() {
                            break; // watch dropped
                        }
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!("Error parsing gpsd JSON: {}", e),
                }
            }
            Err(e) => {
                let _ = tx.send(LocationEvent::Error(LocationError::PositionUnavailable(format!(
                    "Error reading from gpsd: {}",
                    e
                ))));
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_tpv_parsing() {
        let json = r#"{"class":"TPV","device":"/dev/ttyUSB0","mode":3,"time":"2023-01-01T12:00:00.000Z","ept":0.005,"lat":48.117,"lon":11.517,"alt":545.4,"epx":15.319,"epy":17.054,"epv":124.484,"track":10.3797,"speed":0.091,"climb":10.7,"eps":34.11,"epc":248.97}"#;

        let fix = parse_gpsd_json(json).unwrap().unwrap();

        assert_eq!(fix.latitude, 48.117);
        assert_eq!(fix.longitude, 11.517);
        assert!((fix.accuracy - 15.319f64.hypot(17.054)).abs() < 1e-9);
        assert_eq!(fix.timestamp.to_rfc3339(), "2023-01-01T12:00:00+00:00");
    }

    #[test]
    fn test_tpv_prefers_eph() {
        let json = r#"{"class":"TPV","mode":2,"lat":1.0,"lon":2.0,"eph":4.5,"epx":30.0,"epy":30.0}"#;
        let fix = parse_gpsd_json(json).unwrap().unwrap();
        assert_eq!(fix.accuracy, 4.5);
    }

    #[test]
    fn test_tpv_without_fix_is_skipped() {
        let json = r#"{"class":"TPV","mode":1}"#;
        assert!(parse_gpsd_json(json).unwrap().is_none());

        let json = r#"{"class":"TPV","mode":3,"lat":1.0,"lon":2.0}"#;
        assert!(parse_gpsd_json(json).unwrap().is_none());
    }

    #[test]
    fn test_sky_is_ignored() {
        let json = r#"{"class":"SKY","hdop":1.2,"satellites":[{"PRN":1,"ss":42,"used":true}]}"#;
        assert!(parse_gpsd_json(json).unwrap().is_none());
    }

    #[test]
    fn test_invalid_json() {
        let invalid_json = r#"{"invalid": json"#;
        assert!(parse_gpsd_json(invalid_json).is_err());
    }

    #[test]
    fn test_watch_without_runtime_fails() {
        let mut source = GpsdSource::new("localhost", 2947);
        let err = source.watch(&WatchOptions::default()).unwrap_err();
        assert!(matches!(err, LocationError::PositionUnavailable(_)));
    }

    #[tokio::test]
    async fn test_watch_streams_fixes_then_reports_hangup() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = BufReader::new(socket);
            let mut watch_cmd = String::new();
            socket.read_line(&mut watch_cmd).await.unwrap();
            assert!(watch_cmd.starts_with("?WATCH="));

            let mut socket = socket.into_inner();
            let lines = concat!(
                r#"{"class":"VERSION","release":"3.25"}"#, "\n",
                r#"{"class":"TPV","mode":3,"time":"2024-05-01T10:00:00Z","lat":46.0,"lon":7.0,"eph":6.0}"#, "\n",
            );
            socket.write_all(lines.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        let mut source = GpsdSource::new("127.0.0.1", port);
        let mut watch = source.watch(&WatchOptions::default()).unwrap();

        match watch.next().await {
            Some(LocationEvent::Position(fix)) => {
                assert_eq!(fix.latitude, 46.0);
                assert_eq!(fix.accuracy, 6.0);
            }
            other => panic!("expected a fix, got {:?}", other),
        }
        assert!(matches!(
            watch.next().await,
            Some(LocationEvent::Error(LocationError::PositionUnavailable(_)))
        ));
    }

    #[tokio::test]
    async fn test_watch_reports_connection_failure() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let mut source = GpsdSource::new("127.0.0.1", port);
        let mut watch = source.watch(&WatchOptions::default()).unwrap();

        assert!(matches!(
            watch.next().await,
            Some(LocationEvent::Error(LocationError::PositionUnavailable(_)))
        ));
    }
}
