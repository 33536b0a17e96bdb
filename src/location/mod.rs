// src/location/mod.rs
//! Location sources and the subscription handle they hand out.
//!
//! A source is asked to `watch`; it returns a [`LocationWatch`] that yields
//! fixes (or a terminal error) in delivery order until it is cancelled.
//! Dropping the watch cancels it.

pub mod gpsd;
pub mod replay;

use crate::error::LocationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TryRecvError};

pub use gpsd::GpsdSource;
pub use replay::ReplaySource;

/// One raw location sample as reported by a source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64, // meters, horizontal
    pub timestamp: DateTime<Utc>,
}

impl Fix {
    pub fn new(latitude: f64, longitude: f64, accuracy: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocationEvent {
    Position(Fix),
    Error(LocationError),
}

/// Hints passed to a source when a watch starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchOptions {
    pub high_accuracy: bool,
    pub maximum_age_ms: u64,
    pub timeout_ms: u64,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            maximum_age_ms: 1000,
            timeout_ms: 10_000,
        }
    }
}

pub trait LocationSource {
    /// Start delivering fixes. Failing here means the capability is missing
    /// altogether; runtime failures arrive later as `LocationEvent::Error`.
    fn watch(&mut self, options: &WatchOptions) -> Result<LocationWatch, LocationError>;
}

pub type LocationSender = mpsc::UnboundedSender<LocationEvent>;

type CancelFn = Box<dyn FnOnce() + Send>;

/// Cancelable stream of location events
pub struct LocationWatch {
    events: mpsc::UnboundedReceiver<LocationEvent>,
    cancel: Option<CancelFn>,
    hung_up: bool,
}

impl LocationWatch {
    /// Create a watch and the sender a source uses to feed it
    pub fn channel() -> (LocationSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                events: rx,
                cancel: None,
                hung_up: false,
            },
        )
    }

    /// Register the source-side teardown to run when the watch is cancelled
    pub fn on_cancel(mut self, cancel: impl FnOnce() + Send + 'static) -> Self {
        self.cancel = Some(Box::new(cancel));
        self
    }

    /// Next event already delivered, without waiting
    pub fn try_next(&mut self) -> Option<LocationEvent> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.hung_up = true;
                None
            }
        }
    }

    /// The source dropped its sender and everything it sent was drained
    pub fn is_exhausted(&self) -> bool {
        self.hung_up
    }

    /// Wait for the next event. `None` once the source has hung up.
    pub async fn next(&mut self) -> Option<LocationEvent> {
        self.events.recv().await
    }

    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for LocationWatch {
    fn drop(&mut self) {
        self.events.close();
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for LocationWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationWatch")
            .field("cancelable", &self.cancel.is_some())
            .finish()
    }
}

/// Source for platforms without any location capability
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLocation;

impl LocationSource for NoLocation {
    fn watch(&mut self, _options: &WatchOptions) -> Result<LocationWatch, LocationError> {
        Err(LocationError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    fn fix(lat: f64) -> Fix {
        Fix::new(lat, 8.0, 5.0, Utc::now())
    }

    #[test]
    fn test_events_arrive_in_order() {
        let (tx, mut watch) = LocationWatch::channel();
        tx.send(LocationEvent::Position(fix(1.0))).unwrap();
        tx.send(LocationEvent::Position(fix(2.0))).unwrap();
        tx.send(LocationEvent::Error(LocationError::Timeout)).unwrap();

        assert!(matches!(watch.try_next(), Some(LocationEvent::Position(f)) if f.latitude == 1.0));
        assert!(matches!(watch.try_next(), Some(LocationEvent::Position(f)) if f.latitude == 2.0));
        assert_eq!(watch.try_next(), Some(LocationEvent::Error(LocationError::Timeout)));
        assert_eq!(watch.try_next(), None);
        assert!(!watch.is_exhausted());

        drop(tx);
        assert_eq!(watch.try_next(), None);
        assert!(watch.is_exhausted());
    }

    #[test]
    fn test_drop_runs_cancel_and_closes_channel() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let (tx, watch) = LocationWatch::channel();
        let watch = watch.on_cancel(move || flag.store(true, Ordering::SeqCst));

        watch.cancel();

        assert!(cancelled.load(Ordering::SeqCst));
        assert!(tx.send(LocationEvent::Position(fix(1.0))).is_err());
    }

    #[test]
    fn test_no_location_is_unsupported() {
        let err = NoLocation.watch(&WatchOptions::default()).unwrap_err();
        assert_eq!(err, LocationError::Unsupported);
    }
}
