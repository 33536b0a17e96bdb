// src/recorder/mod.rs
//! The recording session engine.
//!
//! [`Recorder`] owns the whole life of one hike recording: it filters the
//! location stream, accumulates distance and moving time, keeps a snapshot
//! in storage so an interrupted recording can be picked up again, and asks
//! for a wake lock while tracking if the user wants one.
//!
//! The recorder never spawns anything. Its owner feeds it:
//! - [`Recorder::pump`] drains fixes delivered on the active watch,
//! - [`Recorder::tick`] advances the clock-driven elapsed time,
//! - [`Recorder::handle_visibility_change`] and
//!   [`Recorder::handle_wake_lock_released`] relay host events.

pub mod filter;
pub mod keep_awake;
pub mod snapshot;
pub mod state;

pub use filter::{FilterConfig, FilterOutcome, PositionFilter, RejectReason};
pub use keep_awake::{KeepAwake, KeepAwakeStatus, NoWakeLock, SystemdInhibit, WakeLock};
pub use snapshot::{FileStore, MemoryStore, PersistedSnapshot, SnapshotState, SnapshotStore};
pub use state::{RecorderStatus, SessionResult, SessionState};

use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::error::LocationError;
use crate::hike::TrackPoint;
use crate::location::{Fix, LocationEvent, LocationSource, LocationWatch};
use chrono::{DateTime, Duration, Utc};
use snapshot::RestorePlan;

/// Once-per-period timer driven by the owner's calls to `tick`
#[derive(Debug, Clone, Copy)]
struct Ticker {
    period: Duration,
    next_due: DateTime<Utc>,
}

impl Ticker {
    fn new(period: Duration, now: DateTime<Utc>) -> Self {
        Self {
            period,
            next_due: now + period,
        }
    }

    /// True when a tick is due; schedules the next one after `now`
    fn fire(&mut self, now: DateTime<Utc>) -> bool {
        if now < self.next_due {
            return false;
        }
        let period_ms = self.period.num_milliseconds().max(1);
        let missed = (now - self.next_due).num_milliseconds() / period_ms;
        self.next_due += Duration::milliseconds((missed + 1) * period_ms);
        true
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    ((to - from).num_milliseconds() as f64 / 1000.0).max(0.0)
}

pub struct Recorder<L, S, W, C = SystemClock>
where
    L: LocationSource,
    S: SnapshotStore,
    W: WakeLock,
    C: Clock,
{
    config: SessionConfig,
    filter: PositionFilter,
    source: L,
    store: S,
    clock: C,
    keep_awake: KeepAwake<W>,

    state: SessionState,
    points: Vec<TrackPoint>,
    distance_meters: f64,
    elapsed_sec: u64,
    accuracy: Option<f64>,
    last_point: Option<TrackPoint>,
    accumulated_sec: f64,
    interval_started_at: Option<DateTime<Utc>>,
    session_started_at: Option<DateTime<Utc>>,
    restored: bool,

    watch: Option<LocationWatch>,
    timer: Option<Ticker>,
    last_snapshot_at: Option<DateTime<Utc>>,
}

impl<L, S, W, C> Recorder<L, S, W, C>
where
    L: LocationSource,
    S: SnapshotStore,
    W: WakeLock,
    C: Clock,
{
    /// Build a recorder and pick up any interrupted session from `store`
    pub fn new(config: SessionConfig, source: L, store: S, wake_lock: W, clock: C) -> Self {
        let mut recorder = Self {
            filter: PositionFilter::new(config.filter),
            config,
            source,
            store,
            clock,
            keep_awake: KeepAwake::new(wake_lock),
            state: SessionState::Idle,
            points: Vec::new(),
            distance_meters: 0.0,
            elapsed_sec: 0,
            accuracy: None,
            last_point: None,
            accumulated_sec: 0.0,
            interval_started_at: None,
            session_started_at: None,
            restored: false,
            watch: None,
            timer: None,
            last_snapshot_at: None,
        };
        recorder.restore();
        recorder
    }

    // ---- operations ----

    /// Start a fresh recording from any state
    pub fn start(&mut self) {
        self.stop_live();

        let now = self.clock.now();
        self.points.clear();
        self.distance_meters = 0.0;
        self.elapsed_sec = 0;
        self.accuracy = None;
        self.last_point = None;
        self.accumulated_sec = 0.0;
        self.interval_started_at = Some(now);
        self.session_started_at = Some(now);
        self.restored = false;
        snapshot::clear_snapshot(&mut self.store);

        self.state = SessionState::Tracking;
        tracing::info!("Recording started at {}", now.to_rfc3339());

        if self.start_live(now) {
            self.keep_awake.acquire();
            self.persist();
        }
    }

    /// Tracking → Paused. Returns false (and changes nothing) otherwise.
    pub fn pause(&mut self) -> bool {
        if !self.state.is_tracking() {
            tracing::debug!("pause() ignored in state {}", self.state);
            return false;
        }

        self.stop_live();
        self.fold_interval();
        self.keep_awake.release();
        self.elapsed_sec = self.accumulated_sec.floor() as u64;
        self.state = SessionState::Paused;
        tracing::info!("Recording paused after {}s", self.elapsed_sec);
        self.persist();
        true
    }

    /// Paused → Tracking. Returns false (and changes nothing) otherwise.
    pub fn resume(&mut self) -> bool {
        if self.state != SessionState::Paused {
            tracing::debug!("resume() ignored in state {}", self.state);
            return false;
        }

        let now = self.clock.now();
        self.interval_started_at = Some(now);
        self.state = SessionState::Tracking;
        tracing::info!("Recording resumed");

        if self.start_live(now) {
            self.keep_awake.acquire();
            self.persist();
        }
        true
    }

    /// End the recording. `None` unless tracking or paused.
    pub fn finish(&mut self) -> Option<SessionResult> {
        if !self.state.is_in_progress() {
            tracing::debug!("finish() ignored in state {}", self.state);
            return None;
        }

        let now = self.clock.now();
        self.stop_live();
        self.fold_interval();
        self.keep_awake.release();

        let duration_sec = self.accumulated_sec.floor() as u64;
        self.elapsed_sec = duration_sec;
        self.state = SessionState::Ended;
        snapshot::clear_snapshot(&mut self.store);
        snapshot::write_last_finished(&mut self.store, now);

        let result = SessionResult {
            started_at: self.session_started_at.unwrap_or(now),
            ended_at: now,
            duration_sec,
        };
        tracing::info!(
            "Recording finished: {:.0} m in {}s over {} points",
            self.distance_meters,
            duration_sec,
            self.points.len()
        );
        Some(result)
    }

    pub fn enable_keep_awake(&mut self) {
        let tracking = self.state.is_tracking();
        self.keep_awake.enable(tracking);
    }

    pub fn disable_keep_awake(&mut self) {
        self.keep_awake.disable();
    }

    // ---- events ----

    /// Process every event already delivered on the active watch, in order.
    /// Returns how many were handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let event = match self.watch.as_mut().and_then(|w| w.try_next()) {
                Some(event) => event,
                None => break,
            };
            self.handle_location_event(event);
            handled += 1;
        }
        handled
    }

    /// Feed one event from the location stream. Ignored unless tracking.
    pub fn handle_location_event(&mut self, event: LocationEvent) -> Option<FilterOutcome> {
        if !self.state.is_tracking() {
            tracing::debug!("Dropping location event while {}", self.state);
            return None;
        }

        match event {
            LocationEvent::Position(fix) => Some(self.handle_fix(&fix)),
            LocationEvent::Error(error) => {
                self.fail(error);
                None
            }
        }
    }

    /// Timer callback. Recomputes elapsed time when a tick is due and
    /// refreshes the snapshot at the configured cadence.
    pub fn tick(&mut self) -> bool {
        let now = self.clock.now();
        let fired = match self.timer.as_mut() {
            Some(timer) => timer.fire(now),
            None => false,
        };
        if !fired {
            return false;
        }

        self.elapsed_sec = self.active_seconds(now).floor() as u64;
        self.keep_awake.check();

        if self.snapshot_due(now) {
            self.persist();
        }
        true
    }

    /// Write the snapshot now if a session is in progress. Accepted fixes
    /// are only persisted on the snapshot cadence, so owners call this
    /// before letting go of a session they want restored.
    pub fn flush(&mut self) {
        if self.state.is_in_progress() {
            self.persist();
        }
    }

    /// The host became visible/hidden. Coming back while tracking re-takes
    /// the wake lock the platform may have dropped.
    pub fn handle_visibility_change(&mut self, visible: bool) {
        if visible && self.state.is_tracking() {
            self.keep_awake.acquire();
        }
    }

    /// The platform released the wake lock by itself
    pub fn handle_wake_lock_released(&mut self) {
        self.keep_awake.handle_platform_release();
    }

    // ---- accessors ----

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    pub fn distance_meters(&self) -> f64 {
        self.distance_meters
    }

    pub fn elapsed_sec(&self) -> u64 {
        self.elapsed_sec
    }

    pub fn accuracy(&self) -> Option<f64> {
        self.accuracy
    }

    pub fn error(&self) -> Option<&str> {
        self.state.error_message()
    }

    pub fn is_restored(&self) -> bool {
        self.restored
    }

    pub fn session_started_at(&self) -> Option<DateTime<Utc>> {
        self.session_started_at
    }

    pub fn keep_awake(&self) -> KeepAwakeStatus {
        self.keep_awake.status()
    }

    /// Location subscription open
    pub fn is_watching(&self) -> bool {
        self.watch.is_some()
    }

    /// The active watch's source has hung up for good (e.g. a replay ran out)
    pub fn is_source_exhausted(&self) -> bool {
        self.watch.as_ref().map_or(false, LocationWatch::is_exhausted)
    }

    /// Elapsed-time timer running
    pub fn is_timing(&self) -> bool {
        self.timer.is_some()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn status(&self) -> RecorderStatus {
        RecorderStatus {
            state: self.state.clone(),
            point_count: self.points.len(),
            distance_meters: self.distance_meters,
            elapsed_sec: self.elapsed_sec,
            accuracy: self.accuracy,
            error: self.error().map(str::to_string),
            restored: self.restored,
            keep_awake: self.keep_awake.status(),
        }
    }

    // ---- internals ----

    fn handle_fix(&mut self, fix: &Fix) -> FilterOutcome {
        let point = TrackPoint::from_fix(fix);
        let outcome = self.filter.evaluate(&point, self.last_point.as_ref());

        match outcome {
            FilterOutcome::Accepted { segment_m } => {
                self.distance_meters += segment_m;
                self.accuracy = Some(point.accuracy);
                self.last_point = Some(point);
                self.points.push(point);
                if self.snapshot_due(self.clock.now()) {
                    self.persist();
                }
            }
            FilterOutcome::Rejected(reason) => {
                tracing::debug!("Rejected fix at {}: {:?}", point.timestamp.to_rfc3339(), reason);
            }
        }
        outcome
    }

    /// Open the timer and the location watch. On failure the recorder is
    /// left in the error state and false is returned.
    fn start_live(&mut self, now: DateTime<Utc>) -> bool {
        let period = Duration::milliseconds(self.config.tick_interval_ms.max(1) as i64);
        self.timer = Some(Ticker::new(period, now));

        match self.source.watch(&self.config.watch) {
            Ok(watch) => {
                self.watch = Some(watch);
                true
            }
            Err(error) => {
                self.fail(error);
                false
            }
        }
    }

    /// Idempotent
    fn stop_live(&mut self) {
        if let Some(watch) = self.watch.take() {
            watch.cancel();
        }
        self.timer = None;
    }

    fn fail(&mut self, error: LocationError) {
        tracing::warn!("Location stream failed: {}", error);
        self.stop_live();
        self.fold_interval();
        self.keep_awake.release();
        self.elapsed_sec = self.accumulated_sec.floor() as u64;
        self.state = SessionState::Error(error.to_string());
        self.persist();
    }

    fn fold_interval(&mut self) {
        if let Some(started) = self.interval_started_at.take() {
            self.accumulated_sec += seconds_between(started, self.clock.now());
        }
    }

    fn active_seconds(&self, now: DateTime<Utc>) -> f64 {
        let running = self
            .interval_started_at
            .map_or(0.0, |started| seconds_between(started, now));
        self.accumulated_sec + running
    }

    fn snapshot_due(&self, now: DateTime<Utc>) -> bool {
        let cadence = Duration::seconds(self.config.snapshot_interval_secs as i64);
        self.last_snapshot_at.map_or(true, |last| now - last >= cadence)
    }

    /// Write the snapshot while a session is in progress, delete it otherwise
    fn persist(&mut self) {
        let now = self.clock.now();
        let state = match self.state {
            SessionState::Tracking => SnapshotState::Tracking,
            SessionState::Paused => SnapshotState::Paused,
            _ => {
                snapshot::clear_snapshot(&mut self.store);
                return;
            }
        };

        let snapshot = PersistedSnapshot {
            state,
            points: self.points.clone(),
            distance_meters: self.distance_meters,
            elapsed_sec: self.active_seconds(now).floor() as u64,
            accuracy: self.accuracy,
            last_point: self.last_point,
            accumulated_sec: self.active_seconds(now),
            session_started_at: self.session_started_at,
            saved_at: now,
            degraded: false,
        };
        snapshot::write_snapshot(&mut self.store, &snapshot);
        self.last_snapshot_at = Some(now);
    }

    fn restore(&mut self) {
        let raw = match self.store.get(snapshot::SNAPSHOT_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("Could not read session snapshot: {}", e);
                return;
            }
        };

        let saved = match PersistedSnapshot::from_json(&raw) {
            Ok(saved) => saved,
            Err(e) => {
                tracing::warn!("Discarding unreadable session snapshot: {}", e);
                snapshot::clear_snapshot(&mut self.store);
                return;
            }
        };

        let now = self.clock.now();
        let last_finished = snapshot::read_last_finished(&self.store);
        let freshness = Duration::seconds(self.config.freshness_window_secs as i64);

        match snapshot::plan_restore(saved, last_finished, now, freshness) {
            RestorePlan::Discard(reason) => {
                tracing::info!("Discarding session snapshot: {:?}", reason);
                snapshot::clear_snapshot(&mut self.store);
            }
            RestorePlan::ResumeLive { snapshot, extra_secs } => {
                self.load_snapshot(&snapshot);
                self.accumulated_sec = snapshot.accumulated_sec + extra_secs;
                self.elapsed_sec = self.accumulated_sec.floor() as u64;
                self.interval_started_at = Some(now);
                self.state = SessionState::Tracking;
                tracing::info!(
                    "Resuming recording from snapshot ({} points, +{:.0}s while away)",
                    self.points.len(),
                    extra_secs
                );
                if self.start_live(now) {
                    self.keep_awake.acquire();
                    self.persist();
                }
            }
            RestorePlan::RestorePaused { snapshot } => {
                self.load_snapshot(&snapshot);
                self.accumulated_sec = snapshot.accumulated_sec;
                self.elapsed_sec = self.accumulated_sec.floor() as u64;
                self.interval_started_at = None;
                self.state = SessionState::Paused;
                tracing::info!(
                    "Restored recording as paused ({} points, snapshot from {})",
                    self.points.len(),
                    snapshot.saved_at.to_rfc3339()
                );
                self.persist();
            }
        }
    }

    fn load_snapshot(&mut self, snapshot: &PersistedSnapshot) {
        self.points = snapshot.points.clone();
        self.distance_meters = snapshot.distance_meters;
        self.accuracy = snapshot.accuracy;
        self.last_point = snapshot.last_point.or_else(|| self.points.last().copied());
        self.session_started_at = snapshot.session_started_at;
        self.restored = true;
    }
}

impl<L, S, W, C> Drop for Recorder<L, S, W, C>
where
    L: LocationSource,
    S: SnapshotStore,
    W: WakeLock,
    C: Clock,
{
    fn drop(&mut self) {
        self.stop_live();
        self.keep_awake.release();
    }
}
