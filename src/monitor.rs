// src/monitor.rs
//! Drives a recorder from the terminal: ticks, keyboard commands, Ctrl+C

use crate::{
    clock::Clock,
    display::TerminalDisplay,
    error::Result,
    hike::{HikeRecord, HikeStore},
    location::LocationSource,
    recorder::{Recorder, SessionResult, SessionState, SnapshotStore, WakeLock},
};
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// One line typed on stdin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Pause,
    Resume,
    Finish,
    ToggleKeepAwake,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "s" | "start" => Some(Command::Start),
            "p" | "pause" => Some(Command::Pause),
            "r" | "resume" => Some(Command::Resume),
            "f" | "finish" => Some(Command::Finish),
            "k" | "keep-awake" => Some(Command::ToggleKeepAwake),
            "q" | "quit" => Some(Command::Quit),
            _ => None,
        }
    }
}

/// How a monitoring run ended
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Finished and saved to the hike store
    Saved { path: PathBuf, hike_name: String },
    /// Finished without any accepted point; nothing was saved
    Empty(SessionResult),
    /// Left while a session was in progress; the snapshot carries it over
    Detached,
}

/// Forward lines from `reader` on a detached thread.
///
/// A blocking stdin read cannot be cancelled, so the thread is never joined
/// and never keeps the runtime from shutting down; it goes away with the
/// process. The channel closes at EOF or on a read error.
pub fn spawn_line_reader<R>(reader: R) -> mpsc::UnboundedReceiver<String>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("line-reader".to_string())
        .spawn(move || {
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to read input: {}", e);
                        break;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!("Could not start input reader: {}", e);
    }
    rx
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub struct HikeMonitor<L, S, W, C>
where
    L: LocationSource,
    S: SnapshotStore,
    W: WakeLock,
    C: Clock,
{
    recorder: Recorder<L, S, W, C>,
    hikes: HikeStore,
    display: TerminalDisplay,
    hike_name: Option<String>,
    finish_when_source_ends: bool,
    outcome: Option<Outcome>,
}

impl<L, S, W, C> HikeMonitor<L, S, W, C>
where
    L: LocationSource,
    S: SnapshotStore,
    W: WakeLock,
    C: Clock,
{
    pub fn new(recorder: Recorder<L, S, W, C>, hikes: HikeStore, display: TerminalDisplay) -> Self {
        Self {
            recorder,
            hikes,
            display,
            hike_name: None,
            finish_when_source_ends: false,
            outcome: None,
        }
    }

    pub fn with_hike_name(mut self, name: Option<String>) -> Self {
        self.hike_name = name;
        self
    }

    /// Finish on its own once a finite source (a replay) has run dry
    pub fn finish_when_source_ends(mut self, enabled: bool) -> Self {
        self.finish_when_source_ends = enabled;
        self
    }

    pub fn recorder(&self) -> &Recorder<L, S, W, C> {
        &self.recorder
    }

    /// Start a fresh session unless one was restored
    pub fn start_or_continue(&mut self) {
        match self.recorder.state() {
            SessionState::Tracking => tracing::info!("Continuing restored recording"),
            SessionState::Paused => tracing::info!("Restored a paused recording; resume with 'r'"),
            _ => self.recorder.start(),
        }
    }

    /// Run until finished, quit, or interrupted
    pub async fn run(mut self) -> Result<Outcome> {
        let tick_ms = self.recorder.config().tick_interval_ms.max(1);
        let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut lines = spawn_line_reader(std::io::BufReader::new(std::io::stdin()));
        let mut stdin_open = true;

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        self.display.begin()?;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.on_tick()? == Flow::Stop {
                        break;
                    }
                }
                line = lines.recv(), if stdin_open => {
                    match line {
                        Some(line) => {
                            if let Some(cmd) = Command::parse(&line) {
                                if self.apply(cmd)? == Flow::Stop {
                                    break;
                                }
                                self.render()?;
                            } else if !line.trim().is_empty() {
                                tracing::debug!("Unknown command {:?}", line.trim());
                            }
                        }
                        None => stdin_open = false,
                    }
                }
                _ = &mut ctrl_c => {
                    tracing::info!("Interrupted");
                    self.detach();
                    break;
                }
            }
        }

        self.display.end()?;
        Ok(self.outcome.take().unwrap_or(Outcome::Detached))
    }

    fn on_tick(&mut self) -> Result<Flow> {
        self.recorder.pump();
        self.recorder.tick();

        if self.finish_when_source_ends
            && self.recorder.state().is_tracking()
            && self.recorder.is_source_exhausted()
        {
            tracing::info!("Location source ended");
            return self.apply(Command::Finish);
        }

        self.render()?;
        Ok(Flow::Continue)
    }

    fn render(&mut self) -> Result<()> {
        let status = self.recorder.status();
        self.display.render(&status)
    }

    /// Apply a user command
    fn apply(&mut self, cmd: Command) -> Result<Flow> {
        match cmd {
            Command::Start => self.recorder.start(),
            Command::Pause => {
                // Fixes already delivered would be lost with the watch
                self.recorder.pump();
                self.recorder.pause();
            }
            Command::Resume => {
                self.recorder.resume();
            }
            Command::ToggleKeepAwake => {
                if self.recorder.keep_awake().requested {
                    self.recorder.disable_keep_awake();
                } else {
                    self.recorder.enable_keep_awake();
                }
            }
            Command::Finish => {
                // Pick up anything delivered since the last tick
                self.recorder.pump();
                if let Some(result) = self.recorder.finish() {
                    self.outcome = Some(self.save(&result)?);
                    return Ok(Flow::Stop);
                }
            }
            Command::Quit => {
                self.detach();
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    fn detach(&mut self) {
        if self.recorder.state().is_in_progress() {
            tracing::info!("Leaving recording in progress; it will be restored next time");
            self.recorder.pump();
            self.recorder.flush();
        }
        self.outcome = Some(Outcome::Detached);
    }

    fn save(&self, result: &SessionResult) -> Result<Outcome> {
        let points = self.recorder.points();
        if points.is_empty() {
            tracing::warn!("No points were recorded; not saving the hike");
            return Ok(Outcome::Empty(*result));
        }

        let mut hike = HikeRecord::from_session(result, self.recorder.distance_meters(), points.to_vec());
        if let Some(name) = &self.hike_name {
            hike = hike.with_name(name.clone());
        }
        let path = self.hikes.save(&hike)?;
        println!("{}", hike.summary());
        Ok(Outcome::Saved {
            path,
            hike_name: hike.name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::SessionConfig;
    use crate::geo::offset_meters;
    use crate::location::Fix;
    use crate::recorder::MemoryStore;
    use crate::testing::{FakeWakeLock, ScriptedSource};
    use chrono::{TimeZone, Utc};

    type TestMonitor = HikeMonitor<ScriptedSource, MemoryStore, FakeWakeLock, ManualClock>;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("hike-monitor-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn monitor(name: &str) -> (TestMonitor, ScriptedSource, ManualClock, PathBuf) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap());
        let source = ScriptedSource::new();
        let recorder = Recorder::new(
            SessionConfig::default(),
            source.clone(),
            MemoryStore::new(),
            FakeWakeLock::new(),
            clock.clone(),
        );
        let dir = temp_dir(name);
        let hikes = HikeStore::new(dir.clone()).unwrap();
        let display = TerminalDisplay::new("test", false);
        (HikeMonitor::new(recorder, hikes, display), source, clock, dir)
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("p"), Some(Command::Pause));
        assert_eq!(Command::parse(" Resume \n"), Some(Command::Resume));
        assert_eq!(Command::parse("k"), Some(Command::ToggleKeepAwake));
        assert_eq!(Command::parse("x"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[tokio::test]
    async fn test_line_reader_forwards_then_closes() {
        let input = std::io::Cursor::new(b"p\nr\n\nq\n".to_vec());
        let mut lines = spawn_line_reader(input);

        let mut received = Vec::new();
        while let Some(line) = lines.recv().await {
            received.push(line);
        }
        assert_eq!(received, vec!["p", "r", "", "q"]);
    }

    #[test]
    fn test_pause_keeps_fixes_already_delivered() {
        let (mut monitor, source, clock, dir) = monitor("pause-pump");
        monitor.start_or_continue();

        let t0 = clock.now();
        source.push_fix(Fix::new(46.0, 8.0, 5.0, t0));
        let (lat, lon) = offset_meters(46.0, 8.0, 10.0, 0.0);
        source.push_fix(Fix::new(lat, lon, 5.0, t0 + chrono::Duration::seconds(3)));

        monitor.apply(Command::Pause).unwrap();
        assert_eq!(monitor.recorder().state(), &SessionState::Paused);
        assert_eq!(monitor.recorder().points().len(), 2);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_finish_saves_named_hike() {
        let (monitor, source, clock, dir) = monitor("save");
        let mut monitor = monitor.with_hike_name(Some("Ridge loop".to_string()));
        monitor.start_or_continue();

        let t0 = clock.now();
        for i in 0..3 {
            let (lat, lon) = offset_meters(46.0, 8.0, i as f64 * 10.0, 0.0);
            source.push_fix(Fix::new(lat, lon, 5.0, t0 + chrono::Duration::seconds(i * 3)));
        }
        clock.advance_secs(6);

        assert_eq!(monitor.apply(Command::Finish).unwrap(), Flow::Stop);
        match monitor.outcome.clone() {
            Some(Outcome::Saved { path, hike_name }) => {
                assert_eq!(hike_name, "Ridge loop");
                assert!(path.exists());
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let saved = HikeStore::new(dir.clone()).unwrap().list().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].points.len(), 3);
        assert_eq!(saved[0].duration_sec, 6);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_finish_without_points_saves_nothing() {
        let (mut monitor, _source, _clock, dir) = monitor("empty");
        monitor.start_or_continue();
        monitor.apply(Command::Finish).unwrap();
        assert!(matches!(monitor.outcome, Some(Outcome::Empty(_))));
        assert!(HikeStore::new(dir.clone()).unwrap().list().unwrap().is_empty());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_quit_leaves_session_in_progress() {
        let (mut monitor, source, clock, dir) = monitor("quit");
        monitor.start_or_continue();

        // Between snapshot cadences; only the detach writes these points
        let t0 = clock.now();
        source.push_fix(Fix::new(46.0, 8.0, 5.0, t0));
        let (lat, lon) = offset_meters(46.0, 8.0, 10.0, 0.0);
        source.push_fix(Fix::new(lat, lon, 5.0, t0 + chrono::Duration::seconds(3)));
        clock.advance_secs(3);

        assert_eq!(monitor.apply(Command::Quit).unwrap(), Flow::Stop);
        assert_eq!(monitor.outcome, Some(Outcome::Detached));
        assert!(monitor.recorder().state().is_tracking());
        let saved = monitor.recorder().store().snapshot().unwrap();
        assert_eq!(saved.points.len(), 2);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_pause_resume_and_keep_awake_commands() {
        let (mut monitor, _source, _clock, dir) = monitor("cmds");
        monitor.start_or_continue();

        monitor.apply(Command::Pause).unwrap();
        assert_eq!(monitor.recorder().state(), &SessionState::Paused);
        monitor.apply(Command::Resume).unwrap();
        assert!(monitor.recorder().state().is_tracking());

        monitor.apply(Command::ToggleKeepAwake).unwrap();
        assert!(monitor.recorder().keep_awake().active);
        monitor.apply(Command::ToggleKeepAwake).unwrap();
        assert!(!monitor.recorder().keep_awake().requested);
        let _ = std::fs::remove_dir_all(dir);
    }
}
