// src/recorder/keep_awake.rs
//! Best-effort "keep the screen on" while tracking

use crate::error::WakeLockError;
use std::process::{Child, Command, Stdio};

/// Platform wake lock
pub trait WakeLock {
    fn is_supported(&self) -> bool;
    fn request(&mut self) -> Result<(), WakeLockError>;
    fn release(&mut self);
    /// Whether a granted lock is still in force; the platform may revoke it
    fn poll_held(&mut self) -> bool;
}

/// Wake lock for platforms that have none
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWakeLock;

impl WakeLock for NoWakeLock {
    fn is_supported(&self) -> bool {
        false
    }

    fn request(&mut self) -> Result<(), WakeLockError> {
        Err(WakeLockError::Unsupported)
    }

    fn release(&mut self) {}

    fn poll_held(&mut self) -> bool {
        false
    }
}

/// Holds an idle inhibitor through `systemd-inhibit` for as long as the
/// lock is held.
#[derive(Debug, Default)]
pub struct SystemdInhibit {
    child: Option<Child>,
}

impl SystemdInhibit {
    const PROGRAM: &'static str = "systemd-inhibit";

    pub fn new() -> Self {
        Self::default()
    }
}

impl WakeLock for SystemdInhibit {
    fn is_supported(&self) -> bool {
        std::env::var_os("PATH")
            .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(Self::PROGRAM).is_file()))
            .unwrap_or(false)
    }

    fn request(&mut self) -> Result<(), WakeLockError> {
        if self.child.is_some() {
            return Ok(());
        }
        let child = Command::new(Self::PROGRAM)
            .args([
                "--what=idle:sleep",
                "--who=hike-recorder",
                "--why=Recording a hike",
                "sleep",
                "infinity",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| WakeLockError::Denied(e.to_string()))?;
        self.child = Some(child);
        Ok(())
    }

    fn release(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    fn poll_held(&mut self) -> bool {
        let exited = match self.child.as_mut() {
            Some(child) => !matches!(child.try_wait(), Ok(None)),
            None => return false,
        };
        if exited {
            tracing::warn!("{} exited; idle inhibitor lost", Self::PROGRAM);
            self.child = None;
        }
        !exited
    }
}

impl Drop for SystemdInhibit {
    fn drop(&mut self) {
        self.release();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeepAwakeStatus {
    /// User preference
    pub requested: bool,
    /// Lock currently held
    pub active: bool,
    /// Advisory message from the last failed attempt
    pub error: Option<String>,
}

/// Tracks the user's keep-awake preference and the lock that honors it.
///
/// Failures only ever end up in `error`; the recording carries on either way.
#[derive(Debug)]
pub struct KeepAwake<W: WakeLock> {
    lock: W,
    requested: bool,
    active: bool,
    error: Option<String>,
    unsupported_reported: bool,
}

impl<W: WakeLock> KeepAwake<W> {
    pub fn new(lock: W) -> Self {
        Self {
            lock,
            requested: false,
            active: false,
            error: None,
            unsupported_reported: false,
        }
    }

    pub fn lock(&self) -> &W {
        &self.lock
    }

    pub fn status(&self) -> KeepAwakeStatus {
        KeepAwakeStatus {
            requested: self.requested,
            active: self.active,
            error: self.error.clone(),
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Turn the preference on, acquiring right away when `tracking`
    pub fn enable(&mut self, tracking: bool) {
        self.requested = true;
        if tracking {
            self.acquire();
        }
    }

    pub fn disable(&mut self) {
        self.requested = false;
        self.error = None;
        self.release();
    }

    /// Acquire if the user asked for it and it is not already held
    pub fn acquire(&mut self) {
        if !self.requested || self.active {
            return;
        }

        if !self.lock.is_supported() {
            if !self.unsupported_reported {
                tracing::warn!("Wake lock not supported on this platform");
                self.error = Some(WakeLockError::Unsupported.to_string());
                self.unsupported_reported = true;
            }
            return;
        }

        match self.lock.request() {
            Ok(()) => {
                tracing::debug!("Wake lock acquired");
                self.active = true;
                self.error = None;
            }
            Err(e) => {
                tracing::warn!("Wake lock request failed: {}", e);
                self.error = Some(e.to_string());
            }
        }
    }

    pub fn release(&mut self) {
        if self.active {
            self.lock.release();
            self.active = false;
            tracing::debug!("Wake lock released");
        }
    }

    /// Notice a lock the platform revoked without telling us
    pub fn check(&mut self) {
        if self.active && !self.lock.poll_held() {
            self.handle_platform_release();
        }
    }

    /// The platform dropped the lock on its own (e.g. the host lost focus)
    pub fn handle_platform_release(&mut self) {
        if self.active {
            tracing::debug!("Wake lock released by the platform");
            self.active = false;
        }
    }
}
