// src/testing.rs
//! Test doubles for the recorder's collaborators

use crate::error::{LocationError, WakeLockError};
use crate::location::{Fix, LocationEvent, LocationSender, LocationSource, LocationWatch, WatchOptions};
use crate::recorder::WakeLock;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct ScriptedInner {
    sender: Option<LocationSender>,
    watch_calls: usize,
    active: usize,
    fail_with: Option<LocationError>,
    last_options: Option<WatchOptions>,
}

/// Location source driven by the test. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    inner: Arc<Mutex<ScriptedInner>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next watch calls fail up front
    pub fn fail_watch_with(&self, error: Option<LocationError>) {
        self.inner.lock().unwrap().fail_with = error;
    }

    /// Deliver a fix on the current watch. Returns false if none is open.
    pub fn push_fix(&self, fix: Fix) -> bool {
        self.push(LocationEvent::Position(fix))
    }

    pub fn push_error(&self, error: LocationError) -> bool {
        self.push(LocationEvent::Error(error))
    }

    fn push(&self, event: LocationEvent) -> bool {
        match &self.inner.lock().unwrap().sender {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn watch_calls(&self) -> usize {
        self.inner.lock().unwrap().watch_calls
    }

    /// Watches handed out and not yet cancelled
    pub fn active_watches(&self) -> usize {
        self.inner.lock().unwrap().active
    }

    pub fn last_options(&self) -> Option<WatchOptions> {
        self.inner.lock().unwrap().last_options.clone()
    }
}

impl LocationSource for ScriptedSource {
    fn watch(&mut self, options: &WatchOptions) -> Result<LocationWatch, LocationError> {
        let mut inner = self.inner.lock().unwrap();
        inner.watch_calls += 1;
        inner.last_options = Some(options.clone());
        if let Some(err) = inner.fail_with.clone() {
            return Err(err);
        }

        let (tx, watch) = LocationWatch::channel();
        inner.sender = Some(tx);
        inner.active += 1;

        let shared = Arc::clone(&self.inner);
        Ok(watch.on_cancel(move || {
            let mut inner = shared.lock().unwrap();
            inner.active -= 1;
        }))
    }
}

#[derive(Debug, Default)]
struct FakeLockInner {
    unsupported: bool,
    deny: Option<String>,
    held: bool,
    requests: usize,
    releases: usize,
}

/// Wake lock that records what was asked of it. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeWakeLock {
    inner: Rc<RefCell<FakeLockInner>>,
}

impl FakeWakeLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unsupported() -> Self {
        let lock = Self::default();
        lock.inner.borrow_mut().unsupported = true;
        lock
    }

    pub fn deny_with(&self, message: &str) {
        self.inner.borrow_mut().deny = Some(message.to_string());
    }

    pub fn is_held(&self) -> bool {
        self.inner.borrow().held
    }

    pub fn requests(&self) -> usize {
        self.inner.borrow().requests
    }

    pub fn releases(&self) -> usize {
        self.inner.borrow().releases
    }

    /// Drop the lock from the platform side
    pub fn revoke(&self) {
        self.inner.borrow_mut().held = false;
    }
}

impl WakeLock for FakeWakeLock {
    fn is_supported(&self) -> bool {
        !self.inner.borrow().unsupported
    }

    fn request(&mut self) -> Result<(), WakeLockError> {
        let mut inner = self.inner.borrow_mut();
        inner.requests += 1;
        if let Some(msg) = &inner.deny {
            return Err(WakeLockError::Denied(msg.clone()));
        }
        inner.held = true;
        Ok(())
    }

    fn release(&mut self) {
        let mut inner = self.inner.borrow_mut();
        inner.releases += 1;
        inner.held = false;
    }

    fn poll_held(&mut self) -> bool {
        self.inner.borrow().held
    }
}
