// Licensed under the Apache-2.0 license

//! Power-management gates.
//!
//! [`SleepLock`] keeps the link out of deep sleep while completion work is
//! outstanding. [`WakeSource`] keeps the platform awake for a short window
//! after receive activity.

use log::trace;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Reference-counted deep-sleep gate. Clones share the same count.
#[derive(Clone, Default)]
pub struct SleepLock {
    holders: Arc<AtomicUsize>,
}

impl SleepLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) -> SleepToken {
        let n = self.holders.fetch_add(1, Ordering::AcqRel) + 1;
        trace!("sleep lock acquired ({n} holders)");
        SleepToken {
            holders: self.holders.clone(),
        }
    }

    pub fn holders(&self) -> usize {
        self.holders.load(Ordering::Acquire)
    }

    pub fn is_held(&self) -> bool {
        self.holders() != 0
    }
}

/// One hold on a [`SleepLock`], released on drop.
pub struct SleepToken {
    holders: Arc<AtomicUsize>,
}

impl Drop for SleepToken {
    fn drop(&mut self) {
        self.holders.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Keeps the platform awake while active and for a while afterwards.
#[derive(Default)]
pub struct WakeSource {
    active: AtomicUsize,
    until: Mutex<Option<Instant>>,
}

impl WakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Holds the source until the guard drops, then for `window` more.
    pub fn stay_awake(&self, window: Duration) -> WakeGuard<'_> {
        self.active.fetch_add(1, Ordering::AcqRel);
        WakeGuard { src: self, window }
    }

    /// Registers a one-off wake event lasting `window`.
    pub fn event(&self, window: Duration) {
        let deadline = Instant::now() + window;
        let mut until = self.until.lock().unwrap_or_else(|e| e.into_inner());
        match *until {
            Some(t) if t >= deadline => {}
            _ => *until = Some(deadline),
        }
    }

    pub fn is_awake(&self) -> bool {
        if self.active.load(Ordering::Acquire) != 0 {
            return true;
        }
        let until = self.until.lock().unwrap_or_else(|e| e.into_inner());
        until.is_some_and(|t| Instant::now() < t)
    }

    /// Drops any pending window, e.g. when the device goes away.
    pub fn relax(&self) {
        *self.until.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

pub struct WakeGuard<'a> {
    src: &'a WakeSource,
    window: Duration,
}

impl Drop for WakeGuard<'_> {
    fn drop(&mut self) {
        self.src.event(self.window);
        self.src.active.fetch_sub(1, Ordering::AcqRel);
    }
}
