//! Keyed completion latch.
//!
//! A countdown latch over named keys instead of a counter: `add` before
//! dispatch, `done` from any thread, `wait` until nothing is pending.
//! `decommission` force-releases waiters after a timeout and reports which keys
//! never completed. Keys finishing after a decommission are ignored.
//!
//! The release signal is a crossbeam channel whose sender is dropped once the
//! pending set empties; every waiter holds a receiver clone and wakes on
//! disconnect.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

struct LatchState {
    pending: HashSet<String>,
    signal: Option<Sender<()>>,
    released: Receiver<()>,
}

impl LatchState {
    fn rearm(&mut self) {
        let (signal, released) = bounded(1);
        self.signal = Some(signal);
        self.released = released;
    }
}

pub struct KeyedLatch {
    state: Mutex<LatchState>,
}

impl Default for KeyedLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyedLatch {
    pub fn new() -> Self {
        let (signal, released) = bounded(1);
        Self {
            state: Mutex::new(LatchState {
                pending: HashSet::new(),
                signal: Some(signal),
                released,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LatchState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a key that must complete before `wait` returns.
    pub fn add(&self, key: impl Into<String>) {
        let mut state = self.lock();
        if state.signal.is_none() {
            state.rearm();
        }
        state.pending.insert(key.into());
    }

    /// Marks a key complete. Unknown or already completed keys are ignored.
    pub fn done(&self, key: &str) {
        let mut state = self.lock();
        if state.pending.remove(key) && state.pending.is_empty() {
            state.signal = None;
        }
    }

    /// Blocks until every added key is done or the latch is decommissioned.
    pub fn wait(&self) {
        let released = {
            let state = self.lock();
            if state.pending.is_empty() {
                return;
            }
            state.released.clone()
        };
        // Nothing is ever sent; disconnect is the release.
        let _ = released.recv();
    }

    /// Empties the pending set, releases every waiter and returns the keys that
    /// never completed, sorted.
    pub fn decommission(&self) -> Vec<String> {
        let mut state = self.lock();
        let mut missing: Vec<String> = state.pending.drain().collect();
        missing.sort();
        state.signal = None;
        state.rearm();
        missing
    }

    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }
}
